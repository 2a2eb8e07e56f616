//! Per-channel harvesting and the run orchestrator.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::record::{ExportMode, ExportRecord, RecordBuilder, RunContext};
use crate::source::MessageSource;
use crate::Channel;

/// How one channel's traversal ended. Returned by value, never thrown:
/// one channel's failure must not disturb the others.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOutcome {
    Complete,
    PermissionDenied,
    TransportError(String),
}

#[derive(Debug)]
pub struct HarvestResult {
    pub channel_name: String,
    /// Newest-first, matching the transport's pagination order.
    pub records: Vec<ExportRecord>,
    pub outcome: ChannelOutcome,
}

/// Run metrics, returned alongside the ordered record sequence.
#[derive(Debug, Clone, Default)]
pub struct HarvestSummary {
    pub author_name: String,
    pub channels_scanned: usize,
    pub channels_denied: usize,
    pub channels_failed: usize,
    pub records: usize,
}

/// Walk one channel's history newest-first and collect the target
/// author's messages as records.
///
/// Unreadable channels return `PermissionDenied` with no records. A
/// transport failure mid-pagination stops the traversal but keeps what
/// was already collected.
pub async fn harvest_channel(
    source: &dyn MessageSource,
    builder: &RecordBuilder,
    channel: &Channel,
    author_id: &str,
    max_pages: Option<usize>,
) -> HarvestResult {
    if !channel.readable {
        return HarvestResult {
            channel_name: channel.name.clone(),
            records: Vec::new(),
            outcome: ChannelOutcome::PermissionDenied,
        };
    }

    let mut records = Vec::new();
    let mut cursor: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let page = match source.history_page(&channel.id, cursor.as_deref()).await {
            Ok(page) => page,
            Err(e) => {
                return HarvestResult {
                    channel_name: channel.name.clone(),
                    records,
                    outcome: ChannelOutcome::TransportError(e.to_string()),
                };
            }
        };

        for msg in &page.messages {
            if msg.author_id != author_id {
                continue;
            }
            if let Some(record) = builder.build(msg) {
                records.push(record);
            }
        }

        pages += 1;
        cursor = page.next_cursor;
        if cursor.is_none() {
            break;
        }
        if let Some(cap) = max_pages {
            if pages >= cap {
                info!("#{}: stopping at configured page cap ({})", channel.name, cap);
                break;
            }
        }
    }

    HarvestResult {
        channel_name: channel.name.clone(),
        records,
        outcome: ChannelOutcome::Complete,
    }
}

/// Fans harvesting out across channels and owns the final ordering.
pub struct Harvester {
    source: Arc<dyn MessageSource>,
    concurrency: usize,
    max_pages: Option<usize>,
}

impl Harvester {
    pub fn new(source: Arc<dyn MessageSource>) -> Self {
        Self {
            source,
            concurrency: 4,
            max_pages: None,
        }
    }

    /// Bound on concurrent channel traversals. The transport's own
    /// backoff handles the platform rate limit; the pool just keeps the
    /// number of in-flight requests small enough not to trip it.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Optional per-channel history depth cap, in pages. Default is
    /// unbounded.
    pub fn with_max_pages(mut self, max_pages: Option<usize>) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// Run the whole extraction and return records oldest-first plus a
    /// summary.
    ///
    /// Resolving the target author is the one fatal precondition; every
    /// per-channel failure after that is contained and logged.
    ///
    /// Ordering: per-channel record lists (newest-first) are concatenated
    /// in channel-enumeration order and the whole concatenation is
    /// reversed. Each channel's block therefore comes out oldest-first,
    /// with the last-enumerated channel's block first; records are NOT
    /// interleaved by timestamp across channels.
    pub async fn run(
        &self,
        author_id: &str,
        mode: ExportMode,
    ) -> Result<(Vec<ExportRecord>, HarvestSummary)> {
        let author = self
            .source
            .resolve_author(author_id)
            .await
            .with_context(|| format!("cannot resolve target author {}", author_id))?;
        let ctx = RunContext {
            author_id: author.id,
            author_name: author.display_name,
            mode,
        };

        let channels = self
            .source
            .list_channels()
            .await
            .context("failed to enumerate channels")?;
        info!(
            "Harvesting {} channels for {} ({})",
            channels.len(),
            ctx.author_name,
            ctx.author_id
        );

        let builder = Arc::new(RecordBuilder::new(&ctx));
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for (index, channel) in channels.into_iter().enumerate() {
            let source = Arc::clone(&self.source);
            let builder = Arc::clone(&builder);
            let semaphore = Arc::clone(&semaphore);
            let author_id = ctx.author_id.clone();
            let max_pages = self.max_pages;
            tasks.spawn(async move {
                // The permit spans the whole traversal: one in-flight
                // history request per channel, at most `concurrency`
                // channels at a time.
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                let result =
                    harvest_channel(source.as_ref(), builder.as_ref(), &channel, &author_id, max_pages)
                        .await;
                (index, result)
            });
        }

        // Re-assemble in channel-enumeration order regardless of task
        // completion order.
        let mut results: Vec<Option<HarvestResult>> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (index, result) = joined.context("harvest task panicked")?;
            if results.len() <= index {
                results.resize_with(index + 1, || None);
            }
            results[index] = Some(result);
        }

        let mut summary = HarvestSummary {
            author_name: ctx.author_name.clone(),
            ..HarvestSummary::default()
        };
        let mut aggregate: Vec<ExportRecord> = Vec::new();
        for result in results.into_iter().flatten() {
            summary.channels_scanned += 1;
            match &result.outcome {
                ChannelOutcome::Complete => {}
                ChannelOutcome::PermissionDenied => {
                    summary.channels_denied += 1;
                    warn!("No access to channel #{}", result.channel_name);
                }
                ChannelOutcome::TransportError(reason) => {
                    summary.channels_failed += 1;
                    warn!("Error in channel #{}: {}", result.channel_name, reason);
                }
            }
            aggregate.extend(result.records);
        }

        // The transport yields newest-first; the export contract is
        // oldest-first. The whole concatenation is reversed, not each
        // channel on its own.
        aggregate.reverse();
        summary.records = aggregate.len();

        info!(
            "Harvest complete: {} records from {} channels ({} denied, {} failed)",
            summary.records, summary.channels_scanned, summary.channels_denied, summary.channels_failed
        );

        Ok((aggregate, summary))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::source::HistoryPage;
    use crate::{Author, RawMessage};

    enum Scripted {
        Page(HistoryPage),
        Fail(&'static str),
    }

    /// Test double supplying a fixed set of synthetic pages per channel.
    struct ScriptedSource {
        author: Option<Author>,
        channels: Vec<Channel>,
        pages: Mutex<HashMap<String, VecDeque<Scripted>>>,
    }

    impl ScriptedSource {
        fn new(channels: Vec<Channel>) -> Self {
            Self {
                author: Some(Author {
                    id: "42".to_string(),
                    display_name: "Ada".to_string(),
                }),
                channels,
                pages: Mutex::new(HashMap::new()),
            }
        }

        fn script(mut self, channel_id: &str, script: Vec<Scripted>) -> Self {
            self.pages
                .get_mut()
                .unwrap()
                .insert(channel_id.to_string(), script.into());
            self
        }

        fn without_author(mut self) -> Self {
            self.author = None;
            self
        }

        fn remaining_pages(&self, channel_id: &str) -> usize {
            self.pages
                .lock()
                .unwrap()
                .get(channel_id)
                .map(|q| q.len())
                .unwrap_or(0)
        }
    }

    #[async_trait]
    impl MessageSource for ScriptedSource {
        async fn resolve_author(&self, author_id: &str) -> anyhow::Result<Author> {
            self.author
                .clone()
                .ok_or_else(|| anyhow!("unknown user {}", author_id))
        }

        async fn list_channels(&self) -> anyhow::Result<Vec<Channel>> {
            Ok(self.channels.clone())
        }

        async fn history_page(
            &self,
            channel_id: &str,
            _cursor: Option<&str>,
        ) -> anyhow::Result<HistoryPage> {
            let next = self
                .pages
                .lock()
                .unwrap()
                .get_mut(channel_id)
                .and_then(|q| q.pop_front());
            match next {
                Some(Scripted::Page(page)) => Ok(page),
                Some(Scripted::Fail(reason)) => Err(anyhow!(reason)),
                None => Ok(HistoryPage::default()),
            }
        }
    }

    fn channel(id: &str, readable: bool) -> Channel {
        Channel {
            id: id.to_string(),
            name: format!("chan-{}", id),
            readable,
        }
    }

    fn msg(content: &str) -> RawMessage {
        RawMessage {
            author_id: "42".to_string(),
            author_name: "Ada".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            content: content.to_string(),
            attachments: Vec::new(),
        }
    }

    fn other_msg(content: &str) -> RawMessage {
        RawMessage {
            author_id: "99".to_string(),
            ..msg(content)
        }
    }

    fn page(messages: Vec<RawMessage>, next_cursor: Option<&str>) -> Scripted {
        Scripted::Page(HistoryPage {
            messages,
            next_cursor: next_cursor.map(|c| c.to_string()),
        })
    }

    fn completions(records: &[ExportRecord]) -> Vec<String> {
        records
            .iter()
            .map(|r| match r {
                ExportRecord::Training(pair) => pair.completion.clone(),
                other => panic!("expected training record, got {:?}", other),
            })
            .collect()
    }

    #[tokio::test]
    async fn reverses_the_whole_concatenation_not_each_channel() {
        // Channel A newest-first [A3, A2, A1], channel B [B2, B1].
        let source = ScriptedSource::new(vec![channel("A", true), channel("B", true)])
            .script("A", vec![page(vec![msg("A3"), msg("A2"), msg("A1")], None)])
            .script("B", vec![page(vec![msg("B2"), msg("B1")], None)]);

        let harvester = Harvester::new(Arc::new(source));
        let (records, summary) = harvester.run("42", ExportMode::Training).await.unwrap();

        assert_eq!(completions(&records), vec!["B1", "B2", "A1", "A2", "A3"]);
        assert_eq!(summary.records, 5);
        assert_eq!(summary.channels_scanned, 2);
    }

    #[tokio::test]
    async fn filters_by_author_across_pages() {
        let source = ScriptedSource::new(vec![channel("A", true)]).script(
            "A",
            vec![
                page(vec![msg("mine-2"), other_msg("theirs")], Some("c1")),
                page(vec![msg("mine-1")], None),
            ],
        );

        let harvester = Harvester::new(Arc::new(source));
        let (records, _) = harvester.run("42", ExportMode::Training).await.unwrap();

        assert_eq!(completions(&records), vec!["mine-1", "mine-2"]);
    }

    #[tokio::test]
    async fn unreadable_channel_contributes_nothing() {
        let source = ScriptedSource::new(vec![channel("locked", false), channel("open", true)])
            .script("locked", vec![page(vec![msg("hidden")], None)])
            .script("open", vec![page(vec![msg("visible")], None)]);

        let harvester = Harvester::new(Arc::new(source));
        let (records, summary) = harvester.run("42", ExportMode::Training).await.unwrap();

        assert_eq!(completions(&records), vec!["visible"]);
        assert_eq!(summary.channels_denied, 1);
        assert_eq!(summary.channels_scanned, 2);
    }

    #[tokio::test]
    async fn permission_denied_skips_fetching() {
        let source = Arc::new(
            ScriptedSource::new(vec![channel("locked", false)])
                .script("locked", vec![page(vec![msg("hidden")], None)]),
        );
        let builder = RecordBuilder::new(&RunContext {
            author_id: "42".to_string(),
            author_name: "Ada".to_string(),
            mode: ExportMode::Training,
        });

        let result =
            harvest_channel(source.as_ref(), &builder, &channel("locked", false), "42", None).await;

        assert_eq!(result.outcome, ChannelOutcome::PermissionDenied);
        assert!(result.records.is_empty());
        assert_eq!(source.remaining_pages("locked"), 1);
    }

    #[tokio::test]
    async fn transport_error_keeps_earlier_records() {
        let source = ScriptedSource::new(vec![channel("flaky", true), channel("solid", true)])
            .script(
                "flaky",
                vec![
                    page(vec![msg("before-2"), msg("before-1")], Some("c1")),
                    Scripted::Fail("connection reset"),
                ],
            )
            .script("solid", vec![page(vec![msg("fine")], None)]);

        let harvester = Harvester::new(Arc::new(source));
        let (records, summary) = harvester.run("42", ExportMode::Training).await.unwrap();

        // Both of flaky's collected records survive, solid is unaffected.
        assert_eq!(completions(&records), vec!["fine", "before-1", "before-2"]);
        assert_eq!(summary.channels_failed, 1);
        assert_eq!(summary.channels_scanned, 2);
    }

    #[tokio::test]
    async fn transport_error_outcome_carries_reason() {
        let source = Arc::new(
            ScriptedSource::new(vec![channel("flaky", true)])
                .script("flaky", vec![Scripted::Fail("boom")]),
        );
        let builder = RecordBuilder::new(&RunContext {
            author_id: "42".to_string(),
            author_name: "Ada".to_string(),
            mode: ExportMode::Training,
        });

        let result =
            harvest_channel(source.as_ref(), &builder, &channel("flaky", true), "42", None).await;

        assert_eq!(result.outcome, ChannelOutcome::TransportError("boom".to_string()));
    }

    #[tokio::test]
    async fn page_cap_bounds_history_depth() {
        let source = ScriptedSource::new(vec![channel("deep", true)]).script(
            "deep",
            vec![
                page(vec![msg("p1")], Some("c1")),
                page(vec![msg("p2")], Some("c2")),
                page(vec![msg("p3")], None),
            ],
        );

        let harvester = Harvester::new(Arc::new(source)).with_max_pages(Some(2));
        let (records, _) = harvester.run("42", ExportMode::Training).await.unwrap();

        assert_eq!(completions(&records), vec!["p2", "p1"]);
    }

    #[tokio::test]
    async fn unresolvable_author_aborts_the_run() {
        let source = ScriptedSource::new(vec![channel("A", true)]).without_author();
        let harvester = Harvester::new(Arc::new(source));

        let err = harvester.run("42", ExportMode::Training).await.unwrap_err();
        assert!(err.to_string().contains("cannot resolve target author"));
    }

    #[tokio::test]
    async fn end_to_end_training_scenario() {
        // Author has 2 messages in X ("hello <url>" then later "bye") and
        // 1 in Y ("only <url> here"); pages arrive newest-first.
        let source = ScriptedSource::new(vec![channel("X", true), channel("Y", true)])
            .script(
                "X",
                vec![page(vec![msg("bye"), msg("hello https://x.com/a")], None)],
            )
            .script("Y", vec![page(vec![msg("only https://y.com/b here")], None)]);

        let harvester = Harvester::new(Arc::new(source));
        let (records, summary) = harvester.run("42", ExportMode::Training).await.unwrap();

        assert_eq!(completions(&records), vec!["only here", "hello", "bye"]);
        assert_eq!(summary.records, 3);
        for record in &records {
            if let ExportRecord::Training(pair) = record {
                assert!(pair.prompt.contains("Ada"));
                assert!(!pair.completion.contains("http"));
            }
        }
    }
}
