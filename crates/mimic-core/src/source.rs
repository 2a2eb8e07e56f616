//! Transport seam between the pipeline and the remote workspace.
//!
//! The harvester only ever sees this trait; tests script synthetic pages
//! against it, and `discord` provides the real REST implementation.

use anyhow::Result;
use async_trait::async_trait;

use crate::{Author, Channel, RawMessage};

/// One batch of a channel's history, newest-first within the page.
/// `next_cursor` is `None` once the history is exhausted.
#[derive(Debug, Clone, Default)]
pub struct HistoryPage {
    pub messages: Vec<RawMessage>,
    pub next_cursor: Option<String>,
}

/// What the pipeline needs from a workspace: author resolution, channel
/// enumeration with readable flags, and cursor-paginated history.
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn resolve_author(&self, author_id: &str) -> Result<Author>;

    async fn list_channels(&self) -> Result<Vec<Channel>>;

    /// Fetch one newest-first page of a channel's history. `cursor` is the
    /// value returned by the previous page, `None` for the most recent.
    async fn history_page(&self, channel_id: &str, cursor: Option<&str>) -> Result<HistoryPage>;
}
