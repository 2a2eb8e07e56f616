use chrono::{DateTime, Utc};

pub mod discord;
pub mod export;
pub mod harvest;
pub mod record;
pub mod sanitize;
pub mod source;

pub use discord::DiscordSource;
pub use export::export_records;
pub use harvest::{ChannelOutcome, HarvestResult, HarvestSummary, Harvester};
pub use record::{ExportMode, ExportRecord, RecordBuilder, RunContext, TrainingPair};
pub use sanitize::{is_meaningful, Sanitizer};
pub use source::{HistoryPage, MessageSource};

/// A workspace channel, enumerated once per run.
///
/// `readable` is computed from the bot's own membership; unreadable
/// channels are skipped rather than fetched-and-failed.
#[derive(Debug, Clone)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub readable: bool,
}

/// One message as the transport returned it. Read-only to the pipeline.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub author_id: String,
    pub author_name: String,
    pub timestamp: DateTime<Utc>,
    pub content: String,
    pub attachments: Vec<String>,
}

/// The target author, resolved before harvesting starts.
#[derive(Debug, Clone)]
pub struct Author {
    pub id: String,
    pub display_name: String,
}
