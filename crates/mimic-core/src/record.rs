use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::sanitize::{is_meaningful, Sanitizer};
use crate::RawMessage;

/// Output schema selector. One pipeline, two serializations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportMode {
    /// Raw per-message lines with timestamps, content unsanitized.
    Transcript,
    /// Sanitized prompt/completion pairs for fine-tuning corpora.
    Training,
}

/// Immutable per-run values the builder depends on. Resolved once before
/// any harvesting starts; the prompt template in training mode is derived
/// from the author's display name and never changes mid-run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub author_id: String,
    pub author_name: String,
    pub mode: ExportMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportRecord {
    Transcript {
        timestamp: DateTime<Utc>,
        author: String,
        content: String,
        attachments: Vec<String>,
    },
    Training(TrainingPair),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrainingPair {
    pub prompt: String,
    pub completion: String,
}

/// Converts one kept message into an exportable record.
pub struct RecordBuilder {
    mode: ExportMode,
    prompt: String,
    sanitizer: Sanitizer,
}

impl RecordBuilder {
    pub fn new(ctx: &RunContext) -> Self {
        Self {
            mode: ctx.mode,
            prompt: prompt_template(&ctx.author_name),
            sanitizer: Sanitizer::new(),
        }
    }

    /// Build a record, or drop the message when nothing meaningful
    /// survives sanitization of content + appended attachment URLs.
    pub fn build(&self, msg: &RawMessage) -> Option<ExportRecord> {
        let mut composed = msg.content.clone();
        if !msg.attachments.is_empty() {
            composed.push_str("\nAttachments: ");
            composed.push_str(&msg.attachments.join(", "));
        }

        let sanitized = self.sanitizer.sanitize(&composed);
        if !is_meaningful(&sanitized) {
            return None;
        }

        Some(match self.mode {
            // Transcript lines reproduce the message as posted; the
            // sanitized form only decides whether the line exists at all.
            ExportMode::Transcript => ExportRecord::Transcript {
                timestamp: msg.timestamp,
                author: msg.author_name.clone(),
                content: msg.content.clone(),
                attachments: msg.attachments.clone(),
            },
            ExportMode::Training => ExportRecord::Training(TrainingPair {
                prompt: self.prompt.clone(),
                completion: sanitized,
            }),
        })
    }
}

fn prompt_template(author_name: &str) -> String {
    format!(
        "You are {name}. Write a chat message the way {name} would: same voice, same tone, same quirks.",
        name = author_name
    )
}
