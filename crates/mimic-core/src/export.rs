//! Serialization of the ordered record sequence to the output file.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::record::ExportRecord;

/// Write one record per line in the given order, truncating any prior
/// content at `path`. Returns the number of records written. Failure to
/// open or write the destination is fatal to the run.
pub fn export_records(records: &[ExportRecord], path: &Path) -> Result<usize> {
    let file = File::create(path)
        .with_context(|| format!("cannot open output file {}", path.display()))?;
    let mut out = BufWriter::new(file);

    for record in records {
        match record {
            ExportRecord::Transcript {
                timestamp,
                author,
                content,
                attachments,
            } => {
                writeln!(out, "{} - {}: {}", timestamp.to_rfc3339(), author, content)?;
                if !attachments.is_empty() {
                    writeln!(out, "Attachments: {}", attachments.join(", "))?;
                }
            }
            ExportRecord::Training(pair) => {
                writeln!(out, "{}", serde_json::to_string(pair)?)?;
            }
        }
    }

    out.flush()
        .with_context(|| format!("failed writing {}", path.display()))?;
    Ok(records.len())
}
