use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use mimic_core::{export_records, DiscordSource, ExportMode, Harvester};

use crate::ui;

pub struct HarvestArgs {
    pub guild: String,
    pub author: String,
    pub output: Option<PathBuf>,
    pub mode: ExportMode,
    pub concurrency: usize,
    pub max_pages: Option<usize>,
}

pub async fn run(args: HarvestArgs) -> Result<()> {
    let token = super::token()?;
    let output = args.output.unwrap_or_else(|| default_output(args.mode));

    let source = Arc::new(DiscordSource::new(token, args.guild)?);
    let harvester = Harvester::new(source)
        .with_concurrency(args.concurrency)
        .with_max_pages(args.max_pages);

    let spinner = ui::spinner("Harvesting channels");
    let (records, summary) = match harvester.run(&args.author, args.mode).await {
        Ok(outcome) => {
            spinner.finish_and_clear();
            outcome
        }
        Err(e) => {
            spinner.abandon_with_message("Failed");
            return Err(e);
        }
    };

    let written = export_records(&records, &output)?;

    ui::success(&format!(
        "Exported {} messages by {} to {}",
        written,
        summary.author_name,
        output.display()
    ));
    if summary.channels_denied > 0 {
        ui::info(&format!(
            "{} of {} channels skipped (no read access)",
            summary.channels_denied, summary.channels_scanned
        ));
    }
    if summary.channels_failed > 0 {
        ui::info(&format!(
            "{} channels ended early on transport errors",
            summary.channels_failed
        ));
    }

    Ok(())
}

fn default_output(mode: ExportMode) -> PathBuf {
    match mode {
        ExportMode::Transcript => PathBuf::from("messages.txt"),
        ExportMode::Training => PathBuf::from("corpus.jsonl"),
    }
}
