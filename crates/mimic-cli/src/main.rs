use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use mimic_core::ExportMode;

mod commands;
mod ui;

#[derive(Parser)]
#[command(name = "mimic")]
#[command(about = "Turn one author's chat history into a training corpus.")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest the target author's messages and write the corpus
    Harvest {
        /// Guild (workspace) id. Falls back to MIMIC_GUILD_ID.
        #[arg(long, value_name = "ID")]
        guild: Option<String>,

        /// Target author's user id. Falls back to MIMIC_AUTHOR_ID.
        #[arg(long, value_name = "ID")]
        author: Option<String>,

        /// Output file. Defaults to corpus.jsonl (training) or
        /// messages.txt (transcript).
        #[arg(long, short, value_name = "PATH")]
        output: Option<PathBuf>,

        /// Output schema
        #[arg(long, value_enum, default_value = "training")]
        mode: Mode,

        /// Concurrent channel traversals
        #[arg(long, default_value_t = 4, value_name = "N")]
        concurrency: usize,

        /// Cap history depth per channel, in pages of 100 messages.
        /// Unbounded when omitted.
        #[arg(long, value_name = "N")]
        max_pages: Option<usize>,
    },

    /// List the guild's text channels and whether they are readable
    Channels {
        /// Guild (workspace) id. Falls back to MIMIC_GUILD_ID.
        #[arg(long, value_name = "ID")]
        guild: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Transcript,
    Training,
}

impl From<Mode> for ExportMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Transcript => ExportMode::Transcript,
            Mode::Training => ExportMode::Training,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for debug logs (hidden by default)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Harvest {
            guild,
            author,
            output,
            mode,
            concurrency,
            max_pages,
        } => {
            commands::harvest::run(commands::harvest::HarvestArgs {
                guild: commands::required(guild, "MIMIC_GUILD_ID", "guild id")?,
                author: commands::required(author, "MIMIC_AUTHOR_ID", "author id")?,
                output,
                mode: mode.into(),
                concurrency,
                max_pages,
            })
            .await
        }
        Commands::Channels { guild, json } => {
            commands::channels::run(commands::required(guild, "MIMIC_GUILD_ID", "guild id")?, json)
                .await
        }
    }
}
