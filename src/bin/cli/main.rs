mod app;
mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tutor-cli", about = "Ask questions about ingested documents", version)]
struct Cli {
    /// Path to a TOML config file (default: $RAG_TUTOR_CONFIG or built-in defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, default_value = "plain")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Plain,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a plain-text document as a new topic
    Ingest {
        /// Text file to ingest (use "-" to read from stdin)
        file: PathBuf,
        /// Topic identifier (defaults to a fresh UUID)
        #[arg(long)]
        topic: Option<String>,
    },

    /// Ask a question about an ingested topic
    Ask {
        /// Topic identifier
        topic: String,
        /// Question text
        question: String,
    },

    /// List topics with a persisted index
    Topics,

    /// List the diagram catalog for a topic
    Images {
        /// Topic identifier
        topic: String,
    },

    /// Show index statistics for a topic
    Stats {
        /// Topic identifier
        topic: String,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let app = app::App::new(cli.config.as_deref())?;

    match cli.command {
        Command::Ingest { file, topic } => {
            commands::ingest::run(&app, &file, topic, &cli.format)?;
        }
        Command::Ask { topic, question } => {
            commands::ask::run(&app, &topic, &question, &cli.format)?;
        }
        Command::Topics => {
            commands::topics::run(&app, &cli.format)?;
        }
        Command::Images { topic } => {
            commands::images::run(&app, &topic, &cli.format)?;
        }
        Command::Stats { topic } => {
            commands::stats::run(&app, &topic, &cli.format)?;
        }
    }

    Ok(())
}
