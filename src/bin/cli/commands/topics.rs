use anyhow::{Context, Result};

use crate::app::App;
use crate::OutputFormat;

pub fn run(app: &App, format: &OutputFormat) -> Result<()> {
    let topics = app
        .pipeline
        .list_indexed_topics()
        .context("Failed to list topics")?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&topics)?);
        }
        OutputFormat::Plain => {
            if topics.is_empty() {
                println!("No topics ingested yet.");
                return Ok(());
            }
            for topic in &topics {
                println!("{}", topic);
            }
            println!("\n{} topics", topics.len());
        }
    }

    Ok(())
}
