use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::app::App;
use crate::OutputFormat;

pub fn run(app: &App, file: &Path, topic: Option<String>, format: &OutputFormat) -> Result<()> {
    let text = if file == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        buf
    } else {
        std::fs::read_to_string(file).with_context(|| format!("Failed to read {:?}", file))?
    };

    let topic = topic.unwrap_or_else(|| Uuid::new_v4().to_string());
    let index = app
        .pipeline
        .ingest_document(&topic, &text)
        .with_context(|| format!("Failed to ingest {:?}", file))?;

    // Diagrams are prepared up front so the first question doesn't pay for it
    let images_ready = app.pipeline.ensure_image_catalog(&topic);

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "topicId": topic,
                "chunksProcessed": index.len(),
                "dimension": index.dimension(),
                "imagesReady": images_ready,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            println!("Ingested {} chunks into topic {}", index.len(), topic);
            if !images_ready {
                println!("Warning: diagram catalog could not be prepared");
            }
        }
    }

    Ok(())
}
