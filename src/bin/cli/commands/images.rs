use anyhow::{Context, Result};

use crate::app::{exit_not_found, App};
use crate::OutputFormat;

pub fn run(app: &App, topic: &str, format: &OutputFormat) -> Result<()> {
    if !app
        .pipeline
        .list_indexed_topics()?
        .iter()
        .any(|t| t == topic)
    {
        exit_not_found(&format!("No document has been ingested for topic '{}'.", topic));
    }

    let images = app
        .pipeline
        .topic_images(topic)
        .with_context(|| format!("Failed to load images for topic {}", topic))?;

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "topicId": topic,
                "images": images,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            let title_w = images.iter().map(|i| i.title.len()).max().unwrap_or(5).max(5);
            println!("{:<8} {:<title_w$} {}", "Id", "Title", "File", title_w = title_w);
            println!(
                "{} {} {}",
                "\u{2500}".repeat(8),
                "\u{2500}".repeat(title_w),
                "\u{2500}".repeat(20)
            );
            for image in &images {
                println!(
                    "{:<8} {:<title_w$} {}",
                    image.id,
                    image.title,
                    image.filename,
                    title_w = title_w
                );
            }
        }
    }

    Ok(())
}
