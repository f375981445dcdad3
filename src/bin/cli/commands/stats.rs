use anyhow::Result;

use tutor_lib::rag::VectorIndexError;

use crate::app::{exit_not_found, App};
use crate::OutputFormat;

pub fn run(app: &App, topic: &str, format: &OutputFormat) -> Result<()> {
    let stats = match app.pipeline.index_stats(topic) {
        Ok(stats) => stats,
        Err(VectorIndexError::TopicNotIndexed(_)) | Err(VectorIndexError::InvalidTopic(_)) => {
            exit_not_found(&format!("No document has been ingested for topic '{}'.", topic))
        }
        Err(e) => return Err(e.into()),
    };

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        OutputFormat::Plain => {
            println!("Topic:      {}", stats.topic_id);
            println!("Chunks:     {}", stats.total_chunks);
            println!("Dimension:  {}", stats.dimension);
            println!("Created:    {}", stats.created_at.format("%Y-%m-%d %H:%M"));
        }
    }

    Ok(())
}
