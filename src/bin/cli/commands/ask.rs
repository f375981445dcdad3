use anyhow::Result;

use tutor_lib::rag::QueryError;

use crate::app::{exit_not_found, App};
use crate::OutputFormat;

pub fn run(app: &App, topic: &str, question: &str, format: &OutputFormat) -> Result<()> {
    let result = match app.pipeline.query(topic, question) {
        Ok(result) => result,
        Err(QueryError::TopicNotIndexed(topic)) => {
            exit_not_found(&format!("No document has been ingested for topic '{}'.", topic))
        }
        Err(e) => return Err(e.into()),
    };

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        OutputFormat::Plain => {
            println!("{}", result.answer);
            if let Some(image) = &result.image {
                println!("\nDiagram: {} ({}, score {:.2})", image.title, image.filename, image.similarity);
            }
            println!("\n{} chunks used", result.relevant_chunks.len());
        }
    }

    Ok(())
}
