//! Document question answering: topic indexes, grounded answers and diagram
//! matching over previously ingested text.

pub mod config;
pub mod rag;

pub use config::{ConfigError, TutorConfig};
pub use rag::{QueryError, RagPipeline, RetrievalResult};
