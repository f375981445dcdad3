//! RAG (Retrieval-Augmented Generation) module for grounded question answering.

pub mod chunker;
pub mod embedding;
pub mod grounder;
pub mod images;
pub mod index;
mod models;
pub mod pipeline;

pub use embedding::{EmbeddingError, EmbeddingRegistry, CHUNK_NAMESPACE, IMAGE_NAMESPACE};
pub use images::{CatalogStore, ImageError, TopicCatalog};
pub use index::{distance_to_similarity, FlatL2Index, IndexStore, VectorIndexError};
pub use models::{
    Chunk, ImageCatalogEntry, ImageReference, IndexStats, RankedChunk, RankedImage,
    RetrievalResult,
};
pub use pipeline::{IngestError, QueryError, RagPipeline};
