//! Data models for RAG operations.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A chunk of document text, produced once per topic at ingestion time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique identifier for this chunk
    pub id: Uuid,
    /// Position of this chunk within the topic (for ordering)
    pub sequence_index: usize,
    /// The text content of the chunk
    pub text: String,
    /// Number of whitespace-separated words in `text`
    pub word_count: usize,
    /// Word position where this chunk starts in the source document
    pub start_offset: usize,
    /// Word position one past the end of this chunk
    pub end_offset: usize,
}

impl Chunk {
    /// Create a new chunk with a generated ID.
    pub fn new(sequence_index: usize, text: String, start_offset: usize, end_offset: usize) -> Self {
        let word_count = text.split_whitespace().count();
        Self {
            id: Uuid::new_v4(),
            sequence_index,
            text,
            word_count,
            start_offset,
            end_offset,
        }
    }
}

/// A chunk returned from a nearest-neighbor search, with its rank data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedChunk {
    pub chunk: Chunk,
    /// Squared L2 distance to the query vector
    pub distance: f32,
    /// `1 / (1 + distance)`, in (0, 1]
    pub similarity: f32,
}

/// One diagram in a topic's image catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageCatalogEntry {
    pub id: String,
    pub filename: String,
    pub title: String,
    pub keywords: Vec<String>,
    pub description: String,
}

impl ImageCatalogEntry {
    /// Text submitted to the image namespace when embedding this entry.
    pub fn embedding_text(&self) -> String {
        format!(
            "{}. {}. Keywords: {}",
            self.title,
            self.description,
            self.keywords.join(", ")
        )
    }
}

/// A catalog entry scored against a query. The score is never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedImage {
    pub entry: ImageCatalogEntry,
    /// Cosine similarity to the query
    pub similarity: f32,
}

/// Reference to the diagram selected for an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageReference {
    pub image_id: String,
    pub filename: String,
    pub title: String,
    pub similarity: f32,
}

impl From<RankedImage> for ImageReference {
    fn from(ranked: RankedImage) -> Self {
        Self {
            image_id: ranked.entry.id,
            filename: ranked.entry.filename,
            title: ranked.entry.title,
            similarity: ranked.similarity,
        }
    }
}

/// The unit returned to the caller for one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalResult {
    /// Grounded answer text
    pub answer: String,
    /// Matched chunk texts, best match first
    pub relevant_chunks: Vec<String>,
    /// Selected diagram, if one cleared the similarity threshold
    pub image: Option<ImageReference>,
}

/// Statistics about a persisted topic index.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub topic_id: String,
    pub total_chunks: usize,
    pub dimension: usize,
    pub created_at: chrono::DateTime<chrono::Utc>,
}
