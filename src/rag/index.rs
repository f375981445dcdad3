//! Exact L2 vector index for one topic, with file persistence.
//!
//! Each topic persists two coupled artifacts: a binary payload holding the
//! vectors and a JSON sidecar holding the ordered chunk records. They are
//! always written and loaded together.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::embedding::write_atomic;
use super::models::{Chunk, IndexStats, RankedChunk};

/// Leading bytes of every index payload.
const PAYLOAD_MAGIC: &[u8; 4] = b"FLL2";

/// Payload layout version.
const PAYLOAD_VERSION: u32 = 1;

/// Magic + version + dimension + count.
const PAYLOAD_HEADER_LEN: usize = 16;

const INDEX_TYPE: &str = "FlatL2";

const PAYLOAD_EXTENSION: &str = "flatl2";

#[derive(Error, Debug)]
pub enum VectorIndexError {
    #[error("No embeddings provided")]
    EmptyInput,

    #[error("Embedding count ({embeddings}) doesn't match chunk count ({chunks})")]
    LengthMismatch { embeddings: usize, chunks: usize },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embeddings have zero dimensions")]
    ZeroDimension,

    #[error("Index for topic {0} was built with a different vocabulary; re-ingest it")]
    VocabularyMismatch(String),

    #[error("No index found for topic: {0}")]
    TopicNotIndexed(String),

    #[error("Invalid topic identifier: {0:?}")]
    InvalidTopic(String),

    #[error("Index corrupted: {0}")]
    Corruption(String),

    #[error("IO error: {0}")]
    Persistence(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, VectorIndexError>;

/// Map a squared L2 distance to a similarity in (0, 1].
pub fn distance_to_similarity(distance: f32) -> f32 {
    1.0 / (1.0 + distance)
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Reject identifiers that could escape the artifact directories.
pub(crate) fn validate_topic(topic_id: &str) -> Result<()> {
    let valid = !topic_id.is_empty()
        && topic_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(VectorIndexError::InvalidTopic(topic_id.to_string()))
    }
}

/// Brute-force nearest-neighbor index over one topic's chunk embeddings.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatL2Index {
    topic_id: String,
    dimension: usize,
    /// Row-major, `chunks.len() * dimension` values
    vectors: Vec<f32>,
    chunks: Vec<Chunk>,
    created_at: DateTime<Utc>,
    /// Vocabulary that produced the vectors, when known
    vocabulary_fingerprint: Option<String>,
}

impl FlatL2Index {
    /// Build an index. The first vector fixes the dimension for all others.
    pub fn build(topic_id: &str, embeddings: &[Vec<f32>], chunks: Vec<Chunk>) -> Result<Self> {
        if embeddings.is_empty() {
            return Err(VectorIndexError::EmptyInput);
        }
        if embeddings.len() != chunks.len() {
            return Err(VectorIndexError::LengthMismatch {
                embeddings: embeddings.len(),
                chunks: chunks.len(),
            });
        }

        let dimension = embeddings[0].len();
        if dimension == 0 {
            return Err(VectorIndexError::ZeroDimension);
        }
        let mut vectors = Vec::with_capacity(dimension * embeddings.len());
        for embedding in embeddings {
            if embedding.len() != dimension {
                return Err(VectorIndexError::DimensionMismatch {
                    expected: dimension,
                    actual: embedding.len(),
                });
            }
            vectors.extend_from_slice(embedding);
        }

        log::info!(
            "Built {} index for topic {} ({} chunks, dimension {})",
            INDEX_TYPE,
            topic_id,
            chunks.len(),
            dimension
        );

        Ok(Self {
            topic_id: topic_id.to_string(),
            dimension,
            vectors,
            chunks,
            created_at: Utc::now(),
            vocabulary_fingerprint: None,
        })
    }

    /// Record which vocabulary produced the index vectors.
    pub fn with_vocabulary_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.vocabulary_fingerprint = Some(fingerprint.into());
        self
    }

    pub fn vocabulary_fingerprint(&self) -> Option<&str> {
        self.vocabulary_fingerprint.as_deref()
    }

    /// Fail unless query vectors from `fingerprint` are comparable with this index.
    pub fn check_vocabulary(&self, fingerprint: &str) -> Result<()> {
        match &self.vocabulary_fingerprint {
            Some(own) if own != fingerprint => {
                Err(VectorIndexError::VocabularyMismatch(self.topic_id.clone()))
            }
            _ => Ok(()),
        }
    }

    pub fn topic_id(&self) -> &str {
        &self.topic_id
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Return the `k` nearest chunks, ranked by ascending squared L2 distance.
    ///
    /// Asking for more results than the index holds returns everything.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<RankedChunk>> {
        if query.len() != self.dimension {
            return Err(VectorIndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .chunks_exact(self.dimension)
            .take(self.chunks.len())
            .map(|row| squared_l2(query, row))
            .enumerate()
            .collect();

        // Stable sort keeps insertion order on ties
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(position, distance)| RankedChunk {
                chunk: self.chunks[position].clone(),
                distance,
                similarity: distance_to_similarity(distance),
            })
            .collect())
    }

    fn payload_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(PAYLOAD_HEADER_LEN + self.vectors.len() * 4);
        bytes.extend_from_slice(PAYLOAD_MAGIC);
        bytes.extend_from_slice(&PAYLOAD_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.chunks.len() as u32).to_le_bytes());
        bytes.extend(self.vectors.iter().flat_map(|f| f.to_le_bytes()));
        bytes
    }
}

/// Decoded payload: dimension, count, vectors.
fn parse_payload(bytes: &[u8]) -> Result<(usize, usize, Vec<f32>)> {
    if bytes.len() < PAYLOAD_HEADER_LEN || &bytes[..4] != PAYLOAD_MAGIC {
        return Err(VectorIndexError::Corruption(
            "payload is not a FlatL2 index".to_string(),
        ));
    }

    let read_u32 = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
    let version = read_u32(4);
    if version != PAYLOAD_VERSION {
        return Err(VectorIndexError::Corruption(format!(
            "unsupported payload version {}",
            version
        )));
    }
    let dimension = read_u32(8) as usize;
    let count = read_u32(12) as usize;

    let body = &bytes[PAYLOAD_HEADER_LEN..];
    let expected = dimension
        .checked_mul(count)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| VectorIndexError::Corruption("payload header overflows".to_string()))?;
    if body.len() != expected {
        return Err(VectorIndexError::Corruption(format!(
            "payload holds {} bytes, header declares {}",
            body.len(),
            expected
        )));
    }

    let vectors = body
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    Ok((dimension, count, vectors))
}

/// Metadata sidecar written next to each index payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexMetadata {
    topic_id: String,
    chunks: Vec<Chunk>,
    index_type: String,
    total_chunks: usize,
    dimension: usize,
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    vocabulary_fingerprint: Option<String>,
}

/// Reads and writes topic indexes under one directory.
#[derive(Debug, Clone)]
pub struct IndexStore {
    base_path: PathBuf,
}

impl IndexStore {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn payload_path(&self, topic_id: &str) -> PathBuf {
        self.base_path
            .join(format!("{}.{}", topic_id, PAYLOAD_EXTENSION))
    }

    fn metadata_path(&self, topic_id: &str) -> PathBuf {
        self.base_path.join(format!("{}_metadata.json", topic_id))
    }

    /// Both artifacts are present for the topic.
    pub fn exists(&self, topic_id: &str) -> bool {
        validate_topic(topic_id).is_ok()
            && self.payload_path(topic_id).exists()
            && self.metadata_path(topic_id).exists()
    }

    /// Write the payload and sidecar for an index, replacing earlier ones.
    pub fn persist(&self, index: &FlatL2Index) -> Result<()> {
        validate_topic(&index.topic_id)?;
        fs::create_dir_all(&self.base_path)?;

        let metadata = IndexMetadata {
            topic_id: index.topic_id.clone(),
            chunks: index.chunks.clone(),
            index_type: INDEX_TYPE.to_string(),
            total_chunks: index.chunks.len(),
            dimension: index.dimension,
            created_at: index.created_at,
            vocabulary_fingerprint: index.vocabulary_fingerprint.clone(),
        };
        let metadata_json = serde_json::to_string_pretty(&metadata)?;

        write_atomic(&self.payload_path(&index.topic_id), &index.payload_bytes())?;
        write_atomic(&self.metadata_path(&index.topic_id), metadata_json.as_bytes())?;

        log::info!("Saved index and metadata for topic {}", index.topic_id);
        Ok(())
    }

    fn read_metadata(&self, topic_id: &str) -> Result<IndexMetadata> {
        validate_topic(topic_id)?;
        if !self.exists(topic_id) {
            return Err(VectorIndexError::TopicNotIndexed(topic_id.to_string()));
        }

        let metadata_json = fs::read_to_string(self.metadata_path(topic_id))?;
        serde_json::from_str(&metadata_json)
            .map_err(|e| VectorIndexError::Corruption(format!("unreadable sidecar: {}", e)))
    }

    /// Load a topic's index, validating the sidecar against the payload.
    pub fn load(&self, topic_id: &str) -> Result<FlatL2Index> {
        let metadata = self.read_metadata(topic_id)?;

        let payload = fs::read(self.payload_path(topic_id))?;
        let (dimension, count, vectors) = parse_payload(&payload)?;

        if metadata.topic_id != topic_id {
            return Err(VectorIndexError::Corruption(format!(
                "sidecar belongs to topic {}",
                metadata.topic_id
            )));
        }
        if metadata.index_type != INDEX_TYPE {
            return Err(VectorIndexError::Corruption(format!(
                "unexpected index type {}",
                metadata.index_type
            )));
        }
        if metadata.total_chunks != metadata.chunks.len() || metadata.total_chunks != count {
            return Err(VectorIndexError::Corruption(format!(
                "sidecar lists {} chunks (total_chunks {}), payload holds {}",
                metadata.chunks.len(),
                metadata.total_chunks,
                count
            )));
        }
        if metadata.dimension != dimension {
            return Err(VectorIndexError::Corruption(format!(
                "sidecar dimension {} doesn't match payload dimension {}",
                metadata.dimension, dimension
            )));
        }
        if count == 0 || dimension == 0 {
            return Err(VectorIndexError::Corruption("index holds no vectors".to_string()));
        }
        if let Some((position, _)) = metadata
            .chunks
            .iter()
            .enumerate()
            .find(|(position, chunk)| chunk.sequence_index != *position)
        {
            return Err(VectorIndexError::Corruption(format!(
                "chunk at position {} is out of order",
                position
            )));
        }

        log::info!(
            "Loaded index for topic {} ({} chunks, dimension {})",
            topic_id,
            count,
            dimension
        );

        Ok(FlatL2Index {
            topic_id: metadata.topic_id,
            dimension,
            vectors,
            chunks: metadata.chunks,
            created_at: metadata.created_at,
            vocabulary_fingerprint: metadata.vocabulary_fingerprint,
        })
    }

    /// Remove both artifacts for a topic.
    pub fn remove(&self, topic_id: &str) -> Result<()> {
        validate_topic(topic_id)?;
        for path in [self.payload_path(topic_id), self.metadata_path(topic_id)] {
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    /// Topics with a persisted index, sorted.
    pub fn list_topics(&self) -> Result<Vec<String>> {
        let base = glob::Pattern::escape(&self.base_path.to_string_lossy());
        let pattern = Path::new(&base).join(format!("*.{}", PAYLOAD_EXTENSION));
        let pattern = pattern.to_string_lossy();

        let mut topics = Vec::new();
        let entries = glob::glob(&pattern)
            .map_err(|e| VectorIndexError::Corruption(format!("bad index pattern: {}", e)))?;
        for entry in entries {
            match entry {
                Ok(path) => {
                    let topic = path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .map(str::to_string);
                    if let Some(topic) = topic {
                        if self.exists(&topic) {
                            topics.push(topic);
                        }
                    }
                }
                Err(e) => log::warn!("Skipping unreadable index entry: {}", e),
            }
        }

        topics.sort();
        Ok(topics)
    }

    /// Statistics about a persisted index, read from its sidecar alone.
    pub fn stats(&self, topic_id: &str) -> Result<IndexStats> {
        let metadata = self.read_metadata(topic_id)?;
        Ok(IndexStats {
            topic_id: metadata.topic_id,
            total_chunks: metadata.total_chunks,
            dimension: metadata.dimension,
            created_at: metadata.created_at,
        })
    }
}
