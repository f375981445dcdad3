//! Diagram catalog and cosine-similarity image matching.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::embedding::{write_atomic, EmbeddingError, EmbeddingVector};
use super::index::validate_topic;
use super::models::{ImageCatalogEntry, RankedImage};

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Image catalog corrupted: {0}")]
    Corruption(String),

    #[error("IO error: {0}")]
    Persistence(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),
}

pub type Result<T> = std::result::Result<T, ImageError>;

fn entry(id: &str, filename: &str, title: &str, keywords: &[&str], description: &str) -> ImageCatalogEntry {
    ImageCatalogEntry {
        id: id.to_string(),
        filename: filename.to_string(),
        title: title.to_string(),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        description: description.to_string(),
    }
}

/// The fixed set of diagrams every topic receives.
pub fn default_catalog() -> Vec<ImageCatalogEntry> {
    vec![
        entry(
            "img_001",
            "SchoolBellVibration.png",
            "School Bell Vibration",
            &["bell", "vibration", "sound", "school", "waves", "diagram"],
            "Diagram showing how a school bell vibrates to produce sound waves",
        ),
        entry(
            "img_002",
            "CompressionAndRefraction.png",
            "Sound Wave Compression and Rarefaction",
            &["compression", "rarefaction", "sound", "waves", "propagation", "physics"],
            "Diagram showing compression and rarefaction in sound wave propagation",
        ),
        entry(
            "img_003",
            "MusicalInstrumentsVibrationChart.png",
            "Musical Instruments Vibration Chart",
            &["musical", "instruments", "vibration", "sitar", "flute", "drum", "chart"],
            "Chart showing how different musical instruments produce sound through vibration",
        ),
        entry(
            "img_004",
            "ReflectionOfSound.png",
            "Sound Reflection Experiment",
            &["reflection", "sound", "experiment", "echo", "plywood", "wood"],
            "Experimental setup demonstrating sound reflection using different materials",
        ),
        entry(
            "img_005",
            "VibrationOfRubberBand.png",
            "Rubber Band Vibration",
            &["rubber", "band", "vibration", "plucking", "sound", "stretched"],
            "Diagram showing how plucking a stretched rubber band produces sound through vibration",
        ),
        entry(
            "img_006",
            "VocalCordsDiagram.png",
            "Vocal Cords Diagram",
            &["vocal", "cords", "diagram", "vibration", "air", "lungs", "voice"],
            "Anatomical diagram showing how vocal cords vibrate to produce sound",
        ),
    ]
}

/// Cosine similarity; 0.0 when either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot_product = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;

    for (x, y) in a.iter().zip(b.iter()) {
        dot_product += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a.sqrt() * norm_b.sqrt())
}

/// A topic's catalog together with the embeddings of its entries.
#[derive(Debug, Clone)]
pub struct TopicCatalog {
    pub entries: Vec<ImageCatalogEntry>,
    pub embeddings: Vec<EmbeddingVector>,
}

impl TopicCatalog {
    /// Best `top_k` entries for a query embedding.
    pub fn rank(&self, query: &[f32], top_k: usize) -> Result<Vec<RankedImage>> {
        rank(&self.entries, &self.embeddings, query, top_k)
    }
}

/// Rank catalog entries by cosine similarity to `query`, best first.
///
/// Every catalog embedding must share the query's dimension.
pub fn rank(
    entries: &[ImageCatalogEntry],
    embeddings: &[EmbeddingVector],
    query: &[f32],
    top_k: usize,
) -> Result<Vec<RankedImage>> {
    if let Some(bad) = embeddings.iter().find(|e| e.len() != query.len()) {
        return Err(ImageError::DimensionMismatch {
            expected: bad.len(),
            actual: query.len(),
        });
    }

    let mut scored: Vec<(usize, f32)> = embeddings
        .iter()
        .map(|embedding| cosine_similarity(query, embedding))
        .enumerate()
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    Ok(scored
        .into_iter()
        .filter_map(|(position, similarity)| {
            entries.get(position).map(|entry| RankedImage {
                entry: entry.clone(),
                similarity,
            })
        })
        .take(top_k)
        .collect())
}

/// Catalog sidecar layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CatalogMetadata {
    topic_id: String,
    images: Vec<ImageCatalogEntry>,
    total_images: usize,
}

/// Reads and writes per-topic catalog sidecars.
#[derive(Debug, Clone)]
pub struct CatalogStore {
    base_path: PathBuf,
}

impl CatalogStore {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn catalog_path(&self, topic_id: &str) -> PathBuf {
        self.base_path.join(format!("{}_images.json", topic_id))
    }

    pub fn exists(&self, topic_id: &str) -> bool {
        validate_topic(topic_id).is_ok() && self.catalog_path(topic_id).exists()
    }

    /// Write the default catalog for a topic and return its entries.
    pub fn create_default(&self, topic_id: &str) -> Result<Vec<ImageCatalogEntry>> {
        validate_topic(topic_id).map_err(|e| ImageError::Corruption(e.to_string()))?;
        let images = default_catalog();
        let metadata = CatalogMetadata {
            topic_id: topic_id.to_string(),
            total_images: images.len(),
            images,
        };
        let json = serde_json::to_string_pretty(&metadata)?;
        write_atomic(&self.catalog_path(topic_id), json.as_bytes())?;
        log::info!("Saved image metadata for topic {}", topic_id);
        Ok(metadata.images)
    }

    /// Load a topic's catalog, validating its shape.
    pub fn load(&self, topic_id: &str) -> Result<Vec<ImageCatalogEntry>> {
        validate_topic(topic_id).map_err(|e| ImageError::Corruption(e.to_string()))?;
        let json = fs::read_to_string(self.catalog_path(topic_id))?;
        let metadata: CatalogMetadata = serde_json::from_str(&json)
            .map_err(|e| ImageError::Corruption(format!("unreadable catalog: {}", e)))?;

        if metadata.topic_id != topic_id {
            return Err(ImageError::Corruption(format!(
                "catalog belongs to topic {}",
                metadata.topic_id
            )));
        }
        if metadata.total_images != metadata.images.len() || metadata.images.is_empty() {
            return Err(ImageError::Corruption(format!(
                "catalog lists {} images, total_images is {}",
                metadata.images.len(),
                metadata.total_images
            )));
        }

        log::info!("Loaded {} images for topic {}", metadata.images.len(), topic_id);
        Ok(metadata.images)
    }
}
