//! Retrieval orchestration: ingestion, image catalogs and question answering.

use std::error::Error as StdError;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use thiserror::Error;

use crate::config::{ConfigError, TutorConfig};

use super::chunker::{chunk_words, chunks_from_texts};
use super::embedding::{EmbeddingError, EmbeddingRegistry, CHUNK_NAMESPACE, IMAGE_NAMESPACE};
use super::grounder;
use super::images::{CatalogStore, ImageError, TopicCatalog};
use super::index::{validate_topic, FlatL2Index, IndexStore, VectorIndexError};
use super::models::{Chunk, ImageCatalogEntry, ImageReference, IndexStats, RetrievalResult};

type BoxError = Box<dyn StdError + Send + Sync>;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("No chunks to ingest")]
    EmptyInput,

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Index error: {0}")]
    Index(#[from] VectorIndexError),
}

/// Failure of one question. Only the not-found case is meant for branching.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("No index found for topic: {0}")]
    TopicNotIndexed(String),

    #[error("Retrieval failed for topic {topic}")]
    Failed {
        topic: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl QueryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, QueryError::TopicNotIndexed(_))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns the stores, the embedding registry handle and the loaded-topic caches.
pub struct RagPipeline {
    config: TutorConfig,
    embeddings: Arc<EmbeddingRegistry>,
    indexes: IndexStore,
    catalogs: CatalogStore,
    index_cache: Mutex<LruCache<String, Arc<FlatL2Index>>>,
    catalog_cache: Mutex<LruCache<String, Arc<TopicCatalog>>>,
}

impl RagPipeline {
    /// Create a pipeline with its own embedding registry.
    pub fn new(config: TutorConfig) -> Result<Self, ConfigError> {
        let registry = Arc::new(EmbeddingRegistry::new(
            config.vector_dir(),
            config.max_features,
        ));
        Self::with_registry(config, registry)
    }

    /// Create a pipeline sharing an existing embedding registry.
    pub fn with_registry(
        config: TutorConfig,
        embeddings: Arc<EmbeddingRegistry>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        config.init_dirs()?;

        let capacity =
            NonZeroUsize::new(config.index_cache_capacity).unwrap_or(NonZeroUsize::MIN);

        Ok(Self {
            indexes: IndexStore::new(config.vector_dir()),
            catalogs: CatalogStore::new(config.metadata_dir()),
            index_cache: Mutex::new(LruCache::new(capacity)),
            catalog_cache: Mutex::new(LruCache::new(capacity)),
            embeddings,
            config,
        })
    }

    pub fn config(&self) -> &TutorConfig {
        &self.config
    }

    pub fn embeddings(&self) -> &Arc<EmbeddingRegistry> {
        &self.embeddings
    }

    // ===== Ingestion =====

    /// Embed and persist pre-chunked texts as the topic's index.
    pub fn ingest<S: AsRef<str>>(
        &self,
        topic_id: &str,
        chunk_texts: &[S],
    ) -> Result<Arc<FlatL2Index>, IngestError> {
        self.ingest_chunks(topic_id, chunks_from_texts(chunk_texts))
    }

    /// Chunk a whole document into word windows, then ingest it.
    pub fn ingest_document(
        &self,
        topic_id: &str,
        text: &str,
    ) -> Result<Arc<FlatL2Index>, IngestError> {
        let chunks = chunk_words(text, self.config.chunk_size, self.config.chunk_overlap);
        self.ingest_chunks(topic_id, chunks)
    }

    /// Build, persist and cache a fresh index for the topic.
    ///
    /// An existing index for the topic is replaced whole.
    pub fn ingest_chunks(
        &self,
        topic_id: &str,
        chunks: Vec<Chunk>,
    ) -> Result<Arc<FlatL2Index>, IngestError> {
        validate_topic(topic_id)?;
        if chunks.is_empty() {
            return Err(IngestError::EmptyInput);
        }

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let (fingerprint, embeddings) = self
            .embeddings
            .fit_or_reuse_with_fingerprint(CHUNK_NAMESPACE, &texts)?;

        let index = FlatL2Index::build(topic_id, &embeddings, chunks)?
            .with_vocabulary_fingerprint(fingerprint);
        self.indexes.persist(&index)?;

        let index = Arc::new(index);
        lock(&self.index_cache).put(topic_id.to_string(), Arc::clone(&index));
        log::info!("Ingested topic {} ({} chunks)", topic_id, index.len());
        Ok(index)
    }

    // ===== Images =====

    /// Make sure the topic's catalog and its embeddings are ready.
    pub fn ensure_image_catalog(&self, topic_id: &str) -> bool {
        match self.catalog(topic_id) {
            Ok(_) => true,
            Err(e) => {
                log::error!("Unable to prepare images for topic {}: {}", topic_id, e);
                false
            }
        }
    }

    /// All catalog entries for a topic, materializing the catalog if missing.
    pub fn topic_images(&self, topic_id: &str) -> Result<Vec<ImageCatalogEntry>, ImageError> {
        Ok(self.catalog(topic_id)?.entries.clone())
    }

    fn catalog(&self, topic_id: &str) -> Result<Arc<TopicCatalog>, ImageError> {
        if let Some(catalog) = lock(&self.catalog_cache).get(topic_id) {
            return Ok(Arc::clone(catalog));
        }

        let entries = if self.catalogs.exists(topic_id) {
            self.catalogs.load(topic_id)?
        } else {
            self.catalogs.create_default(topic_id)?
        };

        let texts: Vec<String> = entries.iter().map(|e| e.embedding_text()).collect();
        let embeddings = self.embeddings.fit_or_reuse(IMAGE_NAMESPACE, &texts)?;
        log::info!(
            "Generated embeddings for {} images (topic={})",
            entries.len(),
            topic_id
        );

        let catalog = Arc::new(TopicCatalog { entries, embeddings });
        lock(&self.catalog_cache).put(topic_id.to_string(), Arc::clone(&catalog));
        Ok(catalog)
    }

    // ===== Query =====

    /// Answer a question against a topic.
    pub fn query(&self, topic_id: &str, question: &str) -> Result<RetrievalResult, QueryError> {
        if !self.indexes.exists(topic_id) {
            return Err(QueryError::TopicNotIndexed(topic_id.to_string()));
        }

        log::info!("Starting RAG pipeline for topic {}", topic_id);
        self.run_query(topic_id, question).map_err(|source| {
            if let Some(VectorIndexError::TopicNotIndexed(_)) =
                source.downcast_ref::<VectorIndexError>()
            {
                return QueryError::TopicNotIndexed(topic_id.to_string());
            }
            log::error!("RAG pipeline error for topic {}: {}", topic_id, source);
            QueryError::Failed {
                topic: topic_id.to_string(),
                source,
            }
        })
    }

    fn run_query(&self, topic_id: &str, question: &str) -> Result<RetrievalResult, BoxError> {
        let index = self.index(topic_id)?;

        let (fingerprint, query_embedding) = self
            .embeddings
            .embed_one_with_fingerprint(CHUNK_NAMESPACE, question)?;
        index.check_vocabulary(&fingerprint)?;
        let ranked = index.search(&query_embedding, self.config.top_k_chunks)?;
        log::info!("Found {} relevant chunks", ranked.len());

        let relevant_chunks: Vec<String> = ranked.into_iter().map(|r| r.chunk.text).collect();
        if relevant_chunks.is_empty() {
            return Ok(RetrievalResult {
                answer: grounder::compose(question, &relevant_chunks),
                relevant_chunks,
                image: None,
            });
        }

        let answer = grounder::compose(question, &relevant_chunks);
        log::debug!("Answer composed ({} characters)", answer.len());

        let image = self.match_image(topic_id, question)?;
        log::info!(
            "Selected image: {}",
            image.as_ref().map(|i| i.title.as_str()).unwrap_or("None")
        );

        Ok(RetrievalResult {
            answer,
            relevant_chunks,
            image,
        })
    }

    fn match_image(&self, topic_id: &str, question: &str) -> Result<Option<ImageReference>, BoxError> {
        let catalog = self.catalog(topic_id)?;
        let query_embedding = self.embeddings.embed_one(IMAGE_NAMESPACE, question)?;
        let best = catalog.rank(&query_embedding, 1)?.into_iter().next();

        let threshold = self.config.image_similarity_threshold;
        Ok(best.and_then(|ranked| {
            if ranked.similarity < threshold {
                log::debug!(
                    "Discarding low-similarity image (score={:.3}, threshold={:.3})",
                    ranked.similarity,
                    threshold
                );
                None
            } else {
                Some(ImageReference::from(ranked))
            }
        }))
    }

    fn index(&self, topic_id: &str) -> Result<Arc<FlatL2Index>, VectorIndexError> {
        if let Some(index) = lock(&self.index_cache).get(topic_id) {
            return Ok(Arc::clone(index));
        }

        let index = Arc::new(self.indexes.load(topic_id)?);
        lock(&self.index_cache).put(topic_id.to_string(), Arc::clone(&index));
        Ok(index)
    }

    // ===== Topics =====

    /// Topics with a persisted index.
    pub fn list_indexed_topics(&self) -> Result<Vec<String>, VectorIndexError> {
        self.indexes.list_topics()
    }

    pub fn index_stats(&self, topic_id: &str) -> Result<IndexStats, VectorIndexError> {
        self.indexes.stats(topic_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const BELL_CHUNKS: [&str; 2] = [
        "The bell vibrates to produce sound.",
        "Sound travels through air as waves.",
    ];

    fn create_test_pipeline() -> (RagPipeline, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let pipeline = RagPipeline::new(TutorConfig::with_data_dir(temp_dir.path())).unwrap();
        (pipeline, temp_dir)
    }

    #[test]
    fn test_bell_question_end_to_end() {
        let (pipeline, _temp) = create_test_pipeline();
        pipeline.ingest("T1", &BELL_CHUNKS).unwrap();

        let result = pipeline.query("T1", "How does a bell make sound?").unwrap();

        assert_eq!(result.relevant_chunks.len(), 2);
        assert_eq!(result.relevant_chunks[0], BELL_CHUNKS[0]);
        assert!(result.relevant_chunks.contains(&BELL_CHUNKS[1].to_string()));
        assert!(result.answer.contains("vibrates"));

        let image = result.image.expect("bell question should select a diagram");
        assert_eq!(image.image_id, "img_001");
    }

    #[test]
    fn test_unknown_topic_is_not_found() {
        let (pipeline, _temp) = create_test_pipeline();
        let err = pipeline.query("never-ingested", "anything?").unwrap_err();
        assert!(err.is_not_found());
        assert!(matches!(err, QueryError::TopicNotIndexed(_)));
    }

    #[test]
    fn test_vocal_cords_image_and_threshold() {
        let temp_dir = TempDir::new().unwrap();
        let pipeline = RagPipeline::new(TutorConfig::with_data_dir(temp_dir.path())).unwrap();
        pipeline.ingest("T1", &BELL_CHUNKS).unwrap();

        let result = pipeline.query("T1", "vocal cords vibration").unwrap();
        assert_eq!(result.image.unwrap().image_id, "img_006");

        let mut strict = TutorConfig::with_data_dir(temp_dir.path());
        strict.image_similarity_threshold = 0.99;
        let strict = RagPipeline::new(strict).unwrap();
        let result = strict.query("T1", "vocal cords vibration").unwrap();
        assert!(result.image.is_none());
        assert!(!result.relevant_chunks.is_empty());
    }

    #[test]
    fn test_no_lexical_overlap_has_no_image() {
        let (pipeline, _temp) = create_test_pipeline();
        pipeline.ingest("T1", &BELL_CHUNKS).unwrap();

        let result = pipeline.query("T1", "photosynthesis chlorophyll").unwrap();
        assert!(result.image.is_none());
    }

    #[test]
    fn test_index_survives_restart() {
        let temp_dir = TempDir::new().unwrap();
        let first = RagPipeline::new(TutorConfig::with_data_dir(temp_dir.path())).unwrap();
        first.ingest("T1", &BELL_CHUNKS).unwrap();
        let before = first.query("T1", "How does a bell make sound?").unwrap();

        let restarted = RagPipeline::new(TutorConfig::with_data_dir(temp_dir.path())).unwrap();
        let after = restarted.query("T1", "How does a bell make sound?").unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_reingest_replaces_cached_index() {
        let (pipeline, _temp) = create_test_pipeline();
        pipeline.ingest("T1", &BELL_CHUNKS).unwrap();
        pipeline.query("T1", "bell").unwrap();

        pipeline.ingest("T1", &["Sound echoes off walls."]).unwrap();
        let result = pipeline.query("T1", "sound").unwrap();
        assert_eq!(result.relevant_chunks, vec!["Sound echoes off walls."]);
    }

    #[test]
    fn test_dimension_stable_across_topics() {
        let (pipeline, _temp) = create_test_pipeline();
        let first = pipeline.ingest("T1", &BELL_CHUNKS).unwrap();
        let second = pipeline
            .ingest("T2", &["Photosynthesis needs sunlight and water."])
            .unwrap();
        assert_eq!(first.dimension(), second.dimension());
        assert_eq!(
            first.dimension(),
            pipeline.embeddings().vocabulary_size(CHUNK_NAMESPACE)
        );
    }

    #[test]
    fn test_corrupt_index_is_coarse_failure() {
        let temp_dir = TempDir::new().unwrap();
        let config = TutorConfig::with_data_dir(temp_dir.path());
        let pipeline = RagPipeline::new(config.clone()).unwrap();
        pipeline.ingest("T1", &BELL_CHUNKS).unwrap();

        let payload = config.vector_dir().join("T1.flatl2");
        fs::write(&payload, b"garbage").unwrap();

        let restarted = RagPipeline::new(config).unwrap();
        let err = restarted.query("T1", "bell").unwrap_err();
        assert!(!err.is_not_found());
        assert!(matches!(err, QueryError::Failed { .. }));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_refit_vocabulary_rejects_older_index() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = TutorConfig::with_data_dir(temp_dir.path());
        config.max_features = 2;

        let first = RagPipeline::new(config.clone()).unwrap();
        first
            .ingest("T1", &["bell bell vibrates", "bell vibrates sound"])
            .unwrap();
        assert!(first.query("T1", "bell vibrates").is_ok());

        // Unreadable vocabulary: the next process fits a new one
        let vocabulary = first.embeddings().vocabulary_path(CHUNK_NAMESPACE);
        fs::write(&vocabulary, b"junk").unwrap();

        let restarted = RagPipeline::new(config).unwrap();
        let second = restarted
            .ingest("T2", &["photosynthesis chlorophyll sunlight", "chlorophyll leaves"])
            .unwrap();
        assert_eq!(second.dimension(), 2);

        let err = restarted.query("T1", "bell vibrates").unwrap_err();
        assert!(matches!(err, QueryError::Failed { .. }));
        let cause = std::error::Error::source(&err)
            .and_then(|e| e.downcast_ref::<VectorIndexError>());
        assert!(matches!(cause, Some(VectorIndexError::VocabularyMismatch(_))));

        assert!(restarted.query("T2", "chlorophyll").is_ok());
    }

    #[test]
    fn test_ingest_rejects_empty_input() {
        let (pipeline, _temp) = create_test_pipeline();
        let empty: Vec<String> = Vec::new();
        assert!(matches!(
            pipeline.ingest("T1", &empty),
            Err(IngestError::EmptyInput)
        ));
        assert!(matches!(
            pipeline.ingest_document("T1", "   "),
            Err(IngestError::EmptyInput)
        ));
    }

    #[test]
    fn test_ingest_document_chunks_by_words() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = TutorConfig::with_data_dir(temp_dir.path());
        config.chunk_size = 4;
        config.chunk_overlap = 1;
        let pipeline = RagPipeline::new(config).unwrap();

        let index = pipeline
            .ingest_document("doc", "one bell two bell three bell four bell")
            .unwrap();
        // Windows start at words 0, 3 and 6
        assert_eq!(index.len(), 3);
        assert_eq!(index.chunks()[1].start_offset, 3);
    }

    #[test]
    fn test_image_catalog_and_topic_listing() {
        let (pipeline, temp) = create_test_pipeline();
        pipeline.ingest("b-topic", &BELL_CHUNKS).unwrap();
        pipeline.ingest("a-topic", &BELL_CHUNKS).unwrap();

        assert!(pipeline.ensure_image_catalog("a-topic"));
        assert!(temp.path().join("metadata/a-topic_images.json").exists());
        assert_eq!(pipeline.topic_images("a-topic").unwrap().len(), 6);
        assert!(!pipeline.ensure_image_catalog("../bad"));

        assert_eq!(
            pipeline.list_indexed_topics().unwrap(),
            vec!["a-topic", "b-topic"]
        );
        assert_eq!(pipeline.index_stats("a-topic").unwrap().total_chunks, 2);
    }
}
