//! Namespace-scoped TF-IDF embeddings.
//!
//! Each namespace owns one vocabulary. The vocabulary is fit from the first
//! batch presented to the namespace, persisted next to the vector indexes,
//! and only used for transforms afterwards, so every vector a namespace
//! produces has the same length.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Namespace for document chunk text.
pub const CHUNK_NAMESPACE: &str = "chunks";

/// Namespace for image descriptive text.
pub const IMAGE_NAMESPACE: &str = "images";

/// Default cap on the number of terms a vocabulary keeps.
pub const DEFAULT_MAX_FEATURES: usize = 1000;

pub type EmbeddingVector = Vec<f32>;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("No texts provided for embedding")]
    EmptyInput,

    #[error("Vocabulary for namespace '{0}' is not initialized; index some content first")]
    VocabularyUninitialized(String),

    #[error("Texts for namespace '{0}' contain no indexable terms")]
    EmptyVocabulary(String),

    #[error("IO error: {0}")]
    Persistence(#[from] std::io::Error),

    #[error("Vocabulary encoding error: {0}")]
    Codec(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, EmbeddingError>;

/// Stop words removed before counting terms.
const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "across", "after", "afterwards", "again", "against", "all", "almost",
    "alone", "along", "already", "also", "although", "always", "am", "among", "amongst", "amount",
    "an", "and", "another", "any", "anyhow", "anyone", "anything", "anyway", "anywhere", "are",
    "around", "as", "at", "back", "be", "became", "because", "become", "becomes", "becoming",
    "been", "before", "beforehand", "behind", "being", "below", "beside", "besides", "between",
    "beyond", "both", "bottom", "but", "by", "call", "can", "cannot", "cant", "co", "con",
    "could", "couldnt", "de", "do", "done", "down", "due", "during", "each", "eg", "eight",
    "either", "eleven", "else", "elsewhere", "empty", "enough", "etc", "even", "ever", "every",
    "everyone", "everything", "everywhere", "except", "few", "fifteen", "fifty", "first", "five",
    "for", "former", "formerly", "forty", "four", "from", "front", "further", "get", "give", "go",
    "had", "has", "hasnt", "have", "he", "hence", "her", "here", "hereafter", "hereby", "herein",
    "hereupon", "hers", "herself", "him", "himself", "his", "how", "however", "hundred", "i",
    "ie", "if", "in", "inc", "indeed", "into", "is", "it", "its", "itself", "keep", "last",
    "latter", "latterly", "least", "less", "ltd", "many", "may", "me", "meanwhile", "might",
    "mine", "more", "moreover", "most", "mostly", "much", "must", "my", "myself", "namely",
    "neither", "never", "nevertheless", "next", "nine", "no", "nobody", "none", "noone", "nor",
    "not", "nothing", "now", "nowhere", "of", "off", "often", "on", "once", "one", "only", "onto",
    "or", "other", "others", "otherwise", "our", "ours", "ourselves", "out", "over", "own", "per",
    "perhaps", "please", "put", "rather", "re", "same", "seem", "seemed", "seeming", "seems",
    "several", "she", "should", "since", "six", "sixty", "so", "some", "somehow", "someone",
    "something", "sometime", "sometimes", "somewhere", "still", "such", "ten", "than", "that",
    "the", "their", "them", "themselves", "then", "thence", "there", "thereafter", "thereby",
    "therefore", "therein", "thereupon", "these", "they", "this", "those", "though", "three",
    "through", "throughout", "thru", "thus", "to", "together", "too", "toward", "towards",
    "twelve", "twenty", "two", "un", "under", "until", "up", "upon", "us", "very", "via", "was",
    "we", "well", "were", "what", "whatever", "when", "whence", "whenever", "where",
    "whereafter", "whereas", "whereby", "wherein", "whereupon", "wherever", "whether", "which",
    "while", "whither", "who", "whoever", "whole", "whom", "whose", "why", "will", "with",
    "within", "without", "would", "yet", "you", "your", "yours", "yourself", "yourselves",
];

fn stop_words() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| STOP_WORDS.iter().copied().collect())
}

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b\w\w+\b").expect("token pattern is valid"))
}

/// Lower-cased word tokens of length >= 2 with stop words removed.
fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    token_pattern()
        .find_iter(&lowered)
        .map(|m| m.as_str())
        .filter(|token| !stop_words().contains(token))
        .map(str::to_string)
        .collect()
}

/// Fitted term set and inverse document frequencies for one namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TfidfVocabulary {
    /// Terms in ascending order; a term's position is its vector index
    terms: Vec<String>,
    /// Smoothed IDF weight per term
    idf: Vec<f32>,
    /// Number of documents the vocabulary was fit on
    document_count: usize,
    /// Identity of this fit; vectors from different fits are not comparable
    fingerprint: String,
}

impl TfidfVocabulary {
    /// Learn a vocabulary from `texts`, keeping at most `max_features` terms.
    ///
    /// Terms are ranked by total count across the batch (ties broken
    /// alphabetically) before the cap is applied.
    pub fn fit<S: AsRef<str>>(namespace: &str, texts: &[S], max_features: usize) -> Result<Self> {
        if texts.is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let mut term_counts: HashMap<String, usize> = HashMap::new();
        let mut doc_freq: HashMap<String, usize> = HashMap::new();

        for text in texts {
            let tokens = tokenize(text.as_ref());
            let mut seen = HashSet::new();
            for token in tokens {
                *term_counts.entry(token.clone()).or_default() += 1;
                if seen.insert(token.clone()) {
                    *doc_freq.entry(token).or_default() += 1;
                }
            }
        }

        if term_counts.is_empty() {
            return Err(EmbeddingError::EmptyVocabulary(namespace.to_string()));
        }

        let mut ranked: Vec<(String, usize)> = term_counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(max_features.max(1));

        let mut terms: Vec<String> = ranked.into_iter().map(|(term, _)| term).collect();
        terms.sort();

        let n = texts.len() as f32;
        let idf = terms
            .iter()
            .map(|term| {
                let df = doc_freq.get(term).copied().unwrap_or(0) as f32;
                ((1.0 + n) / (1.0 + df)).ln() + 1.0
            })
            .collect();

        Ok(Self {
            terms,
            idf,
            document_count: texts.len(),
            fingerprint: Uuid::new_v4().to_string(),
        })
    }

    /// Number of terms, which is the length of every produced vector.
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn document_count(&self) -> usize {
        self.document_count
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Convert text to an L2-normalized TF-IDF vector.
    ///
    /// Text with no known terms yields the zero vector.
    pub fn transform(&self, text: &str) -> EmbeddingVector {
        let mut counts: BTreeMap<usize, f32> = BTreeMap::new();
        for token in tokenize(text) {
            if let Ok(position) = self.terms.binary_search(&token) {
                *counts.entry(position).or_default() += 1.0;
            }
        }

        let mut vector = vec![0.0f32; self.terms.len()];
        for (position, count) in counts {
            vector[position] = count * self.idf[position];
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in vector.iter_mut() {
                *value /= norm;
            }
        }
        vector
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let vocabulary: Self = bincode::deserialize(bytes)?;
        Ok(vocabulary)
    }
}

type Slot = Arc<Mutex<Option<Arc<TfidfVocabulary>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Process-wide owner of every namespace's vocabulary state.
///
/// Starts empty. Each namespace has its own slot mutex, held across the
/// whole fit-or-reuse decision, so exactly one fit wins per namespace.
pub struct EmbeddingRegistry {
    storage_dir: PathBuf,
    max_features: usize,
    slots: Mutex<HashMap<String, Slot>>,
}

impl EmbeddingRegistry {
    pub fn new(storage_dir: PathBuf, max_features: usize) -> Self {
        Self {
            storage_dir,
            max_features,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Path of the persisted vocabulary artifact for a namespace.
    pub fn vocabulary_path(&self, namespace: &str) -> PathBuf {
        self.storage_dir
            .join(format!("tfidf_{}_vocabulary.bin", namespace))
    }

    fn slot(&self, namespace: &str) -> Slot {
        let mut slots = lock(&self.slots);
        Arc::clone(slots.entry(namespace.to_string()).or_default())
    }

    /// Embed a batch, fitting the namespace first if it has never been fit.
    pub fn fit_or_reuse<S: AsRef<str>>(
        &self,
        namespace: &str,
        texts: &[S],
    ) -> Result<Vec<EmbeddingVector>> {
        Ok(self.fit_or_reuse_with_fingerprint(namespace, texts)?.1)
    }

    /// Like [`Self::fit_or_reuse`], also returning the fingerprint of the
    /// vocabulary that produced the vectors.
    pub fn fit_or_reuse_with_fingerprint<S: AsRef<str>>(
        &self,
        namespace: &str,
        texts: &[S],
    ) -> Result<(String, Vec<EmbeddingVector>)> {
        if texts.is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let slot = self.slot(namespace);
        let vocabulary = {
            let mut state = lock(&slot);
            if state.is_none() {
                *state = self.load_persisted(namespace);
            }
            match state.as_ref() {
                Some(vocabulary) => Arc::clone(vocabulary),
                None => {
                    let fitted = Arc::new(TfidfVocabulary::fit(namespace, texts, self.max_features)?);
                    log::info!(
                        "Fit vocabulary for namespace '{}' ({} terms from {} texts)",
                        namespace,
                        fitted.len(),
                        texts.len()
                    );
                    if let Err(e) = self.persist(namespace, &fitted) {
                        log::warn!(
                            "Failed to persist vocabulary for namespace '{}': {}",
                            namespace,
                            e
                        );
                    }
                    *state = Some(Arc::clone(&fitted));
                    fitted
                }
            }
        };

        let embeddings: Vec<EmbeddingVector> = texts
            .iter()
            .map(|text| vocabulary.transform(text.as_ref()))
            .collect();
        log::debug!(
            "Embedded {} texts with dimension {} (namespace='{}')",
            embeddings.len(),
            vocabulary.len(),
            namespace
        );
        Ok((vocabulary.fingerprint.clone(), embeddings))
    }

    /// Embed a single text against an already fitted namespace.
    pub fn embed_one(&self, namespace: &str, text: &str) -> Result<EmbeddingVector> {
        Ok(self.embed_one_with_fingerprint(namespace, text)?.1)
    }

    /// Like [`Self::embed_one`], also returning the vocabulary fingerprint.
    pub fn embed_one_with_fingerprint(
        &self,
        namespace: &str,
        text: &str,
    ) -> Result<(String, EmbeddingVector)> {
        let vocabulary = self
            .vocabulary(namespace)
            .ok_or_else(|| EmbeddingError::VocabularyUninitialized(namespace.to_string()))?;
        Ok((vocabulary.fingerprint.clone(), vocabulary.transform(text)))
    }

    /// Fingerprint of the namespace's vocabulary, if it has been fit.
    pub fn fingerprint(&self, namespace: &str) -> Option<String> {
        self.vocabulary(namespace).map(|v| v.fingerprint.clone())
    }

    /// Current vocabulary size, or 0 when the namespace has never been fit.
    pub fn vocabulary_size(&self, namespace: &str) -> usize {
        self.vocabulary(namespace).map(|v| v.len()).unwrap_or(0)
    }

    /// Drop the in-memory state so the next call reloads the persisted artifact.
    pub fn reload(&self, namespace: &str) {
        let slot = self.slot(namespace);
        *lock(&slot) = None;
    }

    fn vocabulary(&self, namespace: &str) -> Option<Arc<TfidfVocabulary>> {
        let slot = self.slot(namespace);
        let mut state = lock(&slot);
        if state.is_none() {
            *state = self.load_persisted(namespace);
        }
        state.clone()
    }

    fn load_persisted(&self, namespace: &str) -> Option<Arc<TfidfVocabulary>> {
        let path = self.vocabulary_path(namespace);
        if !path.exists() {
            return None;
        }

        match fs::read(&path)
            .map_err(EmbeddingError::from)
            .and_then(|bytes| TfidfVocabulary::from_bytes(&bytes))
        {
            Ok(vocabulary) if !vocabulary.is_empty() => {
                log::info!(
                    "Loaded vocabulary for namespace '{}' ({} terms)",
                    namespace,
                    vocabulary.len()
                );
                Some(Arc::new(vocabulary))
            }
            Ok(_) => {
                log::warn!("Ignoring empty vocabulary artifact {:?}", path);
                None
            }
            Err(e) => {
                log::warn!("Ignoring unreadable vocabulary artifact {:?}: {}", path, e);
                None
            }
        }
    }

    fn persist(&self, namespace: &str, vocabulary: &TfidfVocabulary) -> Result<()> {
        let path = self.vocabulary_path(namespace);
        write_atomic(&path, &vocabulary.to_bytes()?)?;
        log::info!("Saved vocabulary for namespace '{}' to {:?}", namespace, path);
        Ok(())
    }
}

/// Write through a sibling temp file so readers never see a partial artifact.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::TempDir;

    fn create_test_registry() -> (EmbeddingRegistry, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let registry = EmbeddingRegistry::new(temp_dir.path().to_path_buf(), DEFAULT_MAX_FEATURES);
        (registry, temp_dir)
    }

    #[test]
    fn test_tokenize_drops_stop_words() {
        assert_eq!(
            tokenize("The Bell vibrates to produce a sound!"),
            vec!["bell", "vibrates", "produce", "sound"]
        );
    }

    #[test]
    fn test_fit_vocabulary_sorted_and_capped() {
        let texts = ["sound sound sound waves", "sound air air", "bell"];
        let vocabulary = TfidfVocabulary::fit("t", &texts, 2).unwrap();
        assert_eq!(vocabulary.terms, vec!["air", "sound"]);

        let full = TfidfVocabulary::fit("t", &texts, 100).unwrap();
        assert_eq!(full.terms, vec!["air", "bell", "sound", "waves"]);
        // "sound" appears in two of three documents
        let expected = (4.0f32 / 3.0).ln() + 1.0;
        assert!((full.idf[2] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_transform_is_normalized() {
        let vocabulary = TfidfVocabulary::fit("t", &["bell sound", "waves air"], 100).unwrap();
        let vector = vocabulary.transform("bell bell sound");
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);

        let unknown = vocabulary.transform("nothing known here");
        assert!(unknown.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_fit_only_stop_words_is_error() {
        let result = TfidfVocabulary::fit("t", &["the and of"], 100);
        assert!(matches!(result, Err(EmbeddingError::EmptyVocabulary(_))));
    }

    #[test]
    fn test_empty_batch_is_error() {
        let (registry, _temp) = create_test_registry();
        let texts: Vec<String> = Vec::new();
        let result = registry.fit_or_reuse(CHUNK_NAMESPACE, &texts);
        assert!(matches!(result, Err(EmbeddingError::EmptyInput)));
    }

    #[test]
    fn test_embed_one_before_fit_is_error() {
        let (registry, _temp) = create_test_registry();
        let result = registry.embed_one(CHUNK_NAMESPACE, "bell");
        assert!(matches!(result, Err(EmbeddingError::VocabularyUninitialized(_))));
        assert_eq!(registry.vocabulary_size(CHUNK_NAMESPACE), 0);
    }

    #[test]
    fn test_dimension_stable_across_batches() {
        let (registry, _temp) = create_test_registry();

        let first = registry
            .fit_or_reuse(CHUNK_NAMESPACE, &["The bell vibrates.", "Sound travels as waves."])
            .unwrap();
        let size = registry.vocabulary_size(CHUNK_NAMESPACE);
        assert!(size > 0);
        assert!(first.iter().all(|v| v.len() == size));

        // A later topic with brand new words must not refit
        let second = registry
            .fit_or_reuse(CHUNK_NAMESPACE, &["Photosynthesis converts sunlight into energy."])
            .unwrap();
        assert_eq!(second[0].len(), size);
        assert_eq!(registry.vocabulary_size(CHUNK_NAMESPACE), size);

        let again = registry.embed_one(CHUNK_NAMESPACE, "The bell vibrates.").unwrap();
        assert_eq!(again, first[0]);
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let (registry, _temp) = create_test_registry();
        registry
            .fit_or_reuse(CHUNK_NAMESPACE, &["bell vibrates sound waves air"])
            .unwrap();
        registry.fit_or_reuse(IMAGE_NAMESPACE, &["diagram"]).unwrap();

        assert_eq!(registry.vocabulary_size(CHUNK_NAMESPACE), 5);
        assert_eq!(registry.vocabulary_size(IMAGE_NAMESPACE), 1);
    }

    #[test]
    fn test_vocabulary_survives_restart() {
        let temp_dir = TempDir::new().unwrap();
        let first = EmbeddingRegistry::new(temp_dir.path().to_path_buf(), DEFAULT_MAX_FEATURES);
        let fitted = first
            .fit_or_reuse(CHUNK_NAMESPACE, &["bell vibrates", "sound waves"])
            .unwrap();
        assert!(first.vocabulary_path(CHUNK_NAMESPACE).exists());

        let restarted = EmbeddingRegistry::new(temp_dir.path().to_path_buf(), DEFAULT_MAX_FEATURES);
        let vector = restarted.embed_one(CHUNK_NAMESPACE, "bell vibrates").unwrap();
        assert_eq!(vector, fitted[0]);
    }

    #[test]
    fn test_persist_failure_keeps_in_memory_state() {
        let temp_dir = TempDir::new().unwrap();
        // A regular file where the storage directory should be
        let blocked = temp_dir.path().join("blocked");
        fs::write(&blocked, b"x").unwrap();
        let registry = EmbeddingRegistry::new(blocked.join("vectors"), DEFAULT_MAX_FEATURES);

        let embeddings = registry.fit_or_reuse(CHUNK_NAMESPACE, &["bell sound"]).unwrap();
        assert_eq!(embeddings[0].len(), 2);
        assert_eq!(registry.embed_one(CHUNK_NAMESPACE, "bell").unwrap().len(), 2);
    }

    #[test]
    fn test_fingerprint_follows_vocabulary() {
        let temp_dir = TempDir::new().unwrap();
        let first = EmbeddingRegistry::new(temp_dir.path().to_path_buf(), DEFAULT_MAX_FEATURES);
        assert!(first.fingerprint(CHUNK_NAMESPACE).is_none());

        let (fitted, _) = first
            .fit_or_reuse_with_fingerprint(CHUNK_NAMESPACE, &["bell vibrates"])
            .unwrap();
        let (reused, _) = first
            .fit_or_reuse_with_fingerprint(CHUNK_NAMESPACE, &["sound waves"])
            .unwrap();
        assert_eq!(fitted, reused);

        let restarted = EmbeddingRegistry::new(temp_dir.path().to_path_buf(), DEFAULT_MAX_FEATURES);
        let (loaded, _) = restarted
            .embed_one_with_fingerprint(CHUNK_NAMESPACE, "bell")
            .unwrap();
        assert_eq!(loaded, fitted);

        // Same texts, separate fit: a different vocabulary state
        let refit = TfidfVocabulary::fit(CHUNK_NAMESPACE, &["bell vibrates"], DEFAULT_MAX_FEATURES)
            .unwrap();
        assert_ne!(refit.fingerprint(), fitted);
    }

    #[test]
    fn test_corrupt_artifact_is_ignored() {
        let (registry, _temp) = create_test_registry();
        let path = registry.vocabulary_path(CHUNK_NAMESPACE);
        fs::write(&path, b"not a vocabulary").unwrap();

        assert_eq!(registry.vocabulary_size(CHUNK_NAMESPACE), 0);
        let embeddings = registry.fit_or_reuse(CHUNK_NAMESPACE, &["bell sound"]).unwrap();
        assert_eq!(embeddings[0].len(), 2);
    }

    #[test]
    fn test_concurrent_first_fit_has_single_winner() {
        let (registry, _temp) = create_test_registry();
        let registry = Arc::new(registry);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    let words: Vec<String> = (0..=i).map(|j| format!("term{}x", j)).collect();
                    let text = words.join(" ");
                    registry.fit_or_reuse("race", &[text]).unwrap()[0].len()
                })
            })
            .collect();

        let lengths: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let size = registry.vocabulary_size("race");
        assert!(lengths.iter().all(|len| *len == size));
    }
}
