//! Topic vectors: stemmed TF-IDF reduced by truncated SVD.

use evfeed_core::{CanonicalEvent, EventVector};
use rust_stemmers::{Algorithm, Stemmer};
use thiserror::Error;
use tracing::{debug, info};

pub mod preprocess;
pub mod svd;
pub mod tfidf;

pub use preprocess::{is_stop_word, preprocess, STOP_WORDS};
pub use svd::{truncated_svd, SvdConfig};
pub use tfidf::{SparseMatrix, TfidfConfig, TfidfModel};

pub const CRATE_NAME: &str = "evfeed-topics";

#[derive(Debug, Error, PartialEq)]
pub enum VectorizeError {
    #[error("no events to vectorize")]
    EmptyCorpus,
    #[error("max_df={max_df} over {n_docs} documents keeps fewer documents than min_df={min_df}")]
    InvalidDfBounds { min_df: usize, max_df: f64, n_docs: usize },
    #[error("no terms remain after pruning (min_df={min_df}, max_df={max_df})")]
    EmptyVocabulary { min_df: usize, max_df: f64 },
    #[error("{requested} components requested; must be below {limit} (min of documents and terms)")]
    TooManyComponents { requested: usize, limit: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VectorizerConfig {
    pub tfidf: TfidfConfig,
    pub svd: SvdConfig,
}

impl VectorizerConfig {
    pub fn with_dimensions(dimensions: usize) -> Self {
        let mut config = Self::default();
        config.svd.components = dimensions;
        config
    }
}

#[derive(Debug, Clone, Default)]
pub struct TopicVectorizer {
    config: VectorizerConfig,
}

impl TopicVectorizer {
    pub fn new(config: VectorizerConfig) -> Self {
        Self { config }
    }

    pub fn dimensions(&self) -> usize {
        self.config.svd.components
    }

    /// Full recompute over `events`; output order follows input order.
    pub fn event_vectors(&self, events: &[CanonicalEvent]) -> Result<Vec<EventVector>, VectorizeError> {
        if events.is_empty() {
            return Err(VectorizeError::EmptyCorpus);
        }

        let stemmer = Stemmer::create(Algorithm::English);
        let docs: Vec<String> = events
            .iter()
            .map(|event| preprocess::preprocess_with(&stemmer, &event.topic_text()))
            .collect();

        let (model, matrix) = TfidfModel::fit_transform(&docs, self.config.tfidf)?;
        debug!(documents = docs.len(), terms = model.vocabulary.len(), "tf-idf fitted");

        let projected = truncated_svd(&matrix, self.config.svd)?;
        info!(events = events.len(), dimensions = self.dimensions(), "topic vectors computed");

        Ok(events
            .iter()
            .zip(projected)
            .map(|(event, event_vector)| EventVector {
                event_index: event.event_index,
                event_vector,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evfeed_core::RawEventRecord;

    fn event(index: u64, title: &str, description: &str) -> CanonicalEvent {
        let raw = RawEventRecord {
            title: title.to_string(),
            description: description.to_string(),
            location: String::new(),
            ..Default::default()
        };
        CanonicalEvent::from_raw(raw, String::new(), String::new(), String::new(), index)
    }

    fn corpus() -> Vec<CanonicalEvent> {
        vec![
            event(10, "Quantum Particle Physics", "Lattice gauge simulations"),
            event(11, "Quantum particle physics seminar", "Lattice gauge results"),
            event(12, "Particle physics colloquium", "Quantum lattice gauge theory"),
            event(20, "Protein folding in cell biology", "Membrane protein structure"),
            event(21, "Cell biology lunch talk", "Protein membrane dynamics"),
            event(22, "Membrane proteins and cell biology", "Folding kinetics"),
            event(30, "Graduate admissions open house", "Meet faculty and students"),
        ]
    }

    fn cosine(a: &[f64], b: &[f64]) -> f64 {
        let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let na: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
        let nb: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
        dot / (na * nb)
    }

    #[test]
    fn one_vector_per_event_with_requested_dimension() {
        let vectorizer = TopicVectorizer::new(VectorizerConfig::with_dimensions(2));
        let vectors = vectorizer.event_vectors(&corpus()).unwrap();
        assert_eq!(vectors.len(), 7);
        assert!(vectors.iter().all(|v| v.event_vector.len() == 2));
        let indices: Vec<u64> = vectors.iter().map(|v| v.event_index).collect();
        assert_eq!(indices, vec![10, 11, 12, 20, 21, 22, 30]);
    }

    #[test]
    fn related_events_land_close_together() {
        let vectors = TopicVectorizer::new(VectorizerConfig::with_dimensions(2))
            .event_vectors(&corpus())
            .unwrap();
        let physics = cosine(&vectors[0].event_vector, &vectors[1].event_vector);
        let across = cosine(&vectors[0].event_vector, &vectors[3].event_vector);
        assert!(physics > 0.9, "physics pair cosine {physics}");
        assert!(across < physics);
    }

    #[test]
    fn output_is_deterministic() {
        let vectorizer = TopicVectorizer::new(VectorizerConfig::with_dimensions(2));
        assert_eq!(
            vectorizer.event_vectors(&corpus()).unwrap(),
            vectorizer.event_vectors(&corpus()).unwrap()
        );
    }

    #[test]
    fn dimension_beyond_rank_limit_is_an_error() {
        let err = TopicVectorizer::default().event_vectors(&corpus()).unwrap_err();
        assert!(matches!(err, VectorizeError::TooManyComponents { requested: 30, .. }));
    }

    #[test]
    fn empty_corpus_is_an_error() {
        assert_eq!(TopicVectorizer::default().event_vectors(&[]), Err(VectorizeError::EmptyCorpus));
    }
}
