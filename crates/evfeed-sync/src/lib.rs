//! Run orchestration: collect, normalize, merge, persist, vectorize.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use evfeed_adapters::{adapter_for_source, AdapterContext, SourceAdapter, SourceConfig};
use evfeed_core::CanonicalEvent;
use evfeed_storage::{CorpusStore, HttpClientConfig, HttpFetcher, VectorStore};
use evfeed_topics::{TopicVectorizer, VectorizerConfig};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

pub mod collect;
pub mod merge;
pub mod normalize;

pub use collect::{collect_all, CollectedBatch, SourceOutcome};
pub use merge::{merge, MergeOutcome};
pub use normalize::{
    normalize_date, normalize_endtime, normalize_starttime, parse_free_date, DateCleanupRules, FieldNormalizer,
};

pub const CRATE_NAME: &str = "evfeed-sync";

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceConfig>,
}

impl SourceRegistry {
    pub async fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Adapters for enabled sources, in file order.
    pub fn adapters(&self) -> Vec<Box<dyn SourceAdapter>> {
        self.sources
            .iter()
            .filter(|s| s.enabled)
            .filter_map(|source| {
                let adapter = adapter_for_source(source);
                if adapter.is_none() {
                    warn!(source_id = %source.source_id, "source has no fetch target; skipping");
                }
                adapter
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub workspace_root: PathBuf,
    pub corpus_path: PathBuf,
    pub vector_path: PathBuf,
    pub produce_vectors: bool,
    pub vector_dimensions: usize,
    pub adapter_timeout_secs: u64,
    pub http_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("."),
            corpus_path: PathBuf::from("data/events.json"),
            vector_path: PathBuf::from("data/events_vector.json"),
            produce_vectors: true,
            vector_dimensions: 30,
            adapter_timeout_secs: 60,
            http_timeout_secs: 20,
            user_agent: "evfeed-bot/0.1".to_string(),
        }
    }
}

fn env_flag(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "True" | "yes")
}

impl RunConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            workspace_root: std::env::var("EVFEED_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_root),
            corpus_path: std::env::var("EVFEED_CORPUS_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.corpus_path),
            vector_path: std::env::var("EVFEED_VECTOR_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.vector_path),
            produce_vectors: std::env::var("EVFEED_PRODUCE_VECTORS")
                .map(|v| env_flag(&v))
                .unwrap_or(defaults.produce_vectors),
            vector_dimensions: std::env::var("EVFEED_VECTOR_DIMENSIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.vector_dimensions),
            adapter_timeout_secs: std::env::var("EVFEED_ADAPTER_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.adapter_timeout_secs),
            http_timeout_secs: std::env::var("EVFEED_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.http_timeout_secs),
            user_agent: std::env::var("EVFEED_USER_AGENT").unwrap_or(defaults.user_agent),
        }
    }

    /// Relative paths are taken from the workspace root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace_root.join(path)
        }
    }

    pub fn sources_path(&self) -> PathBuf {
        self.workspace_root.join("sources.yaml")
    }

    pub fn corpus_store(&self) -> CorpusStore {
        CorpusStore::new(self.resolve(&self.corpus_path))
    }

    pub fn vector_store(&self) -> VectorStore {
        VectorStore::new(self.resolve(&self.vector_path))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources: Vec<SourceOutcome>,
    pub collected_records: usize,
    pub admitted: usize,
    pub duplicates: usize,
    pub corpus_size: usize,
    pub corpus_path: String,
    /// Number of vectors written; `None` when the vector stage was skipped or failed.
    pub vectors_written: Option<usize>,
    pub vector_error: Option<String>,
}

impl RunSummary {
    pub fn failed_sources(&self) -> usize {
        self.sources.iter().filter(|s| s.error.is_some()).count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CorpusStats {
    pub events: usize,
    pub max_event_index: Option<u64>,
    pub with_parsed_date: usize,
    pub per_owner: BTreeMap<String, usize>,
    pub vectors: usize,
    pub vector_dimensions: Option<usize>,
}

pub struct EventPipeline {
    config: RunConfig,
    http: HttpFetcher,
    normalizer: FieldNormalizer,
    adapters: Option<Vec<Box<dyn SourceAdapter>>>,
}

impl EventPipeline {
    pub fn new(config: RunConfig) -> Result<Self> {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            ..Default::default()
        })?;
        let rules = DateCleanupRules::from_workspace_root(&config.workspace_root)?;
        Ok(Self {
            config,
            http,
            normalizer: FieldNormalizer::new(rules),
            adapters: None,
        })
    }

    /// Uses `adapters` instead of building them from `sources.yaml`.
    pub fn with_adapters(mut self, adapters: Vec<Box<dyn SourceAdapter>>) -> Self {
        self.adapters = Some(adapters);
        self
    }

    pub fn with_normalizer(mut self, normalizer: FieldNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub async fn run_once(&self) -> Result<RunSummary> {
        let started_at = Utc::now();
        let ctx = AdapterContext::new(self.config.workspace_root.clone());
        info!(run_id = %ctx.run_id, "run started");

        let registry_adapters;
        let adapters: &[Box<dyn SourceAdapter>] = match &self.adapters {
            Some(adapters) => adapters,
            None => {
                let registry = SourceRegistry::load(&self.config.sources_path()).await?;
                registry_adapters = registry.adapters();
                &registry_adapters
            }
        };

        let timeout = Duration::from_secs(self.config.adapter_timeout_secs);
        let batch = collect_all(adapters, &self.http, &ctx, timeout).await;
        let collected_records = batch.records.len();

        let corpus_store = self.config.corpus_store();
        let existing = corpus_store
            .load()
            .await
            .with_context(|| format!("loading corpus {}", corpus_store.path().display()))?;

        let outcome = merge(existing, batch.records, &self.normalizer).context("merging collected batch")?;
        corpus_store
            .save(&outcome.corpus)
            .await
            .with_context(|| format!("saving corpus {}", corpus_store.path().display()))?;
        info!(
            admitted = outcome.admitted,
            duplicates = outcome.duplicates,
            corpus_size = outcome.corpus.len(),
            "corpus saved"
        );

        let (vectors_written, vector_error) = if self.config.produce_vectors {
            match self.vectorize().await {
                Ok(count) => (Some(count), None),
                Err(err) => {
                    warn!(error = %format!("{err:#}"), "vector stage failed; corpus already saved");
                    (None, Some(format!("{err:#}")))
                }
            }
        } else {
            (None, None)
        };

        Ok(RunSummary {
            run_id: ctx.run_id,
            started_at,
            finished_at: Utc::now(),
            sources: batch.per_source,
            collected_records,
            admitted: outcome.admitted,
            duplicates: outcome.duplicates,
            corpus_size: outcome.corpus.len(),
            corpus_path: corpus_store.path().display().to_string(),
            vectors_written,
            vector_error,
        })
    }

    /// Recomputes topic vectors from the saved corpus; the vector file is only
    /// replaced on success.
    pub async fn vectorize(&self) -> Result<usize> {
        let corpus = self
            .config
            .corpus_store()
            .load()
            .await
            .context("loading corpus for vectorization")?;
        let vectorizer = TopicVectorizer::new(VectorizerConfig::with_dimensions(self.config.vector_dimensions));
        let vectors = vectorizer.event_vectors(&corpus).context("computing topic vectors")?;

        let store = self.config.vector_store();
        store
            .save(&vectors)
            .await
            .with_context(|| format!("saving vectors {}", store.path().display()))?;
        info!(vectors = vectors.len(), path = %store.path().display(), "vectors saved");
        Ok(vectors.len())
    }

    pub async fn stats(&self) -> Result<CorpusStats> {
        let corpus = self.config.corpus_store().load().await.context("loading corpus")?;
        let vectors = self.config.vector_store().load().await.context("loading vectors")?;
        Ok(corpus_stats(&corpus, vectors.len(), vectors.first().map(|v| v.event_vector.len())))
    }
}

pub fn corpus_stats(corpus: &[CanonicalEvent], vectors: usize, vector_dimensions: Option<usize>) -> CorpusStats {
    let mut per_owner = BTreeMap::new();
    for event in corpus {
        *per_owner.entry(event.owner.clone()).or_insert(0) += 1;
    }
    CorpusStats {
        events: corpus.len(),
        max_event_index: corpus.iter().map(|e| e.event_index).max(),
        with_parsed_date: corpus.iter().filter(|e| !e.date_dt.is_empty()).count(),
        per_owner,
        vectors,
        vector_dimensions,
    }
}

pub async fn run_once_from_env() -> Result<RunSummary> {
    EventPipeline::new(RunConfig::from_env())?.run_once().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use evfeed_adapters::AdapterKind;

    #[test]
    fn registry_parses_and_skips_disabled_or_targetless_sources() {
        let registry = SourceRegistry::from_yaml_str(
            r#"
sources:
  - source_id: seas
    owner: School of Engineering and Applied Science
    kind: tribe-events
    base_url: https://events.seas.upenn.edu/calendar/list/
  - source_id: cni
    owner: Center for Neuroscience and Society
    kind: drupal-events
    enabled: false
    base_url: https://cni.upenn.edu/events
  - source_id: empty
    owner: Nowhere
    kind: drupal-events
  - source_id: penn-calendar
    owner: University Calendar
    kind: fixture
"#,
        )
        .unwrap();
        assert_eq!(registry.sources.len(), 4);
        assert_eq!(registry.sources[1].kind, AdapterKind::DrupalEvents);

        let ids: Vec<String> = registry.adapters().iter().map(|a| a.source_id().to_string()).collect();
        assert_eq!(ids, vec!["seas".to_string(), "penn-calendar".to_string()]);
    }

    #[test]
    fn relative_paths_resolve_against_workspace_root() {
        let config = RunConfig {
            workspace_root: PathBuf::from("/srv/evfeed"),
            ..Default::default()
        };
        assert_eq!(config.corpus_store().path(), Path::new("/srv/evfeed/data/events.json"));
        assert_eq!(config.resolve(Path::new("/tmp/x.json")), PathBuf::from("/tmp/x.json"));
        assert_eq!(config.sources_path(), PathBuf::from("/srv/evfeed/sources.yaml"));
    }

    #[test]
    fn stats_count_owners_and_parsed_dates() {
        let mut a = CanonicalEvent::from_raw(Default::default(), "01-02-2019".into(), String::new(), String::new(), 4);
        a.owner = "Physics".into();
        let mut b = a.clone();
        b.date_dt.clear();
        b.event_index = 9;
        let stats = corpus_stats(&[a, b], 2, Some(30));
        assert_eq!(stats.events, 2);
        assert_eq!(stats.max_event_index, Some(9));
        assert_eq!(stats.with_parsed_date, 1);
        assert_eq!(stats.per_owner.get("Physics"), Some(&2));
    }

    #[test]
    fn env_flag_accepts_common_truthy_values() {
        assert!(env_flag("1"));
        assert!(env_flag("true"));
        assert!(!env_flag("0"));
        assert!(!env_flag("false"));
    }
}
