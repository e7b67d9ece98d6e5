//! JSON corpus/vector stores with atomic replace, plus the HTTP fetcher adapters use.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use evfeed_core::{CanonicalEvent, EventVector};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "evfeed-storage";

/// Whole-file JSON array store. Reads are full loads, writes are atomic replaces.
#[derive(Debug, Clone)]
pub struct JsonArrayStore<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

pub type CorpusStore = JsonArrayStore<CanonicalEvent>;
pub type VectorStore = JsonArrayStore<EventVector>;

impl<T> JsonArrayStore<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads every element. An absent or blank file is an empty store, not an error.
    pub async fn load(&self) -> anyhow::Result<Vec<T>> {
        if !fs::try_exists(&self.path)
            .await
            .with_context(|| format!("checking store path {}", self.path.display()))?
        {
            debug!(path = %self.path.display(), "store file absent; starting empty");
            return Ok(Vec::new());
        }

        let text = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        if text.trim().is_empty() {
            warn!(path = %self.path.display(), "store file is blank; treating as empty");
            return Ok(Vec::new());
        }
        serde_json::from_str(&text).with_context(|| format!("parsing {}", self.path.display()))
    }

    /// Replaces the file contents with `items` via temp-file write and rename.
    pub async fn save(&self, items: &[T]) -> anyhow::Result<()> {
        let rendered = render_array_one_per_line(items)
            .with_context(|| format!("serializing {}", self.path.display()))?;
        write_atomically(&self.path, rendered.as_bytes()).await
    }
}

/// Renders `[\n  {..},\n  {..}\n]`: one compact element per line, diff-friendly.
pub fn render_array_one_per_line<T: Serialize>(items: &[T]) -> serde_json::Result<String> {
    if items.is_empty() {
        return Ok("[]\n".to_string());
    }
    let lines = items
        .iter()
        .map(serde_json::to_string)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!("[\n  {}\n]\n", lines.join(",\n  ")))
}

/// Writes bytes to a uniquely named sibling temp file, then renames it over `path`.
pub async fn write_atomically(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)
        .await
        .with_context(|| format!("creating store directory {}", parent.display()))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "store".to_string());
    let temp_path = parent.join(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

    let write_result = async {
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp store file {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp store file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp store file {}", temp_path.display()))?;
        file.sync_all()
            .await
            .with_context(|| format!("syncing temp store file {}", temp_path.display()))?;
        anyhow::Ok(())
    }
    .await;

    if let Err(err) = write_result {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err);
    }

    match fs::rename(&temp_path, path).await {
        Ok(()) => Ok(()),
        Err(err) => {
            let _ = fs::remove_file(&temp_path).await;
            Err(err).with_context(|| {
                format!(
                    "atomically renaming temp store {} -> {}",
                    temp_path.display(),
                    path.display()
                )
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Sequential HTTP client: one request at a time, per-request timeout, capped retries.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            backoff: config.backoff,
        })
    }

    pub async fn fetch_bytes(&self, source_id: &str, url: &str) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", source_id, url);
        self.fetch_with_retries(url).instrument(span).await
    }

    async fn fetch_with_retries(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let mut attempt = 0usize;
        loop {
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        let body = resp.bytes().await?.to_vec();
                        return Ok(FetchedResponse {
                            status,
                            final_url,
                            body,
                        });
                    }

                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        debug!(%status, attempt, "retrying after http status");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        debug!(error = %err, attempt, "retrying after transport error");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evfeed_core::RawEventRecord;
    use tempfile::tempdir;

    fn event(index: u64, title: &str) -> CanonicalEvent {
        let raw = RawEventRecord {
            title: title.to_string(),
            owner: "Linguistics".to_string(),
            ..Default::default()
        };
        CanonicalEvent::from_raw(raw, "05-03-2019".into(), "4:00 PM".into(), "5:00 PM".into(), index)
    }

    #[tokio::test]
    async fn absent_corpus_loads_as_empty() {
        let dir = tempdir().expect("tempdir");
        let store = CorpusStore::new(dir.path().join("data").join("events.json"));
        assert!(store.load().await.expect("load").is_empty());
    }

    #[tokio::test]
    async fn save_then_load_preserves_order_and_fields() {
        let dir = tempdir().expect("tempdir");
        let store = CorpusStore::new(dir.path().join("data").join("events.json"));
        let events = vec![event(0, "Phonology Circle"), event(1, "Syntax Lab")];

        store.save(&events).await.expect("save");
        let loaded = store.load().await.expect("load");
        assert_eq!(loaded, events);
    }

    #[tokio::test]
    async fn save_writes_one_element_per_line_and_leaves_no_temp_files() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("events.json");
        let store = CorpusStore::new(&path);
        store
            .save(&[event(0, "A"), event(1, "B"), event(2, "C")])
            .await
            .expect("save");

        let text = std::fs::read_to_string(&path).expect("read");
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "[");
        assert!(lines[1].starts_with("  {") && lines[1].ends_with("},"));
        assert_eq!(lines[4], "]");

        let leftovers = std::fs::read_dir(dir.path())
            .expect("read_dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn save_replaces_previous_contents() {
        let dir = tempdir().expect("tempdir");
        let store = VectorStore::new(dir.path().join("vectors.json"));
        store
            .save(&[EventVector { event_index: 0, event_vector: vec![0.5, -0.5] }])
            .await
            .expect("first save");
        store
            .save(&[
                EventVector { event_index: 0, event_vector: vec![0.1, 0.2] },
                EventVector { event_index: 1, event_vector: vec![0.3, 0.4] },
            ])
            .await
            .expect("second save");

        let loaded = store.load().await.expect("load");
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].event_vector, vec![0.3, 0.4]);
    }

    #[tokio::test]
    async fn blank_file_loads_as_empty_but_garbage_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("events.json");
        std::fs::write(&path, "\n").expect("write");
        assert!(CorpusStore::new(&path).load().await.expect("load").is_empty());

        std::fs::write(&path, "[{\"title\": ").expect("write");
        assert!(CorpusStore::new(&path).load().await.is_err());
    }

    #[test]
    fn empty_array_renders_compactly() {
        let rendered = render_array_one_per_line::<EventVector>(&[]).expect("render");
        assert_eq!(rendered, "[]\n");
    }

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
    }

    #[test]
    fn server_errors_and_throttling_are_retryable() {
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), RetryDisposition::NonRetryable);
    }
}
