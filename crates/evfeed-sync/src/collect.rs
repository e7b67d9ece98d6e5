//! Runs every adapter in registry order and concatenates what they produce.

use std::time::Duration;

use evfeed_adapters::{AdapterContext, SourceAdapter};
use evfeed_core::RawEventRecord;
use evfeed_storage::HttpFetcher;
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceOutcome {
    pub source_id: String,
    pub records: usize,
    /// Failure or timeout message; `None` when the adapter completed.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CollectedBatch {
    pub records: Vec<RawEventRecord>,
    pub per_source: Vec<SourceOutcome>,
}

impl CollectedBatch {
    pub fn failed_sources(&self) -> usize {
        self.per_source.iter().filter(|s| s.error.is_some()).count()
    }
}

/// Invokes each adapter one after another, each bounded by `timeout`.
///
/// A failing or timed-out adapter contributes zero records; it never aborts
/// the collection.
pub async fn collect_all(
    adapters: &[Box<dyn SourceAdapter>],
    http: &HttpFetcher,
    ctx: &AdapterContext,
    timeout: Duration,
) -> CollectedBatch {
    let mut batch = CollectedBatch::default();

    for adapter in adapters {
        let source_id = adapter.source_id().to_string();
        let span = info_span!("adapter", source_id = %source_id, kind = ?adapter.kind());
        let result = tokio::time::timeout(timeout, adapter.collect(http, ctx))
            .instrument(span)
            .await;

        let outcome = match result {
            Ok(Ok(records)) => {
                info!(source_id = %source_id, records = records.len(), "adapter completed");
                let count = records.len();
                batch.records.extend(records);
                SourceOutcome {
                    source_id,
                    records: count,
                    error: None,
                }
            }
            Ok(Err(err)) => {
                warn!(source_id = %source_id, error = %err, "adapter failed; skipping source");
                SourceOutcome {
                    source_id,
                    records: 0,
                    error: Some(err.to_string()),
                }
            }
            Err(_) => {
                warn!(source_id = %source_id, timeout_secs = timeout.as_secs(), "adapter timed out; skipping source");
                SourceOutcome {
                    source_id,
                    records: 0,
                    error: Some(format!("timed out after {}s", timeout.as_secs())),
                }
            }
        };
        batch.per_source.push(outcome);
    }

    batch
}
