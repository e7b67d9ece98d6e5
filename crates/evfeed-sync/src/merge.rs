//! Merges a normalized batch into the existing corpus and assigns identities.

use std::collections::HashSet;

use anyhow::{anyhow, Result};

use evfeed_core::{CanonicalEvent, DedupKey, RawEventRecord};

use crate::normalize::FieldNormalizer;

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub corpus: Vec<CanonicalEvent>,
    pub admitted: usize,
    pub duplicates: usize,
}

/// Appends the new events of `batch` to `existing`.
///
/// Existing records keep their position and `event_index`. A candidate is
/// dropped when its dedup key already occurs in the corpus or earlier in the
/// batch; survivors get consecutive indices starting one past the current
/// maximum (zero for an empty corpus). Running out of `u64` indices is an error.
pub fn merge(
    existing: Vec<CanonicalEvent>,
    batch: Vec<RawEventRecord>,
    normalizer: &FieldNormalizer,
) -> Result<MergeOutcome> {
    let mut last_index = existing.iter().map(|e| e.event_index).max();

    let candidates: Vec<CanonicalEvent> = batch
        .into_iter()
        .map(|raw| normalizer.canonicalize(raw, 0))
        .collect();

    let mut admitted_events = Vec::new();
    let mut duplicates = 0usize;
    {
        let mut seen: HashSet<DedupKey<'_>> = existing.iter().map(CanonicalEvent::dedup_key).collect();
        for (position, candidate) in candidates.iter().enumerate() {
            if seen.insert(candidate.dedup_key()) {
                admitted_events.push(position);
            } else {
                duplicates += 1;
            }
        }
    }

    let admitted = admitted_events.len();
    let mut corpus = existing;
    corpus.reserve(admitted);
    let mut keep = admitted_events.into_iter().peekable();
    for (position, mut candidate) in candidates.into_iter().enumerate() {
        if keep.peek() == Some(&position) {
            keep.next();
            let index = match last_index {
                Some(last) => last
                    .checked_add(1)
                    .ok_or_else(|| anyhow!("event_index space exhausted after {last}"))?,
                None => 0,
            };
            candidate.event_index = index;
            last_index = Some(index);
            corpus.push(candidate);
        }
    }

    Ok(MergeOutcome {
        corpus,
        admitted,
        duplicates,
    })
}
