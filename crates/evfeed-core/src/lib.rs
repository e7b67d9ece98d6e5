//! Core event model and shared text primitives for evfeed.

use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

pub mod text;

pub const CRATE_NAME: &str = "evfeed-core";

/// Event as produced by a source adapter, before normalization.
///
/// Every field is a plain string that defaults to empty. When read from JSON,
/// `null` becomes `""` and scalars are stringified, so downstream code never
/// has to handle an absent field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEventRecord {
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub location: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub speaker: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub owner: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub date: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub starttime: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub endtime: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub url: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub event_id: String,
}

/// Normalized, identity-bearing event as persisted in the corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub location: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub speaker: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub owner: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub date: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub date_dt: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub starttime: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub endtime: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub url: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub event_id: String,
    #[serde(deserialize_with = "lenient_index")]
    pub event_index: u64,
    /// Members written by older tooling (`room`, `category`, ...), kept verbatim.
    #[serde(flatten, default)]
    pub extra: BTreeMap<String, JsonValue>,
}

impl CanonicalEvent {
    /// Builds an event from a raw record with already-normalized date/time values.
    pub fn from_raw(
        raw: RawEventRecord,
        date_dt: String,
        starttime: String,
        endtime: String,
        event_index: u64,
    ) -> Self {
        Self {
            title: raw.title,
            description: raw.description,
            location: raw.location,
            speaker: raw.speaker,
            owner: raw.owner,
            date: raw.date,
            date_dt,
            starttime,
            endtime,
            url: raw.url,
            event_id: raw.event_id,
            event_index,
            extra: BTreeMap::new(),
        }
    }

    pub fn dedup_key(&self) -> DedupKey<'_> {
        DedupKey {
            starttime: &self.starttime,
            owner: &self.owner,
            location: &self.location,
            title: &self.title,
            description: &self.description,
            url: &self.url,
        }
    }

    /// Text the topic vectorizer sees for this event.
    pub fn topic_text(&self) -> String {
        [
            self.title.as_str(),
            self.description.as_str(),
            self.location.as_str(),
            self.starttime.as_str(),
        ]
        .join(" ")
    }
}

/// Field tuple deciding whether two records denote the same event.
///
/// Note that `starttime` rather than `date_dt` participates, so two otherwise
/// identical listings on different days collapse into one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DedupKey<'a> {
    pub starttime: &'a str,
    pub owner: &'a str,
    pub location: &'a str,
    pub title: &'a str,
    pub description: &'a str,
    pub url: &'a str,
}

/// Latent-topic coordinates of one event, keyed by `event_index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventVector {
    pub event_index: u64,
    pub event_vector: Vec<f64>,
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(JsonValue::Null) => String::new(),
        Some(JsonValue::String(s)) => s,
        Some(other) => other.to_string(),
    })
}

// Dataframe-based writers emitted whole floats (`12.0`) for indices.
fn lenient_index<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = JsonValue::deserialize(deserializer)?;
    match &value {
        JsonValue::Number(n) => {
            if let Some(v) = n.as_u64() {
                return Ok(v);
            }
            match n.as_f64() {
                Some(f) if f >= 0.0 && f.fract() == 0.0 => Ok(f as u64),
                _ => Err(D::Error::custom(format!("invalid event_index {value}"))),
            }
        }
        JsonValue::String(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| D::Error::custom(format!("invalid event_index {s:?}"))),
        _ => Err(D::Error::custom(format!("invalid event_index {value}"))),
    }
}
