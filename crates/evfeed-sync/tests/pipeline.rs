use std::path::Path;

use evfeed_core::{CanonicalEvent, EventVector};
use evfeed_sync::{EventPipeline, RunConfig};
use serde_json::json;

fn write(path: &Path, text: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, text).unwrap();
}

fn fixture_events() -> serde_json::Value {
    let event = |title: &str, description: &str, date: &str, starttime: &str| {
        json!({
            "title": title,
            "description": description,
            "location": "",
            "date": date,
            "starttime": starttime,
            "url": format!("https://calendar.example.edu/{}", title.to_lowercase().replace(' ', "-")),
        })
    };
    json!([
        event("Quantum Particle Physics", "Lattice gauge simulations", "Tuesday, October 30, 2018 - 11:30am", "11:30 AM"),
        event("Quantum particle physics seminar", "Lattice gauge results", "02/06/2019", "4:00 PM - 5:00 PM"),
        event("Particle physics colloquium", "Quantum lattice gauge theory", "February 7, 2019", "3:00 PM"),
        event("Protein folding in cell biology", "<p>Membrane protein structure</p>", "Date TBD", ""),
        event("Cell biology lunch talk", "Protein membrane dynamics", "March 1, 2019", "12:00 PM"),
        event("Membrane proteins and cell biology", "Folding kinetics", "March 8, 2019", "1:00 PM"),
        event("Quantum Particle Physics", "Lattice gauge simulations", "Tuesday, October 30, 2018 - 11:30am", "11:30 AM"),
        "not an event",
    ])
}

fn workspace(root: &Path) {
    write(
        &root.join("sources.yaml"),
        r#"
sources:
  - source_id: penn-calendar
    owner: University Calendar
    kind: fixture
  - source_id: gone
    owner: Retired Department
    kind: fixture
  - source_id: disabled
    owner: Disabled Department
    kind: fixture
    enabled: false
"#,
    );
    write(
        &root.join("fixtures/penn-calendar/events.json"),
        &serde_json::to_string_pretty(&fixture_events()).unwrap(),
    );
}

fn config(root: &Path, dimensions: usize) -> RunConfig {
    RunConfig {
        workspace_root: root.to_path_buf(),
        vector_dimensions: dimensions,
        adapter_timeout_secs: 5,
        ..Default::default()
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> T {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[tokio::test]
async fn run_collects_merges_and_vectorizes_despite_failing_source() {
    let dir = tempfile::tempdir().unwrap();
    workspace(dir.path());
    let pipeline = EventPipeline::new(config(dir.path(), 2)).unwrap();

    let summary = pipeline.run_once().await.unwrap();
    assert_eq!(summary.sources.len(), 2);
    assert_eq!(summary.failed_sources(), 1);
    assert_eq!(summary.sources[1].source_id, "gone");
    assert_eq!(summary.collected_records, 7);
    assert_eq!(summary.admitted, 6);
    assert_eq!(summary.duplicates, 1);
    assert_eq!(summary.vectors_written, Some(6));
    assert!(summary.vector_error.is_none());

    let corpus: Vec<CanonicalEvent> = read_json(&dir.path().join("data/events.json"));
    let indices: Vec<u64> = corpus.iter().map(|e| e.event_index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(corpus[0].date_dt, "30-10-2018");
    assert_eq!(corpus[0].endtime, "12:30 PM");
    assert_eq!(corpus[1].date_dt, "06-02-2019");
    assert_eq!(corpus[1].starttime, "4:00 PM");
    assert_eq!(corpus[1].endtime, "5:00 PM");
    assert_eq!(corpus[3].date_dt, "");
    assert_eq!(corpus[3].description, "Membrane protein structure");
    assert!(corpus.iter().all(|e| e.owner == "University Calendar"));

    let vectors: Vec<EventVector> = read_json(&dir.path().join("data/events_vector.json"));
    assert_eq!(vectors.len(), 6);
    assert!(vectors.iter().all(|v| v.event_vector.len() == 2));

    let text = std::fs::read_to_string(dir.path().join("data/events.json")).unwrap();
    assert!(text.starts_with("[\n  {"));
    assert_eq!(text.lines().count(), 8);

    let again = pipeline.run_once().await.unwrap();
    assert_eq!(again.admitted, 0);
    assert_eq!(again.duplicates, 7);
    let reloaded: Vec<CanonicalEvent> = read_json(&dir.path().join("data/events.json"));
    assert_eq!(reloaded, corpus);
}

#[tokio::test]
async fn vector_failure_keeps_corpus_and_previous_vectors() {
    let dir = tempfile::tempdir().unwrap();
    workspace(dir.path());
    write(&dir.path().join("data/events_vector.json"), "[]\n");

    let summary = EventPipeline::new(config(dir.path(), 30))
        .unwrap()
        .run_once()
        .await
        .unwrap();
    assert_eq!(summary.admitted, 6);
    assert_eq!(summary.vectors_written, None);
    assert!(summary.vector_error.is_some());

    let corpus: Vec<CanonicalEvent> = read_json(&dir.path().join("data/events.json"));
    assert_eq!(corpus.len(), 6);
    let untouched = std::fs::read_to_string(dir.path().join("data/events_vector.json")).unwrap();
    assert_eq!(untouched, "[]\n");
}

#[tokio::test]
async fn existing_corpus_keeps_identity_and_unknown_fields() {
    let dir = tempfile::tempdir().unwrap();
    workspace(dir.path());
    write(
        &dir.path().join("data/events.json"),
        r#"[
  {"title": "Legacy Talk", "owner": "Old Department", "starttime": "2:00 PM", "event_index": 41.0, "room": "DRL A8"}
]"#,
    );

    let mut cfg = config(dir.path(), 2);
    cfg.produce_vectors = false;
    let pipeline = EventPipeline::new(cfg).unwrap();
    let summary = pipeline.run_once().await.unwrap();
    assert_eq!(summary.corpus_size, 7);
    assert_eq!(summary.vectors_written, None);
    assert!(summary.vector_error.is_none());
    assert!(!dir.path().join("data/events_vector.json").exists());

    let corpus: Vec<CanonicalEvent> = read_json(&dir.path().join("data/events.json"));
    assert_eq!(corpus[0].event_index, 41);
    assert_eq!(corpus[0].extra.get("room"), Some(&json!("DRL A8")));
    assert_eq!(corpus[1].event_index, 42);
    assert_eq!(corpus.last().map(|e| e.event_index), Some(47));

    let stats = pipeline.stats().await.unwrap();
    assert_eq!(stats.events, 7);
    assert_eq!(stats.max_event_index, Some(47));
    assert_eq!(stats.per_owner.get("University Calendar"), Some(&6));
    assert_eq!(stats.vectors, 0);
}

#[tokio::test]
async fn missing_registry_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = EventPipeline::new(config(dir.path(), 2))
        .unwrap()
        .run_once()
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("sources.yaml"));
}
