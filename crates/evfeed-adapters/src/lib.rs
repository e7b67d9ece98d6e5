//! Source adapter contracts, the reference adapter kinds, and the registry lookup.

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use evfeed_core::text::{clean_text, find_time_range, format_clock_time, one_hour_after, parse_clock_time};
use evfeed_core::RawEventRecord;
use evfeed_storage::{FetchError, HttpFetcher};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

pub const CRATE_NAME: &str = "evfeed-adapters";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdapterKind {
    /// WordPress "The Events Calendar" list pages.
    TribeEvents,
    /// Drupal views with `date-display-single` ISO timestamps.
    DrupalEvents,
    /// Recorded raw records replayed from `fixtures/<source_id>/events.json`.
    Fixture,
}

/// One entry of `sources.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub source_id: String,
    pub owner: String,
    pub kind: AdapterKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub listing_urls: Vec<String>,
    #[serde(default)]
    pub fixture_path: Option<PathBuf>,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl SourceConfig {
    /// Listing pages to fetch: explicit `listing_urls`, else the base URL.
    pub fn targets(&self) -> Vec<String> {
        if !self.listing_urls.is_empty() {
            return self.listing_urls.clone();
        }
        self.base_url.iter().cloned().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedPage {
    pub url: String,
    pub body: String,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterContext {
    pub run_id: Uuid,
    pub fetched_at: DateTime<Utc>,
    pub workspace_root: PathBuf,
}

impl AdapterContext {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            fetched_at: Utc::now(),
            workspace_root: workspace_root.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Capability "produce raw event records from source S".
///
/// Fetching and parsing are split so parsers can be exercised against recorded
/// pages without a network.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> &str;
    fn owner(&self) -> &str;
    fn kind(&self) -> AdapterKind;

    async fn fetch(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
    ) -> Result<Vec<FetchedPage>, AdapterError>;

    fn parse(&self, pages: &[FetchedPage]) -> Result<Vec<RawEventRecord>, AdapterError>;

    async fn collect(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
    ) -> Result<Vec<RawEventRecord>, AdapterError> {
        let pages = self.fetch(http, ctx).await?;
        self.parse(&pages)
    }
}

pub fn adapter_for_source(config: &SourceConfig) -> Option<Box<dyn SourceAdapter>> {
    match config.kind {
        AdapterKind::TribeEvents | AdapterKind::DrupalEvents => {
            let targets = config.targets();
            if targets.is_empty() {
                return None;
            }
            let html = HtmlListingAdapter {
                source_id: config.source_id.clone(),
                owner: config.owner.clone(),
                targets,
            };
            if config.kind == AdapterKind::TribeEvents {
                Some(Box::new(TribeEventsAdapter(html)))
            } else {
                Some(Box::new(DrupalEventsAdapter(html)))
            }
        }
        AdapterKind::Fixture => Some(Box::new(FixtureAdapter {
            source_id: config.source_id.clone(),
            owner: config.owner.clone(),
            fixture_path: config.fixture_path.clone(),
        })),
    }
}

/// Transliterates and whitespace-normalizes every free-text field; `url` is left as is.
pub fn clean_record(record: RawEventRecord) -> RawEventRecord {
    RawEventRecord {
        title: clean_text(&record.title),
        description: clean_text(&record.description),
        location: clean_text(&record.location),
        speaker: clean_text(&record.speaker),
        owner: clean_text(&record.owner),
        date: clean_text(&record.date),
        starttime: clean_text(&record.starttime),
        endtime: clean_text(&record.endtime),
        url: record.url.trim().to_string(),
        event_id: record.event_id.trim().to_string(),
    }
}

/// Plain text of an HTML fragment.
pub fn html_to_text(fragment: &str) -> String {
    let parsed = Html::parse_fragment(fragment);
    clean_text(&parsed.root_element().text().collect::<Vec<_>>().join(" "))
}

fn looks_like_markup(text: &str) -> bool {
    text.contains('<') && text.contains('>')
}

fn selector(css: &str) -> Result<Selector, AdapterError> {
    Selector::parse(css).map_err(|e| AdapterError::Message(format!("bad selector {css:?}: {e}")))
}

fn element_text(element: ElementRef<'_>) -> String {
    clean_text(&element.text().collect::<Vec<_>>().join(" "))
}

fn first_text(scope: ElementRef<'_>, sel: &Selector) -> Option<String> {
    scope
        .select(sel)
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty())
}

fn join_url(base: &str, href: &str) -> String {
    match Url::parse(base).and_then(|b| b.join(href)) {
        Ok(joined) => joined.to_string(),
        Err(_) => href.to_string(),
    }
}

#[derive(Debug, Clone)]
struct HtmlListingAdapter {
    source_id: String,
    owner: String,
    targets: Vec<String>,
}

impl HtmlListingAdapter {
    async fn fetch_targets(&self, http: &HttpFetcher, ctx: &AdapterContext) -> Result<Vec<FetchedPage>, AdapterError> {
        let mut pages = Vec::with_capacity(self.targets.len());
        for url in &self.targets {
            let resp = http.fetch_bytes(&self.source_id, url).await?;
            debug!(source_id = %self.source_id, url = %resp.final_url, bytes = resp.body.len(), "fetched listing");
            pages.push(FetchedPage {
                url: resp.final_url.clone(),
                body: resp.text(),
                fetched_at: ctx.fetched_at,
            });
        }
        Ok(pages)
    }
}

#[derive(Debug, Clone)]
struct TribeEventsAdapter(HtmlListingAdapter);

#[derive(Debug, Clone)]
struct DrupalEventsAdapter(HtmlListingAdapter);

#[derive(Debug, Clone)]
struct FixtureAdapter {
    source_id: String,
    owner: String,
    fixture_path: Option<PathBuf>,
}

fn contains_year(text: &str) -> bool {
    text.split(|c: char| !c.is_ascii_digit())
        .any(|run| run.len() == 4)
}

fn parse_tribe_page(page: &FetchedPage, owner: &str) -> Result<Vec<RawEventRecord>, AdapterError> {
    let document = Html::parse_document(&page.body);
    let event_sel = selector("div.type-tribe_events")?;
    let url_sel = selector("a.tribe-event-url")?;
    let heading_link_sel = selector("h2 a[href], h3 a[href]")?;
    let any_link_sel = selector("a[href]")?;
    let schedule_sel = selector(".tribe-event-schedule-details, span.tribe-event-date-start")?;
    let time_sel = selector("span.tribe-event-time")?;
    let venue_sel = selector(".tribe-events-venue-details")?;
    let description_sel = selector(".tribe-events-list-event-description")?;
    let month_sel = selector("h2.tribe-events-list-separator-month")?;

    let separator_year = document
        .select(&month_sel)
        .next()
        .map(element_text)
        .and_then(|t| t.rsplit(' ').next().map(ToString::to_string))
        .filter(|y| y.len() == 4 && y.chars().all(|c| c.is_ascii_digit()));

    let mut records = Vec::new();
    for event in document.select(&event_sel) {
        let link = event
            .select(&url_sel)
            .next()
            .or_else(|| event.select(&heading_link_sel).next())
            .or_else(|| event.select(&any_link_sel).next());
        let Some(link) = link else {
            debug!(page = %page.url, "tribe event without link; skipping");
            continue;
        };
        let href = link.value().attr("href").unwrap_or_default();
        let title = link
            .value()
            .attr("title")
            .map(clean_text)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| element_text(link));
        if title.is_empty() {
            continue;
        }

        let schedule = first_text(event, &schedule_sel).unwrap_or_default();
        let (starttime, mut endtime) = find_time_range(&schedule);
        if endtime.is_empty() {
            endtime = first_text(event, &time_sel).unwrap_or_default();
        }

        let mut date = schedule.clone();
        for t in [&starttime, &endtime] {
            if !t.is_empty() {
                date = date.replace(t.as_str(), "");
            }
        }
        let mut date = clean_text(&date.replace(" at ", " ").replace('@', " "))
            .trim_end_matches(['-', ' '])
            .to_string();
        if let Some(year) = &separator_year {
            if !date.is_empty() && !contains_year(&date) {
                date = format!("{date} {year}");
            }
        }

        let location = first_text(event, &venue_sel)
            .map(|l| clean_text(&l.replace("+ Google Map", "")))
            .unwrap_or_default();
        let description = first_text(event, &description_sel).unwrap_or_default();

        records.push(RawEventRecord {
            title,
            description,
            location,
            speaker: String::new(),
            owner: owner.to_string(),
            date,
            starttime,
            endtime,
            url: join_url(&page.url, href),
            event_id: String::new(),
        });
    }
    Ok(records)
}

fn parse_drupal_page(page: &FetchedPage, owner: &str) -> Result<Vec<RawEventRecord>, AdapterError> {
    let document = Html::parse_document(&page.body);
    let item_sel = selector("ul.unstyled li")?;
    let link_sel = selector("a[href]")?;
    let date_sel = selector("span.date-display-single")?;
    let location_sel = selector("div.location")?;
    let description_sel = selector("div.field-item, div.description, div.summary")?;

    let mut records = Vec::new();
    for item in document.select(&item_sel) {
        let Some(date_span) = item.select(&date_sel).next() else {
            continue;
        };
        let Some(link) = item.select(&link_sel).next() else {
            continue;
        };
        let title = element_text(link);
        let href = link.value().attr("href").unwrap_or_default();

        let (date, starttime, endtime) = match date_span.value().attr("content") {
            Some(stamp) => {
                let (day, clock) = stamp.split_once('T').unwrap_or((stamp, ""));
                let clock = clock.get(..5).unwrap_or(clock);
                match parse_clock_time(clock) {
                    Some(t) => {
                        let start = format_clock_time(t);
                        let end = one_hour_after(&start).unwrap_or_default();
                        (day.to_string(), start, end)
                    }
                    None => (day.to_string(), String::new(), String::new()),
                }
            }
            None => {
                let text = element_text(date_span);
                let (start, end) = find_time_range(&text);
                (text, start, end)
            }
        };

        let speaker = title
            .split_once(':')
            .map(|(_, s)| s.trim().to_string())
            .unwrap_or_default();

        records.push(RawEventRecord {
            title,
            description: first_text(item, &description_sel).unwrap_or_default(),
            location: first_text(item, &location_sel).unwrap_or_default(),
            speaker,
            owner: owner.to_string(),
            date,
            starttime,
            endtime,
            url: join_url(&page.url, href),
            event_id: String::new(),
        });
    }
    Ok(records)
}

#[async_trait]
impl SourceAdapter for TribeEventsAdapter {
    fn source_id(&self) -> &str {
        &self.0.source_id
    }

    fn owner(&self) -> &str {
        &self.0.owner
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::TribeEvents
    }

    async fn fetch(&self, http: &HttpFetcher, ctx: &AdapterContext) -> Result<Vec<FetchedPage>, AdapterError> {
        self.0.fetch_targets(http, ctx).await
    }

    fn parse(&self, pages: &[FetchedPage]) -> Result<Vec<RawEventRecord>, AdapterError> {
        let mut records = Vec::new();
        for page in pages {
            records.extend(parse_tribe_page(page, &self.0.owner)?);
        }
        Ok(records)
    }
}

#[async_trait]
impl SourceAdapter for DrupalEventsAdapter {
    fn source_id(&self) -> &str {
        &self.0.source_id
    }

    fn owner(&self) -> &str {
        &self.0.owner
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::DrupalEvents
    }

    async fn fetch(&self, http: &HttpFetcher, ctx: &AdapterContext) -> Result<Vec<FetchedPage>, AdapterError> {
        self.0.fetch_targets(http, ctx).await
    }

    fn parse(&self, pages: &[FetchedPage]) -> Result<Vec<RawEventRecord>, AdapterError> {
        let mut records = Vec::new();
        for page in pages {
            records.extend(parse_drupal_page(page, &self.0.owner)?);
        }
        Ok(records)
    }
}

impl FixtureAdapter {
    fn resolve_path(&self, workspace_root: &Path) -> PathBuf {
        match &self.fixture_path {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => workspace_root.join(p),
            None => workspace_root
                .join("fixtures")
                .join(&self.source_id)
                .join("events.json"),
        }
    }
}

#[async_trait]
impl SourceAdapter for FixtureAdapter {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn owner(&self) -> &str {
        &self.owner
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Fixture
    }

    async fn fetch(&self, _http: &HttpFetcher, ctx: &AdapterContext) -> Result<Vec<FetchedPage>, AdapterError> {
        let path = self.resolve_path(&ctx.workspace_root);
        let body = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading fixture {}", path.display()))?;
        Ok(vec![FetchedPage {
            url: path.display().to_string(),
            body,
            fetched_at: ctx.fetched_at,
        }])
    }

    fn parse(&self, pages: &[FetchedPage]) -> Result<Vec<RawEventRecord>, AdapterError> {
        let mut records = Vec::new();
        for page in pages {
            let values: Vec<JsonValue> = serde_json::from_str(&page.body)
                .with_context(|| format!("parsing fixture {}", page.url))?;
            for (position, value) in values.into_iter().enumerate() {
                if !value.is_object() {
                    warn!(source_id = %self.source_id, position, "skipping non-object fixture record");
                    continue;
                }
                let mut record: RawEventRecord = match serde_json::from_value(value) {
                    Ok(r) => r,
                    Err(err) => {
                        warn!(source_id = %self.source_id, position, error = %err, "skipping malformed fixture record");
                        continue;
                    }
                };
                if looks_like_markup(&record.description) {
                    record.description = html_to_text(&record.description);
                }
                if record.owner.is_empty() {
                    record.owner = self.owner.clone();
                }
                records.push(clean_record(record));
            }
        }
        Ok(records)
    }
}
