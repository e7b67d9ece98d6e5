//! Field normalizer: free-text dates and time ranges into canonical values.

use std::path::Path;
use std::sync::OnceLock;

use anyhow::{ensure, Context, Result};
use chrono::{Datelike, Local, NaiveDate};
use evfeed_core::text::{clock_time_re, one_hour_after, parse_clock_time};
use evfeed_core::{CanonicalEvent, RawEventRecord};
use regex::Regex;
use serde::Deserialize;

pub const CANONICAL_DATE_FORMAT: &str = "%d-%m-%Y";

const RULES_VERSION: u32 = 1;

const BUILTIN_STRIP_LITERALS: &[&str] = &["Date TBD", "EDT", "Special time:", "Wu & Chen Auditorium"];

const BUILTIN_PATTERNS: &[&str] = &[
    r"^[a-zA-Z]+, ([a-zA-Z]+ [0-9]{1,2}, [0-9]{4}).*",
    r"^([a-zA-Z]+ [0-9]{1,2}, [0-9]{4}) .*",
    r"^([a-zA-Z]+ [0-9]{1,2}) @.*",
    r"^([a-zA-Z]{3}\.? [0-9]{1,2}, [0-9]{4}) .*",
    r"^([a-zA-Z]{3} [0-9]{1,2} [0-9]{4})[0-9]{1,2}:[0-9]{2}.*",
    r"^[a-zA-Z]{3}, ([0-9/]{10}) .*",
    r"^[a-zA-Z]+, ([0-9]{1,2} [a-zA-Z]+ [0-9]{4})[— ]-?.*",
    r"^([0-9]{1,2} [a-zA-Z]{3} [0-9]{4}) .*",
];

#[derive(Debug, Clone, Deserialize)]
struct DateCleanupRulesFile {
    version: u32,
    #[serde(default)]
    strip_literals: Vec<String>,
    #[serde(default)]
    patterns: Vec<String>,
}

/// Ordered cleanup applied when a date does not parse as-is.
///
/// `strip_literals` are removed verbatim; `patterns` are tried in order and the
/// first match's capture group 1 is re-parsed.
#[derive(Debug, Clone)]
pub struct DateCleanupRules {
    strip_literals: Vec<String>,
    patterns: Vec<Regex>,
}

impl Default for DateCleanupRules {
    fn default() -> Self {
        Self::builtin()
    }
}

impl DateCleanupRules {
    /// Compiled once per process; clones share the compiled patterns.
    pub fn builtin() -> Self {
        static BUILTIN: OnceLock<DateCleanupRules> = OnceLock::new();
        BUILTIN
            .get_or_init(|| Self {
                strip_literals: BUILTIN_STRIP_LITERALS.iter().map(ToString::to_string).collect(),
                patterns: BUILTIN_PATTERNS
                    .iter()
                    .map(|p| Regex::new(p).expect("valid builtin date pattern"))
                    .collect(),
            })
            .clone()
    }

    pub fn new(strip_literals: Vec<String>, patterns: &[String]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(p).with_context(|| format!("compiling date pattern {p:?}")))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            strip_literals,
            patterns,
        })
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let file: DateCleanupRulesFile = serde_yaml::from_str(text).context("parsing date cleanup rules")?;
        ensure!(
            file.version == RULES_VERSION,
            "unsupported date cleanup rules version {} (expected {RULES_VERSION})",
            file.version
        );
        Self::new(file.strip_literals, &file.patterns)
    }

    /// Loads `rules/date_cleanup.yaml` under `root`, falling back to the builtin rules.
    pub fn from_workspace_root(root: &Path) -> Result<Self> {
        let path = root.join("rules").join("date_cleanup.yaml");
        if !path.exists() {
            return Ok(Self::builtin());
        }
        let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("loading {}", path.display()))
    }

    pub fn patterns(&self) -> &[Regex] {
        &self.patterns
    }

    fn clean(&self, text: &str) -> String {
        let mut cleaned = text.to_string();
        for literal in &self.strip_literals {
            if !literal.is_empty() {
                cleaned = cleaned.replace(literal.as_str(), "");
            }
        }
        cleaned = cleaned.replace('\n', " ").replace('-', "");
        cleaned = clock_time_re().replace_all(&cleaned, "").into_owned();
        cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

/// Canonicalizes raw records. Never fails: unparseable values come back empty.
#[derive(Debug, Clone)]
pub struct FieldNormalizer {
    rules: DateCleanupRules,
    reference: NaiveDate,
}

impl Default for FieldNormalizer {
    fn default() -> Self {
        Self::new(DateCleanupRules::builtin())
    }
}

impl FieldNormalizer {
    pub fn new(rules: DateCleanupRules) -> Self {
        Self {
            rules,
            reference: Local::now().date_naive(),
        }
    }

    /// Date used to fill a missing year or day.
    pub fn with_reference_date(mut self, reference: NaiveDate) -> Self {
        self.reference = reference;
        self
    }

    /// `DD-MM-YYYY`, or empty when the text cannot be read as a date.
    pub fn normalize_date(&self, text: &str) -> String {
        self.resolve_date(text)
            .map(|d| d.format(CANONICAL_DATE_FORMAT).to_string())
            .unwrap_or_default()
    }

    fn resolve_date(&self, text: &str) -> Option<NaiveDate> {
        if let Some(date) = parse_free_date(text, self.reference) {
            return Some(date);
        }

        let cleaned = self.rules.clean(text);
        if cleaned.is_empty() {
            return None;
        }
        for pattern in &self.rules.patterns {
            if let Some(caps) = pattern.captures(&cleaned) {
                let fragment = caps.get(1).map_or("", |m| m.as_str());
                return parse_free_date(fragment, self.reference);
            }
        }
        parse_free_date(&cleaned, self.reference)
    }

    /// Builds the canonical form of `raw`; `endtime` is only derived when the source left it empty.
    pub fn canonicalize(&self, raw: RawEventRecord, event_index: u64) -> CanonicalEvent {
        let date_dt = self.normalize_date(&raw.date);
        let starttime = normalize_starttime(&raw);
        let endtime = if raw.endtime.trim().is_empty() {
            normalize_endtime(&raw)
        } else {
            raw.endtime.clone()
        };
        CanonicalEvent::from_raw(raw, date_dt, starttime, endtime, event_index)
    }
}

/// Normalizes with the builtin cleanup rules and today as reference date.
pub fn normalize_date(text: &str) -> String {
    FieldNormalizer::default().normalize_date(text)
}

/// Start of a `start - end` range, or the start time unchanged.
pub fn normalize_starttime(record: &RawEventRecord) -> String {
    match record.starttime.split_once('-') {
        Some((start, _)) => start.trim().to_string(),
        None => record.starttime.clone(),
    }
}

/// End of a `start - end` range; else start plus one hour; else the existing end time.
pub fn normalize_endtime(record: &RawEventRecord) -> String {
    if let Some((_, end)) = record.starttime.rsplit_once('-') {
        return end.trim().to_string();
    }
    one_hour_after(&record.starttime).unwrap_or_else(|| record.endtime.clone())
}

const MONTHS: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

const WEEKDAYS: [&str; 7] = ["monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday"];

const JUMP_WORDS: &[&str] = &["at", "on", "and", "of", "the", "st", "nd", "rd", "th"];

const TIMEZONES: &[&str] = &["est", "edt", "cst", "cdt", "mst", "mdt", "pst", "pdt", "gmt", "utc", "et"];

const MERIDIEMS: &[&str] = &["am", "pm", "a.m.", "p.m.", "a.m", "p.m"];

fn is_meridiem(token: &str) -> bool {
    MERIDIEMS.contains(&token) || MERIDIEMS.contains(&token.trim_end_matches(['.', ';']))
}

fn name_prefix_match(token: &str, names: &[&str]) -> Option<usize> {
    if token.len() < 3 {
        return None;
    }
    names.iter().position(|name| name.starts_with(token))
}

fn strip_ordinal(token: &str) -> &str {
    for suffix in ["st", "nd", "rd", "th"] {
        if let Some(stripped) = token.strip_suffix(suffix) {
            if !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_digit()) {
                return stripped;
            }
        }
    }
    token
}

fn expand_year(value: u32, digits: usize) -> i32 {
    if digits <= 2 {
        2000 + value as i32
    } else {
        value as i32
    }
}

fn is_clock_token(token: &str) -> bool {
    if token.contains(':') || token.ends_with("am") || token.ends_with("pm") {
        return token
            .split('-')
            .filter(|part| !part.is_empty())
            .all(|part| parse_clock_time(part).is_some());
    }
    false
}

#[derive(Debug, Default)]
struct DateParts {
    year: Option<i32>,
    month: Option<u32>,
    day: Option<u32>,
    numbers: Vec<(u32, usize)>,
}

impl DateParts {
    fn set_numeric_date(&mut self, token: &str) -> Option<()> {
        if self.year.is_some() || self.month.is_some() || self.day.is_some() {
            return None;
        }
        let sep = ['/', '.', '-'].into_iter().find(|s| token.contains(*s))?;
        let parts: Vec<&str> = token.split(sep).collect();
        if parts.iter().any(|p| p.is_empty() || !p.chars().all(|c| c.is_ascii_digit())) {
            return None;
        }
        let values: Vec<u32> = parts.iter().map(|p| p.parse().ok()).collect::<Option<_>>()?;
        match (parts.as_slice(), values.as_slice()) {
            ([y, _, _], [yv, m, d]) if y.len() == 4 => {
                self.year = Some(*yv as i32);
                self.month = Some(*m);
                self.day = Some(*d);
            }
            ([_, _, y], [a, b, yv]) => {
                let (m, d) = if *a > 12 && *b <= 12 { (*b, *a) } else { (*a, *b) };
                self.year = Some(expand_year(*yv, y.len()));
                self.month = Some(m);
                self.day = Some(d);
            }
            ([_, _], [a, b]) => {
                let (m, d) = if *a > 12 && *b <= 12 { (*b, *a) } else { (*a, *b) };
                self.month = Some(m);
                self.day = Some(d);
            }
            _ => return None,
        }
        Some(())
    }

    fn resolve(self, reference: NaiveDate) -> Option<NaiveDate> {
        let DateParts {
            mut year,
            month,
            mut day,
            numbers,
        } = self;

        if month.is_some() || day.is_some() || year.is_some() {
            for (value, digits) in numbers {
                if digits == 4 || value > 31 {
                    if year.replace(expand_year(value, digits)).is_some() {
                        return None;
                    }
                } else if day.is_none() {
                    day = Some(value);
                } else if year.is_none() {
                    year = Some(expand_year(value, digits));
                } else {
                    return None;
                }
            }
        } else {
            match numbers.as_slice() {
                [] => return None,
                [(value, 4)] => year = Some(*value as i32),
                [(value, _)] if *value <= 31 => day = Some(*value),
                _ => return None,
            }
        }

        let year = year.unwrap_or_else(|| reference.year());
        let month = month.unwrap_or_else(|| reference.month());
        match day {
            Some(d) => NaiveDate::from_ymd_opt(year, month, d),
            None => {
                let mut d = reference.day();
                loop {
                    if let Some(date) = NaiveDate::from_ymd_opt(year, month, d) {
                        return Some(date);
                    }
                    if d <= 28 {
                        return None;
                    }
                    d -= 1;
                }
            }
        }
    }
}

/// General free-form date reader.
///
/// Skips weekday names, clock times, timezone abbreviations and filler words;
/// any other unrecognized word is a failure. Numeric `a/b/c` dates are read
/// month-first. Missing year or day come from `reference`.
pub fn parse_free_date(text: &str, reference: NaiveDate) -> Option<NaiveDate> {
    let lowered = text.to_lowercase().replace(',', " ");
    let mut parts = DateParts::default();
    let mut saw_component = false;

    let mut tokens = lowered.split_whitespace().peekable();
    while let Some(raw_token) = tokens.next() {
        let token = raw_token.trim_end_matches(['.', ';']);
        if token.is_empty()
            || token.chars().all(|c| matches!(c, '-' | '.' | ',' | ';' | '/' | '\''))
            || JUMP_WORDS.contains(&token)
            || TIMEZONES.contains(&token)
            || is_meridiem(raw_token)
        {
            continue;
        }

        if let Some(idx) = name_prefix_match(token, &MONTHS) {
            if parts.month.replace(idx as u32 + 1).is_some() {
                return None;
            }
            saw_component = true;
            continue;
        }
        if name_prefix_match(token, &WEEKDAYS).is_some() {
            continue;
        }

        let (date_token, time_tail) = match token.split_once('t') {
            Some((head, tail)) if head.len() == 10 && head.chars().next().is_some_and(|c| c.is_ascii_digit()) => {
                (head, Some(tail))
            }
            _ => (token, None),
        };
        if let Some(tail) = time_tail {
            let clock = tail.get(..5).unwrap_or(tail);
            parse_clock_time(clock)?;
        }

        let digits = strip_ordinal(date_token);
        if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
            // "4 pm": a bare hour with a separate meridiem word is a clock time.
            if digits.len() == date_token.len()
                && digits.len() <= 2
                && tokens.peek().is_some_and(|next| is_meridiem(next))
                && digits.parse::<u32>().is_ok_and(|h| (1..=12).contains(&h))
            {
                tokens.next();
                continue;
            }
            parts.numbers.push((digits.parse().ok()?, digits.len()));
            saw_component = true;
            continue;
        }
        if is_clock_token(date_token) {
            continue;
        }
        if date_token.chars().any(|c| matches!(c, '/' | '.' | '-')) {
            parts.set_numeric_date(date_token)?;
            saw_component = true;
            continue;
        }
        return None;
    }

    if !saw_component {
        return None;
    }
    parts.resolve(reference)
}
