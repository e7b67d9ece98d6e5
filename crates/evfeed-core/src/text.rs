//! Text primitives shared by adapters, the field normalizer and the topic vectorizer.

use std::sync::OnceLock;

use chrono::{Duration, NaiveTime};
use regex::Regex;

/// 12-hour clock time with a meridiem marker, e.g. `2:00 PM`, `11:30am`, `9:15 p.m.`.
pub fn clock_time_re() -> &'static Regex {
    static CLOCK_TIME_RE: OnceLock<Regex> = OnceLock::new();
    CLOCK_TIME_RE.get_or_init(|| {
        Regex::new(r"(\d+:\d+\s?(?:AM|PM|am|pm|A\.M\.|P\.M\.|a\.m\.|p\.m\.))")
            .expect("valid clock time regex")
    })
}

fn bare_time_re() -> &'static Regex {
    static BARE_TIME_RE: OnceLock<Regex> = OnceLock::new();
    BARE_TIME_RE.get_or_init(|| {
        Regex::new(r"^(\d{1,2})(?::(\d{2}))?(?::(\d{2}))?(am|pm)?$").expect("valid bare time regex")
    })
}

/// Extracts a `(start, end)` pair of clock times from prose.
///
/// One match yields `(match, "")`, two yield both; zero or more than two
/// matches are ambiguous and yield `("", "")`.
pub fn find_time_range(text: &str) -> (String, String) {
    let found: Vec<&str> = clock_time_re().find_iter(text).map(|m| m.as_str()).collect();
    match found.as_slice() {
        [start] => ((*start).to_string(), String::new()),
        [start, end] => ((*start).to_string(), (*end).to_string()),
        _ => (String::new(), String::new()),
    }
}

/// Parses a standalone clock time (`3:00 PM`, `3pm`, `15:00`, `15:00:00`, `9:15 a.m.`).
///
/// A bare number without minutes or meridiem is rejected.
pub fn parse_clock_time(text: &str) -> Option<NaiveTime> {
    let compact: String = text
        .trim()
        .to_ascii_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '.')
        .collect();
    let caps = bare_time_re().captures(&compact)?;

    let hour: u32 = caps.get(1)?.as_str().parse().ok()?;
    let minute: u32 = match caps.get(2) {
        Some(m) => m.as_str().parse().ok()?,
        None => 0,
    };
    let second: u32 = match caps.get(3) {
        Some(s) => s.as_str().parse().ok()?,
        None => 0,
    };

    let hour = match caps.get(4).map(|m| m.as_str()) {
        Some(meridiem) => {
            if !(1..=12).contains(&hour) {
                return None;
            }
            match (meridiem, hour) {
                ("am", 12) => 0,
                ("am", h) => h,
                ("pm", 12) => 12,
                (_, h) => h + 12,
            }
        }
        None => {
            caps.get(2)?;
            hour
        }
    };

    NaiveTime::from_hms_opt(hour, minute, second)
}

/// Formats a clock time as `h:mm AM/PM` without zero padding on the hour.
pub fn format_clock_time(time: NaiveTime) -> String {
    time.format("%-I:%M %p").to_string()
}

/// Clock time one hour after `text`, if `text` parses as a clock time.
pub fn one_hour_after(text: &str) -> Option<String> {
    let start = parse_clock_time(text)?;
    let (end, _wrapped) = start.overflowing_add_signed(Duration::hours(1));
    Some(format_clock_time(end))
}

/// Transliterates arbitrary Unicode text to its closest ASCII rendering.
pub fn transliterate(text: &str) -> String {
    deunicode::deunicode(text)
}

/// Collapses runs of whitespace into single spaces and trims the ends.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Transliterated, whitespace-collapsed rendering used for every free-text field.
pub fn clean_text(text: &str) -> String {
    collapse_whitespace(&transliterate(text))
}
