//! Next-renewal date extraction
//!
//! Accepts ISO `YYYY-MM-DD` or `Mon DD, YYYY` forms found near a renewal
//! keyword. Dates must land inside [now − 1 day, now + 400 days]; anything
//! else is a past receipt date or a parser artifact, not a next charge.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use regex::Regex;
use std::sync::LazyLock;

/// Characters of context after a keyword inside which a date counts
const KEYWORD_WINDOW: usize = 80;

static RENEWAL_KEYWORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(renews|renewal|next billing|billed on|trial ends|valid until|expires)")
        .unwrap()
});

static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").unwrap());

static MONTH_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)[a-z]*\.?\s+(\d{1,2}),?\s+(\d{4})\b")
        .unwrap()
});

fn month_number(name: &str) -> Option<u32> {
    match name.to_lowercase().as_str() {
        "jan" => Some(1),
        "feb" => Some(2),
        "mar" => Some(3),
        "apr" => Some(4),
        "may" => Some(5),
        "jun" => Some(6),
        "jul" => Some(7),
        "aug" => Some(8),
        "sep" => Some(9),
        "oct" => Some(10),
        "nov" => Some(11),
        "dec" => Some(12),
        _ => None,
    }
}

/// Dates found in a window, with their byte offsets
fn dates_in(text: &str) -> Vec<(usize, NaiveDate)> {
    let mut found = Vec::new();

    for caps in ISO_DATE.captures_iter(text) {
        let pos = caps.get(0).map(|m| m.start()).unwrap_or(0);
        if let (Ok(y), Ok(m), Ok(d)) = (caps[1].parse(), caps[2].parse(), caps[3].parse()) {
            if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
                found.push((pos, date));
            }
        }
    }

    for caps in MONTH_DATE.captures_iter(text) {
        let pos = caps.get(0).map(|m| m.start()).unwrap_or(0);
        let month = month_number(&caps[1][..3]);
        if let (Some(m), Ok(d), Ok(y)) = (month, caps[2].parse::<u32>(), caps[3].parse::<i32>()) {
            if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
                found.push((pos, date));
            }
        }
    }

    found.sort_by_key(|(pos, _)| *pos);
    found
}

/// Extract the next renewal date as an ISO string
///
/// `now` is injected so the acceptance window is testable.
pub fn extract_next_renewal(haystack: &str, now: DateTime<Utc>) -> Option<String> {
    let today = now.date_naive();
    let min = today - Duration::days(1);
    let max = today + Duration::days(400);

    let dates = dates_in(haystack);
    if dates.is_empty() {
        return None;
    }

    for kw in RENEWAL_KEYWORDS.find_iter(haystack) {
        let window_end = (kw.end() + KEYWORD_WINDOW).min(haystack.len());
        for (pos, date) in &dates {
            if *pos >= kw.start() && *pos < window_end && *date >= min && *date <= max {
                return Some(date.format("%Y-%m-%d").to_string());
            }
        }
    }

    None
}
