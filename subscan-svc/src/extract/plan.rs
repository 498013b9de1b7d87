//! Plan label extraction
//!
//! Two accepted shapes: a labelled field (`Plan: Premium`) or a titled
//! period suffix (`Premium (Monthly)`).

use regex::Regex;
use std::sync::LazyLock;

static LABELLED_PLAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[^\S\n]*(?:plan|membership|subscription)[^\S\n]*:[^\S\n]*([^\n,;.]{2,60})")
        .unwrap()
});

static TITLED_PLAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Z][A-Za-z0-9+&' ]{1,40})\s*\((Monthly|Yearly|Weekly)\)").unwrap()
});

/// Extract a plan label from the haystack
pub fn extract_plan(haystack: &str) -> Option<String> {
    if let Some(caps) = LABELLED_PLAN.captures(haystack) {
        let value = caps[1].trim().to_string();
        if value.len() >= 2 {
            return Some(value);
        }
    }

    if let Some(caps) = TITLED_PLAN.captures(haystack) {
        return Some(format!("{} ({})", caps[1].trim(), &caps[2]));
    }

    None
}
