//! Platform receipt handling
//!
//! Apple, PayPal and Google Play aggregate other merchants' charges. When
//! the sender is one of these platforms, the real merchant is pulled from
//! the receipt's structured lines instead of the sender surface.

use regex::Regex;
use std::sync::LazyLock;

use crate::resolve::domains::domain_matches;

/// Known payment-aggregating platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Apple,
    PayPal,
    GooglePlay,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Apple => "apple",
            Platform::PayPal => "paypal",
            Platform::GooglePlay => "google_play",
        }
    }
}

/// Identify a platform from the sender domain
pub fn platform_for_domain(domain: &str) -> Option<Platform> {
    if domain_matches(domain, "apple.com") || domain_matches(domain, "itunes.com") {
        return Some(Platform::Apple);
    }
    if domain_matches(domain, "paypal.com") {
        return Some(Platform::PayPal);
    }
    if domain_matches(domain, "google.com") || domain_matches(domain, "googleplay.com") {
        return Some(Platform::GooglePlay);
    }
    None
}

static APP_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^[^\S\n]*App[^\S\n]*:[^\S\n]*(.+)$").unwrap());
static SUBSCRIPTION_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^[^\S\n]*Subscription[^\S\n]*:[^\S\n]*(.+)$").unwrap());
static DEVELOPER_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^[^\S\n]*Developer[^\S\n]*:[^\S\n]*(.+)$").unwrap());
// Free-text forms capture runs of capitalized words so the merchant stops
// before the sentence continues ("subscription to Spotify has renewed")
static PAID_TO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)you (?:paid|sent)[^\n]{0,24}? to ((?-i)[A-Z][\w&'.-]*(?: [A-Z][\w&'.-]*)*)")
        .unwrap()
});
static SUBSCRIPTION_TO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)subscription to ((?-i)[A-Z][\w&'.-]*(?: [A-Z][\w&'.-]*)*)").unwrap()
});

/// Tidy a captured merchant value
///
/// App Store lines carry taglines after a colon (`LinkedIn: Network & Job
/// Finder`); the merchant is the part before it.
fn clean_value(raw: &str) -> Option<String> {
    let mut value = raw.trim();
    if let Some((head, _)) = value.split_once(':') {
        value = head.trim();
    }
    if let Some((head, _)) = value.split_once(" - ") {
        value = head.trim();
    }
    let value = value.trim_end_matches(['.', ',']).trim();
    if value.len() < 2 {
        return None;
    }
    Some(value.chars().take(40).collect())
}

/// Extract the real merchant from a platform receipt body
pub fn extract_platform_merchant(platform: Platform, text: &str) -> Option<String> {
    let ordered: &[&LazyLock<Regex>] = match platform {
        Platform::Apple => &[&APP_LINE, &SUBSCRIPTION_LINE, &DEVELOPER_LINE, &SUBSCRIPTION_TO],
        Platform::PayPal => &[&PAID_TO, &SUBSCRIPTION_TO, &SUBSCRIPTION_LINE],
        Platform::GooglePlay => &[&APP_LINE, &SUBSCRIPTION_LINE, &DEVELOPER_LINE, &SUBSCRIPTION_TO],
    };

    for pattern in ordered {
        if let Some(caps) = pattern.captures(text) {
            if let Some(value) = clean_value(&caps[1]) {
                return Some(value);
            }
        }
    }
    None
}
