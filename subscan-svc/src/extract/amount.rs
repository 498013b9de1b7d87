//! Amount and currency extraction
//!
//! Scans the haystack for symbol- and code-denominated money patterns,
//! preferring amounts that sit within ±60 characters of a billing keyword.
//! The decimal convention is detected from the rightmost separator, so both
//! `1.234,56` and `1,234.56` parse correctly.

use regex::Regex;
use std::sync::LazyLock;

/// Window around billing keywords inside which an amount is preferred
const KEYWORD_WINDOW: usize = 60;

/// Billing keywords that anchor an amount to a charge
const BILLING_KEYWORDS: &[&str] = &[
    "total",
    "charged",
    "you paid",
    "amount due",
    "amount paid",
    "invoice",
    "receipt",
    "renewal",
    "subscription",
    "billed",
    "payment",
];

static SYMBOL_AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(US\$|C\$|A\$|NZ\$|\$|€|£|¥)\s*([0-9][0-9.,]*)").unwrap()
});

static AMOUNT_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b([0-9][0-9.,]*)\s?(USD|EUR|GBP|CAD|AUD|NZD|JPY|INR|CHF|SEK|NOK|DKK|BRL|MXN|PLN)\b")
        .unwrap()
});

static CODE_AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(USD|EUR|GBP|CAD|AUD|NZD|JPY|INR|CHF|SEK|NOK|DKK|BRL|MXN|PLN)\s?([0-9][0-9.,]*)")
        .unwrap()
});

fn currency_for_symbol(symbol: &str) -> &'static str {
    match symbol.to_uppercase().as_str() {
        "US$" | "$" => "USD",
        "C$" => "CAD",
        "A$" => "AUD",
        "NZ$" => "NZD",
        "€" => "EUR",
        "£" => "GBP",
        "¥" => "JPY",
        _ => "USD",
    }
}

/// Parse a raw digits-and-separators token using the rightmost separator as
/// the decimal convention
fn parse_number(raw: &str) -> Option<f64> {
    let raw = raw.trim_end_matches(['.', ',']);
    if raw.is_empty() {
        return None;
    }

    let last_dot = raw.rfind('.');
    let last_comma = raw.rfind(',');

    let (decimal_sep, decimal_pos) = match (last_dot, last_comma) {
        (Some(d), Some(c)) => {
            if d > c {
                ('.', Some(d))
            } else {
                (',', Some(c))
            }
        }
        (Some(d), None) => ('.', Some(d)),
        (None, Some(c)) => (',', Some(c)),
        (None, None) => (' ', None),
    };

    let normalized = match decimal_pos {
        Some(pos) => {
            let frac_len = raw.len() - pos - 1;
            if frac_len == 3 && raw.matches(decimal_sep).count() >= 1 && !raw[..pos].contains(['.', ',']) {
                // A lone separator with exactly three trailing digits is a
                // thousands separator: 1.234 → 1234
                raw.replace(['.', ','], "")
            } else {
                let thousands: String = raw
                    .chars()
                    .enumerate()
                    .filter_map(|(i, ch)| {
                        if ch == '.' || ch == ',' {
                            if i == pos {
                                Some('.')
                            } else {
                                None
                            }
                        } else {
                            Some(ch)
                        }
                    })
                    .collect();
                thousands
            }
        }
        None => raw.to_string(),
    };

    normalized.parse::<f64>().ok()
}

/// Extracted money value
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedAmount {
    pub amount: f64,
    pub currency: String,
}

/// Extract the most plausible charge amount from a haystack
pub fn extract_amount(haystack: &str) -> Option<ExtractedAmount> {
    let lower = haystack.to_lowercase();

    let keyword_positions: Vec<usize> = BILLING_KEYWORDS
        .iter()
        .flat_map(|kw| lower.match_indices(kw).map(|(i, _)| i))
        .collect();

    let mut matches: Vec<(usize, ExtractedAmount)> = Vec::new();

    for caps in SYMBOL_AMOUNT.captures_iter(haystack) {
        let pos = caps.get(0).map(|m| m.start()).unwrap_or(0);
        if let Some(amount) = parse_number(&caps[2]) {
            matches.push((
                pos,
                ExtractedAmount {
                    amount,
                    currency: currency_for_symbol(&caps[1]).to_string(),
                },
            ));
        }
    }
    for caps in AMOUNT_CODE.captures_iter(haystack) {
        let pos = caps.get(0).map(|m| m.start()).unwrap_or(0);
        if let Some(amount) = parse_number(&caps[1]) {
            matches.push((
                pos,
                ExtractedAmount {
                    amount,
                    currency: caps[2].to_uppercase(),
                },
            ));
        }
    }
    for caps in CODE_AMOUNT.captures_iter(haystack) {
        let pos = caps.get(0).map(|m| m.start()).unwrap_or(0);
        if let Some(amount) = parse_number(&caps[2]) {
            matches.push((
                pos,
                ExtractedAmount {
                    amount,
                    currency: caps[1].to_uppercase(),
                },
            ));
        }
    }

    matches.retain(|(_, m)| m.amount > 0.0 && m.amount <= 1_000_000.0);
    if matches.is_empty() {
        return None;
    }
    matches.sort_by_key(|(pos, _)| *pos);

    let near_keyword = |pos: usize| {
        keyword_positions
            .iter()
            .any(|kp| pos.abs_diff(*kp) <= KEYWORD_WINDOW)
    };

    matches
        .iter()
        .find(|(pos, _)| near_keyword(*pos))
        .or_else(|| matches.first())
        .map(|(_, m)| m.clone())
}
