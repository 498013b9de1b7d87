//! Transactional / marketing classification
//!
//! Two entry points: `classify` sees the full body and produces the flag set
//! the candidate builder scores with; `quick_screen` sees only headers,
//! subject and snippet before any body fetch, and errs on the side of
//! letting weak signals through so screening never nukes everything.

use serde::Serialize;
use std::collections::HashMap;

use crate::classify::phrases::{
    count_hits, APPLE_RECEIPT_MARKERS, NEGATIVE_PHRASES, POSITIVE_PHRASES, STRONG_TRANSACTIONAL,
};
use crate::resolve::domains::domain_matches;

/// Classifier flag set for one message
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifierFlags {
    /// Bulk-mail headers present (Precedence/Auto-Submitted/List-Id)
    pub bulk_header: bool,
    /// Bulk + negative phrases + zero positive signal
    pub marketing_heavy: bool,
    /// Billing/receipt/subscription signal strong enough to score
    pub likely_transactional: bool,
    /// Apple sender plus receipt markers in the haystack
    pub apple_receipt_hint: bool,
    pub pos_hits: u32,
    pub neg_hits: u32,
}

/// Check the bulk-mail headers
///
/// List-Unsubscribe alone is NOT bulk: too many legitimate receipts carry it.
fn has_bulk_header(headers: &HashMap<String, String>) -> bool {
    if let Some(precedence) = headers.get("precedence") {
        let p = precedence.to_lowercase();
        if p.contains("bulk") || p.contains("list") || p.contains("junk") {
            return true;
        }
    }
    if let Some(auto) = headers.get("auto-submitted") {
        let a = auto.to_lowercase();
        if a.contains("auto-generated") || a.contains("auto-replied") {
            return true;
        }
    }
    headers.contains_key("list-id")
}

/// Classify one message from its full surface
///
/// `headers` is the lowercased-key header map; `from_domain` the sender
/// domain.
pub fn classify(
    subject: &str,
    snippet: &str,
    text: &str,
    headers: &HashMap<String, String>,
    from_domain: &str,
) -> ClassifierFlags {
    let haystack = format!("{} {} {}", subject, snippet, text).to_lowercase();

    let bulk_header = has_bulk_header(headers);
    let pos_hits = count_hits(&haystack, POSITIVE_PHRASES);
    let neg_hits = count_hits(&haystack, NEGATIVE_PHRASES);

    let apple_receipt_hint = domain_matches(from_domain, "apple.com")
        && APPLE_RECEIPT_MARKERS.iter().any(|m| haystack.contains(m));

    let likely_transactional = apple_receipt_hint
        || pos_hits >= 2
        || STRONG_TRANSACTIONAL.iter().any(|p| haystack.contains(p));

    let marketing_heavy = bulk_header && neg_hits >= 1 && pos_hits == 0 && !apple_receipt_hint;

    ClassifierFlags {
        bulk_header,
        marketing_heavy,
        likely_transactional,
        apple_receipt_hint,
        pos_hits,
        neg_hits,
    }
}

/// Why the quick screen let a message through (or not)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenReason {
    Ok,
    HardNo,
    WeakSignal,
    Marketing,
}

impl ScreenReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScreenReason::Ok => "ok",
            ScreenReason::HardNo => "hard_no",
            ScreenReason::WeakSignal => "weak_signal",
            ScreenReason::Marketing => "marketing",
        }
    }
}

/// Quick-screen verdict
#[derive(Debug, Clone, Copy)]
pub struct ScreenVerdict {
    pub ok: bool,
    pub reason: ScreenReason,
}

/// Pre-body-fetch screen using only from + subject + snippet + headers
///
/// `weak_signal` passes: messages with no positive signal but nothing
/// disqualifying stay in so the cluster builder can still see their
/// metadata.
pub fn quick_screen(
    from_email: &str,
    from_domain: &str,
    subject: &str,
    snippet: &str,
    headers: &HashMap<String, String>,
) -> ScreenVerdict {
    let haystack = format!("{} {}", subject, snippet).to_lowercase();

    // Obvious self-notifications and bounces
    if from_email.is_empty() || from_domain.is_empty() {
        return ScreenVerdict {
            ok: false,
            reason: ScreenReason::HardNo,
        };
    }
    if from_email.starts_with("mailer-daemon@") || from_email.starts_with("postmaster@") {
        return ScreenVerdict {
            ok: false,
            reason: ScreenReason::HardNo,
        };
    }

    let flags = classify(subject, snippet, "", headers, from_domain);

    if flags.marketing_heavy {
        return ScreenVerdict {
            ok: false,
            reason: ScreenReason::Marketing,
        };
    }

    if flags.likely_transactional || flags.pos_hits >= 1 {
        return ScreenVerdict {
            ok: true,
            reason: ScreenReason::Ok,
        };
    }

    // No signal either way: let it through for metadata clustering
    ScreenVerdict {
        ok: true,
        reason: ScreenReason::WeakSignal,
    }
}
