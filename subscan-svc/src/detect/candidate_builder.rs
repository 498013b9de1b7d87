//! Per-message candidate construction
//!
//! Pure pipeline: normalize → resolve → classify → extract → score. Drops
//! are result values, never errors; each drop carries a low-PII near-miss
//! sample so chunk stats can explain what the scan rejected.

use chrono::{DateTime, Utc};

use crate::classify::{classify, ClassifierFlags};
use crate::extract::{
    extract_amount, extract_cadence_keyword, extract_next_renewal, extract_plan,
    extract_platform_merchant, platform_for_domain,
};
use crate::mail::normalize::{build_surface, normalize_body};
use crate::mail::{EmailBody, EmailMeta};
use crate::models::{
    BillingEventType, Cadence, Candidate, ConfidenceLabel, EvidenceSample, EvidenceType,
    Fingerprint,
};
use crate::resolve::{resolve, MatchReason, MerchantMatch};
use crate::store::{DirectoryEntry, UserOverride};

/// Confidence floor for trial evidence
const TRIAL_FLOOR: u8 = 35;
/// Confidence floor for everything else
const DEFAULT_FLOOR: u8 = 45;
/// Ceiling when no concrete billing fact was extracted
const NO_FACTS_CAP: i32 = 55;

/// Why a message produced no candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    MarketingHeavy,
    LowConfidence,
    NoMerchant,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::MarketingHeavy => "marketingHeavy",
            DropReason::LowConfidence => "lowConfidence",
            DropReason::NoMerchant => "noMerchant",
        }
    }
}

/// Low-PII sample of a dropped message for diagnostics
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NearMiss {
    pub sender_domain: String,
    pub subject: String,
    pub reason: &'static str,
    pub confidence: Option<u8>,
}

/// Build result: a candidate or an explained drop
#[derive(Debug)]
pub enum BuildOutcome {
    Candidate(Box<Candidate>),
    Dropped {
        reason: DropReason,
        near_miss: NearMiss,
    },
}

fn near_miss(meta: &EmailMeta, reason: DropReason, confidence: Option<u8>) -> NearMiss {
    NearMiss {
        sender_domain: meta.from_domain.clone(),
        subject: meta.subject.chars().take(80).collect(),
        reason: reason.as_str(),
        confidence,
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Classify the billing event a message describes
fn determine_event_type(
    haystack: &str,
    flags: &ClassifierFlags,
    has_amount: bool,
    is_trial: bool,
    platform_receipt: bool,
) -> BillingEventType {
    if contains_any(haystack, &["funds added", "top up", "top-up", "wallet reload"]) {
        return BillingEventType::TopUp;
    }
    if contains_any(haystack, &["ad spend", "advertising spend", "campaign budget", "your campaign"]) {
        return BillingEventType::AdSpend;
    }
    if contains_any(
        haystack,
        &["payment failed", "payment was declined", "could not process your payment", "unable to charge"],
    ) {
        return BillingEventType::PaymentFailed;
    }
    if contains_any(
        haystack,
        &["subscription paused", "membership paused", "subscription is on hold"],
    ) {
        return BillingEventType::Paused;
    }
    if contains_any(
        haystack,
        &[
            "has been canceled",
            "has been cancelled",
            "was canceled",
            "was cancelled",
            "cancellation confirmed",
        ],
    ) {
        return BillingEventType::Cancellation;
    }
    if is_trial && !has_amount {
        return BillingEventType::Trial;
    }
    // A charge receipt wins over a renewal mention: receipts routinely
    // announce the next renewal date in the same breath
    if has_amount && flags.likely_transactional {
        if platform_receipt
            || contains_any(
                haystack,
                &[
                    "receipt",
                    "you paid",
                    "you were charged",
                    "we charged",
                    "payment successful",
                    "invoice",
                    "order confirmation",
                ],
            )
        {
            return BillingEventType::Receipt;
        }
        if contains_any(haystack, &["subscription renewed", "has renewed", "renews on", "renewal date"]) {
            return BillingEventType::Renewal;
        }
        return BillingEventType::BillingSignal;
    }
    if contains_any(haystack, &["subscription renewed", "has renewed", "renews on", "renewal date"])
        && flags.likely_transactional
    {
        return BillingEventType::Renewal;
    }
    if flags.likely_transactional {
        return BillingEventType::BillingSignalNoAmount;
    }
    if flags.marketing_heavy {
        return BillingEventType::Marketing;
    }
    BillingEventType::Unknown
}

/// Does the haystack show hard billing proof for a fallback-resolved sender?
fn strong_billing_proof(flags: &ClassifierFlags, has_amount: bool) -> bool {
    flags.pos_hits >= 2 && has_amount
}

/// Keyword-resolved merchant whose from-domain belongs to a different
/// directory merchant is a conflict, not a corroboration
fn keyword_conflict(
    resolution: &MerchantMatch,
    directory: &[DirectoryEntry],
    from_domain: &str,
) -> bool {
    if resolution.reason != MatchReason::Keywords {
        return false;
    }
    let Some(resolved) = &resolution.canonical else {
        return false;
    };
    directory.iter().any(|entry| {
        entry.canonical_name != *resolved
            && entry
                .sender_domains
                .iter()
                .any(|d| crate::resolve::domains::domain_matches(from_domain, d))
    })
}

/// Build a candidate (or an explained drop) from one message
pub fn build_candidate(
    meta: &EmailMeta,
    body: Option<&EmailBody>,
    directory: &[DirectoryEntry],
    overrides: &[UserOverride],
    now: DateTime<Utc>,
) -> BuildOutcome {
    let text = body
        .map(|b| normalize_body(&b.text))
        .unwrap_or_default();
    let html = body.map(|b| b.html.as_str()).unwrap_or_default();

    let surface = build_surface(meta, &text, html);
    let resolution = resolve(&surface, directory, overrides);
    let flags = classify(
        &meta.subject,
        &meta.snippet,
        &text,
        &meta.headers,
        &meta.from_domain,
    );

    if flags.marketing_heavy && !flags.likely_transactional {
        return BuildOutcome::Dropped {
            reason: DropReason::MarketingHeavy,
            near_miss: near_miss(meta, DropReason::MarketingHeavy, None),
        };
    }

    // Platform receipts name the real merchant in the body
    let platform = platform_for_domain(&meta.from_domain);
    let platform_merchant = platform.and_then(|p| extract_platform_merchant(p, &text));
    let platform_extracted = platform_merchant.is_some();

    let merchant = platform_merchant
        .or_else(|| resolution.display_name().map(|s| s.to_string()));
    let Some(merchant) = merchant else {
        return BuildOutcome::Dropped {
            reason: DropReason::NoMerchant,
            near_miss: near_miss(meta, DropReason::NoMerchant, None),
        };
    };

    let haystack = &surface.haystack;
    let amount = extract_amount(haystack);
    let next_renewal = extract_next_renewal(haystack, now);
    let plan = extract_plan(&text);

    // Cadence keywords are only meaningful on billing-shaped messages
    let cadence: Option<Cadence> = if flags.likely_transactional || next_renewal.is_some() {
        extract_cadence_keyword(haystack)
    } else {
        None
    };

    let is_trial = contains_any(haystack, &["trial ends", "free trial", "your trial", "trial period"]);

    let event_type = determine_event_type(
        haystack,
        &flags,
        amount.is_some(),
        is_trial,
        platform_extracted,
    );

    // Additive, explainable scoring
    let mut reasons: Vec<String> = Vec::new();
    let mut score: i32 = 0;

    let resolver_part = ((resolution.confidence as f64) * 0.6).round() as i32;
    let resolver_part = resolver_part.min(60);
    score += resolver_part;
    reasons.push(format!(
        "merchant via {} (+{})",
        resolution.reason.as_str(),
        resolver_part
    ));

    if flags.likely_transactional {
        score += 12;
        reasons.push("transactional signals (+12)".to_string());
    }
    if platform_extracted {
        score += 10;
        reasons.push("platform receipt merchant (+10)".to_string());
    }
    if amount.is_some() && flags.likely_transactional {
        score += 10;
        reasons.push("amount on transactional message (+10)".to_string());
    }
    if next_renewal.is_some() {
        score += 8;
        reasons.push("next renewal date (+8)".to_string());
    }
    if cadence.is_some() {
        score += 4;
        reasons.push("explicit cadence (+4)".to_string());
    }
    if resolution.reason == MatchReason::FallbackDomain
        && strong_billing_proof(&flags, amount.is_some())
    {
        score += 18;
        reasons.push("unknown sender with strong billing proof (+18)".to_string());
    }
    if flags.bulk_header {
        score -= 10;
        reasons.push("bulk-mail headers (-10)".to_string());
    }
    if resolution.signals.consumer_from {
        score -= 15;
        reasons.push("consumer sender domain (-15)".to_string());
    }
    if keyword_conflict(&resolution, directory, &meta.from_domain) {
        score -= 30;
        reasons.push("keyword match conflicts with sender domain (-30)".to_string());
    }

    if amount.is_none() && next_renewal.is_none() && cadence.is_none() && !is_trial {
        score = score.min(NO_FACTS_CAP);
    }
    let confidence = score.clamp(0, 100) as u8;

    let floor = if is_trial { TRIAL_FLOOR } else { DEFAULT_FLOOR };
    if confidence < floor {
        return BuildOutcome::Dropped {
            reason: DropReason::LowConfidence,
            near_miss: near_miss(meta, DropReason::LowConfidence, Some(confidence)),
        };
    }

    let evidence_type = if platform_extracted {
        EvidenceType::PlatformReceipt
    } else if is_trial {
        EvidenceType::Trial
    } else if flags.likely_transactional {
        EvidenceType::Transactional
    } else {
        EvidenceType::Unknown
    };

    let fingerprint = Fingerprint::Email {
        merchant: &merchant,
        sender_domain: &meta.from_domain,
        amount: amount.as_ref().map(|a| a.amount),
        currency: amount.as_ref().map(|a| a.currency.as_str()),
    }
    .compute();

    let evidence = EvidenceSample {
        from: meta.from.clone(),
        subject: meta.subject.clone(),
        snippet: meta.snippet.clone(),
        sender_email: meta.from_email.clone(),
        sender_domain: meta.from_domain.clone(),
        date_ms: meta.date_ms.unwrap_or(0),
    };

    let label = ConfidenceLabel::from_score(confidence);

    BuildOutcome::Candidate(Box::new(Candidate {
        fingerprint,
        merchant,
        plan,
        amount: amount.as_ref().map(|a| a.amount),
        currency: amount.map(|a| a.currency),
        cadence_guess: cadence,
        next_date_guess: next_renewal,
        confidence,
        confidence_label: label,
        evidence_type,
        reasons,
        evidence: evidence.clone(),
        evidence_samples: vec![evidence],
        needs_confirm: label != ConfidenceLabel::High,
        event_type,
        exclude_from_spend: event_type.is_status_only(),
    }))
}
