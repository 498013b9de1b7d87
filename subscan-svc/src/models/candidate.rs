//! Subscription candidate types
//!
//! A candidate is one deduplicated (session, fingerprint) row describing a
//! potential subscription, with evidence samples and an explainable
//! confidence score. Candidates are never mutated once persisted; the
//! fingerprint makes duplicate inserts collapse silently.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Billing cadence guess
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    Weekly,
    Biweekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl Cadence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cadence::Weekly => "weekly",
            Cadence::Biweekly => "biweekly",
            Cadence::Monthly => "monthly",
            Cadence::Quarterly => "quarterly",
            Cadence::Yearly => "yearly",
        }
    }
}

/// Kind of evidence backing a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceType {
    Transactional,
    PlatformReceipt,
    Trial,
    Cluster,
    Unknown,
}

/// Billing event classification for one candidate
///
/// Priority ordering drives best-per-merchant selection; the gate events
/// (`TopUp`, `AdSpend`, `Promo`) only exist to be dropped by the strict
/// post-process pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingEventType {
    Receipt,
    Renewal,
    Trial,
    PaymentFailed,
    Paused,
    Cancellation,
    BillingSignal,
    BillingSignalNoAmount,
    Marketing,
    Unknown,
    TopUp,
    AdSpend,
    Promo,
}

impl BillingEventType {
    /// Ranking priority for best-per-merchant selection (§4.F)
    pub fn priority(&self) -> i64 {
        match self {
            BillingEventType::Receipt => 100,
            BillingEventType::Renewal => 90,
            BillingEventType::BillingSignal => 80,
            BillingEventType::BillingSignalNoAmount => 70,
            BillingEventType::Trial => 60,
            BillingEventType::PaymentFailed => 50,
            BillingEventType::Paused => 40,
            BillingEventType::Cancellation => 35,
            BillingEventType::Unknown => 20,
            BillingEventType::Marketing => 0,
            // Gate events never survive post-processing
            BillingEventType::TopUp | BillingEventType::AdSpend | BillingEventType::Promo => 0,
        }
    }

    /// Status-only events: amount is shown as context, not spend
    pub fn is_status_only(&self) -> bool {
        matches!(self, BillingEventType::Paused | BillingEventType::PaymentFailed)
    }

    /// Events removed wholesale by the strict gate
    pub fn is_gated(&self) -> bool {
        matches!(
            self,
            BillingEventType::TopUp | BillingEventType::AdSpend | BillingEventType::Promo
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BillingEventType::Receipt => "receipt",
            BillingEventType::Renewal => "renewal",
            BillingEventType::Trial => "trial",
            BillingEventType::PaymentFailed => "payment_failed",
            BillingEventType::Paused => "paused",
            BillingEventType::Cancellation => "cancellation",
            BillingEventType::BillingSignal => "billing_signal",
            BillingEventType::BillingSignalNoAmount => "billing_signal_no_amount",
            BillingEventType::Marketing => "marketing",
            BillingEventType::Unknown => "unknown",
            BillingEventType::TopUp => "top_up",
            BillingEventType::AdSpend => "ad_spend",
            BillingEventType::Promo => "promo",
        }
    }
}

/// Human-facing confidence band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceLabel {
    Low,
    Medium,
    High,
}

impl ConfidenceLabel {
    /// Band thresholds: ≥80 High, ≥55 Medium, else Low
    pub fn from_score(score: u8) -> Self {
        if score >= 80 {
            ConfidenceLabel::High
        } else if score >= 55 {
            ConfidenceLabel::Medium
        } else {
            ConfidenceLabel::Low
        }
    }
}

/// One evidence message backing a candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceSample {
    pub from: String,
    pub subject: String,
    pub snippet: String,
    pub sender_email: String,
    pub sender_domain: String,
    pub date_ms: i64,
}

/// One deduplicated subscription candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    /// Stable dedupe hash (see [`Fingerprint`])
    pub fingerprint: String,
    pub merchant: String,
    pub plan: Option<String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub cadence_guess: Option<Cadence>,
    /// ISO date (YYYY-MM-DD) of the predicted next charge
    pub next_date_guess: Option<String>,
    /// 0–100
    pub confidence: u8,
    pub confidence_label: ConfidenceLabel,
    pub evidence_type: EvidenceType,
    /// Ordered, human-readable scoring reasons
    pub reasons: Vec<String>,
    /// Best representative message
    pub evidence: EvidenceSample,
    /// Up to three most-recent samples
    pub evidence_samples: Vec<EvidenceSample>,
    pub needs_confirm: bool,
    pub event_type: BillingEventType,
    /// Status-only candidates are excluded from spend math
    #[serde(default)]
    pub exclude_from_spend: bool,
}

/// Stable candidate fingerprint (hash version 2)
///
/// Email candidates hash {merchant, senderDomain, amount-in-cents, currency};
/// cluster candidates hash {merchant, senderDomain, cadence}. Merchant and
/// domain are lowercased so display-casing churn never splits a candidate.
pub enum Fingerprint<'a> {
    Email {
        merchant: &'a str,
        sender_domain: &'a str,
        amount: Option<f64>,
        currency: Option<&'a str>,
    },
    Cluster {
        merchant: &'a str,
        sender_domain: &'a str,
        cadence: Option<Cadence>,
    },
}

impl Fingerprint<'_> {
    /// Compute the stable hex fingerprint
    pub fn compute(&self) -> String {
        let canonical = match self {
            Fingerprint::Email {
                merchant,
                sender_domain,
                amount,
                currency,
            } => {
                let cents = amount
                    .map(|a| ((a * 100.0).round() as i64).to_string())
                    .unwrap_or_else(|| "null".to_string());
                let cur = currency
                    .map(|c| c.to_uppercase())
                    .unwrap_or_else(|| "null".to_string());
                format!(
                    "v2|email|{}|{}|{}|{}",
                    merchant.to_lowercase(),
                    sender_domain.to_lowercase(),
                    cents,
                    cur
                )
            }
            Fingerprint::Cluster {
                merchant,
                sender_domain,
                cadence,
            } => format!(
                "v2|cluster|{}|{}|{}",
                merchant.to_lowercase(),
                sender_domain.to_lowercase(),
                cadence.map(|c| c.as_str()).unwrap_or("null")
            ),
        };

        let digest = Sha256::digest(canonical.as_bytes());
        // 16 bytes of hex is plenty for per-session dedupe
        digest[..16].iter().map(|b| format!("{:02x}", b)).collect()
    }
}
