//! Candidate aggregation and deduplication
//!
//! Two passes. Within a chunk, candidates sharing a fingerprint collapse to
//! the max-confidence representative, carrying evidence dates forward; a
//! repeat with an inferable cadence earns a one-time +10. Across the final
//! set, when the surface asks for it, one best candidate per merchant is
//! picked by event priority, amount presence, confidence, date presence and
//! recency. A strict gate removes non-subscription spend outright.
//!
//! Both passes are idempotent: aggregate(aggregate(X)) == aggregate(X).

use std::collections::HashMap;

use crate::classify::phrases::{count_hits, HARD_NEGATIVE_PHRASES};
use crate::extract::infer_cadence_from_dates;
use crate::models::{Candidate, ConfidenceLabel, EvidenceSample, EvidenceType};

/// Marker suffix guarding the repeat-evidence bonus against reapplication
const REPEAT_BONUS_NOTE: &str = "repeat evidence cadence (+10)";

/// Boost for candidates backed by a fetched body rather than metadata alone
const FULL_BODY_BOOST: i64 = 5;

fn merge_samples(into: &mut Vec<EvidenceSample>, from: &[EvidenceSample]) {
    for sample in from {
        if !into.iter().any(|s| s.date_ms == sample.date_ms && s.subject == sample.subject) {
            into.push(sample.clone());
        }
    }
    into.sort_by_key(|s| std::cmp::Reverse(s.date_ms));
    into.truncate(3);
}

/// Within-chunk aggregation: one row per fingerprint
pub fn aggregate_chunk(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut by_fingerprint: HashMap<String, Candidate> = HashMap::new();

    for candidate in candidates {
        match by_fingerprint.get_mut(&candidate.fingerprint) {
            None => {
                by_fingerprint.insert(candidate.fingerprint.clone(), candidate);
            }
            Some(existing) => {
                let mut samples = existing.evidence_samples.clone();
                merge_samples(&mut samples, &candidate.evidence_samples);

                if candidate.confidence > existing.confidence {
                    let mut winner = candidate;
                    winner.evidence_samples = samples;
                    *existing = winner;
                } else {
                    existing.evidence_samples = samples;
                }
            }
        }
    }

    let mut aggregated: Vec<Candidate> = by_fingerprint.into_values().collect();

    // Repeat evidence with a readable cadence earns a one-time bonus
    for candidate in &mut aggregated {
        if candidate.reasons.iter().any(|r| r == REPEAT_BONUS_NOTE) {
            continue;
        }
        let dates: Vec<i64> = candidate
            .evidence_samples
            .iter()
            .map(|s| s.date_ms)
            .filter(|d| *d > 0)
            .collect();
        if dates.len() >= 2 {
            if let Some(cadence) = infer_cadence_from_dates(&dates) {
                candidate.confidence = (candidate.confidence as i32 + 10).clamp(0, 100) as u8;
                candidate.confidence_label = ConfidenceLabel::from_score(candidate.confidence);
                if candidate.cadence_guess.is_none() {
                    candidate.cadence_guess = Some(cadence);
                }
                candidate.reasons.push(REPEAT_BONUS_NOTE.to_string());
            }
        }
    }

    // Deterministic order for stable downstream behavior
    aggregated.sort_by(|a, b| {
        b.confidence
            .cmp(&a.confidence)
            .then_with(|| a.fingerprint.cmp(&b.fingerprint))
    });
    aggregated
}

fn rank_score(candidate: &Candidate) -> i64 {
    let has_amount = candidate.amount.is_some() as i64;
    let has_date = (candidate.evidence.date_ms > 0) as i64;
    let full_body = (candidate.evidence_type != EvidenceType::Cluster) as i64;

    candidate.event_type.priority() * 10_000
        + has_amount * 2_000
        + candidate.confidence as i64 * 100
        + has_date * 10
        + full_body * FULL_BODY_BOOST
}

/// Across-chunk dedupe: one best representative per merchant
pub fn best_per_merchant(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut by_merchant: HashMap<String, Vec<Candidate>> = HashMap::new();
    for candidate in candidates {
        by_merchant
            .entry(candidate.merchant.to_lowercase())
            .or_default()
            .push(candidate);
    }

    let mut best: Vec<Candidate> = Vec::with_capacity(by_merchant.len());
    for (_, mut group) in by_merchant {
        group.sort_by(|a, b| {
            rank_score(b)
                .cmp(&rank_score(a))
                .then_with(|| b.evidence.date_ms.cmp(&a.evidence.date_ms))
        });

        let mut samples: Vec<EvidenceSample> = Vec::new();
        for candidate in &group {
            merge_samples(&mut samples, &candidate.evidence_samples);
        }

        let mut winner = group.swap_remove(0);
        winner.evidence_samples = samples;
        best.push(winner);
    }

    best.sort_by(|a, b| {
        b.confidence
            .cmp(&a.confidence)
            .then_with(|| a.merchant.cmp(&b.merchant))
    });
    best
}

/// Strict gate: remove non-subscription spend, mark status-only rows
///
/// Returns the surviving candidates and how many the gate removed.
pub fn strict_gate(candidates: Vec<Candidate>) -> (Vec<Candidate>, usize) {
    let before = candidates.len();

    let mut kept: Vec<Candidate> = candidates
        .into_iter()
        .filter(|c| {
            if c.event_type.is_gated() {
                return false;
            }
            let haystack =
                format!("{} {}", c.evidence.subject, c.evidence.snippet).to_lowercase();
            count_hits(&haystack, HARD_NEGATIVE_PHRASES) == 0
        })
        .collect();

    for candidate in &mut kept {
        if candidate.event_type.is_status_only() {
            candidate.exclude_from_spend = true;
        }
    }

    let gated = before - kept.len();
    (kept, gated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BillingEventType, Cadence, Fingerprint};
    use subscan_common::time::DAY_MS;

    fn sample(date_ms: i64, subject: &str) -> EvidenceSample {
        EvidenceSample {
            from: "Svc <billing@svc.com>".to_string(),
            subject: subject.to_string(),
            snippet: String::new(),
            sender_email: "billing@svc.com".to_string(),
            sender_domain: "svc.com".to_string(),
            date_ms,
        }
    }

    fn candidate(
        merchant: &str,
        amount: Option<f64>,
        confidence: u8,
        event_type: BillingEventType,
        date_ms: i64,
    ) -> Candidate {
        let fingerprint = Fingerprint::Email {
            merchant,
            sender_domain: "svc.com",
            amount,
            currency: amount.map(|_| "USD"),
        }
        .compute();
        let evidence = sample(date_ms, "Receipt");
        Candidate {
            fingerprint,
            merchant: merchant.to_string(),
            plan: None,
            amount,
            currency: amount.map(|_| "USD".to_string()),
            cadence_guess: None,
            next_date_guess: None,
            confidence,
            confidence_label: ConfidenceLabel::from_score(confidence),
            evidence_type: EvidenceType::Transactional,
            reasons: vec!["test".to_string()],
            evidence: evidence.clone(),
            evidence_samples: vec![evidence],
            needs_confirm: false,
            event_type,
            exclude_from_spend: false,
        }
    }

    #[test]
    fn test_aggregate_collapses_fingerprints() {
        let base = 1_730_000_000_000i64;
        let a = candidate("Svc", Some(9.99), 70, BillingEventType::Receipt, base);
        let b = candidate("Svc", Some(9.99), 85, BillingEventType::Receipt, base + 30 * DAY_MS);
        assert_eq!(a.fingerprint, b.fingerprint);

        let out = aggregate_chunk(vec![a, b]);
        assert_eq!(out.len(), 1);
        // Max-confidence representative plus the repeat cadence bonus
        assert_eq!(out[0].confidence, 95);
        assert_eq!(out[0].cadence_guess, Some(Cadence::Monthly));
        assert_eq!(out[0].evidence_samples.len(), 2);
    }

    #[test]
    fn test_aggregate_is_idempotent() {
        let base = 1_730_000_000_000i64;
        let a = candidate("Svc", Some(9.99), 70, BillingEventType::Receipt, base);
        let b = candidate("Svc", Some(9.99), 85, BillingEventType::Receipt, base + 30 * DAY_MS);
        let c = candidate("Other", None, 60, BillingEventType::BillingSignalNoAmount, base);

        let once = aggregate_chunk(vec![a, b, c]);
        let twice = aggregate_chunk(once.clone());

        let confidences =
            |v: &[Candidate]| v.iter().map(|c| (c.fingerprint.clone(), c.confidence)).collect::<Vec<_>>();
        assert_eq!(confidences(&once), confidences(&twice));
    }

    #[test]
    fn test_best_per_merchant_prefers_receipt_over_marketing() {
        let base = 1_730_000_000_000i64;
        let receipt = candidate("Svc", Some(9.99), 60, BillingEventType::Receipt, base);
        let mut cancel = candidate("Svc", None, 95, BillingEventType::Cancellation, base + DAY_MS);
        cancel.fingerprint = "different".to_string();

        let out = best_per_merchant(vec![cancel, receipt]);
        assert_eq!(out.len(), 1);
        // Event priority dominates raw confidence
        assert_eq!(out[0].event_type, BillingEventType::Receipt);
    }

    #[test]
    fn test_best_per_merchant_collects_samples() {
        let base = 1_730_000_000_000i64;
        let mut a = candidate("Svc", Some(9.99), 60, BillingEventType::Receipt, base);
        let mut b = candidate("Svc", Some(9.99), 70, BillingEventType::Receipt, base + DAY_MS);
        a.fingerprint = "fa".to_string();
        b.fingerprint = "fb".to_string();
        b.evidence_samples = vec![sample(base + DAY_MS, "Receipt 2")];

        let out = best_per_merchant(vec![a, b]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].evidence_samples.len(), 2);
        // Newest first
        assert!(out[0].evidence_samples[0].date_ms > out[0].evidence_samples[1].date_ms);
    }

    #[test]
    fn test_strict_gate_drops_gated_event_types() {
        let base = 1_730_000_000_000i64;
        let ok = candidate("Svc", Some(9.99), 60, BillingEventType::Receipt, base);
        let top_up = candidate("Wallet", Some(50.0), 80, BillingEventType::TopUp, base);
        let ad = candidate("Ads", Some(500.0), 80, BillingEventType::AdSpend, base);

        let (kept, gated) = strict_gate(vec![ok, top_up, ad]);
        assert_eq!(kept.len(), 1);
        assert_eq!(gated, 2);
        assert_eq!(kept[0].merchant, "Svc");
    }

    #[test]
    fn test_strict_gate_drops_hard_negative_text() {
        let base = 1_730_000_000_000i64;
        let mut sneaky = candidate("Wallet", Some(50.0), 80, BillingEventType::Receipt, base);
        sneaky.evidence.subject = "Funds added to your wallet".to_string();

        let (kept, gated) = strict_gate(vec![sneaky]);
        assert!(kept.is_empty());
        assert_eq!(gated, 1);
    }

    #[test]
    fn test_strict_gate_marks_status_rows() {
        let base = 1_730_000_000_000i64;
        let mut failed = candidate("Svc", Some(9.99), 60, BillingEventType::PaymentFailed, base);
        failed.exclude_from_spend = false;

        let (kept, _) = strict_gate(vec![failed]);
        assert_eq!(kept.len(), 1);
        assert!(kept[0].exclude_from_spend);
    }
}
