//! Metadata-only subscription clustering
//!
//! When bodies are never fetched, cadence is still visible in the metadata:
//! the same sender drumming on a monthly beat is a subscription signal all
//! by itself. Groups screened-in messages by resolved sender domain, infers
//! cadence from date gaps, and emits a cluster candidate when at least three
//! dated messages line up and the composite score clears the bar.

use std::collections::HashMap;

use crate::classify::ClassifierFlags;
use crate::extract::infer_cadence_from_dates;
use crate::mail::EmailMeta;
use crate::models::{
    BillingEventType, Candidate, ConfidenceLabel, EvidenceSample, EvidenceType, Fingerprint,
};
use crate::resolve::domains::{is_infra_domain, pretty_label};
use crate::resolve::{best_domain, MerchantMatch};

/// Minimum dated messages before a cluster can exist
const MIN_CLUSTER_SIZE: usize = 3;

/// Clusters below this composite score are discarded
const MIN_CLUSTER_SCORE: i32 = 55;

/// Billing words searched across the cluster's joined subjects/snippets
const BILLING_WORDS: &[&str] = &[
    "receipt",
    "invoice",
    "payment",
    "billing",
    "billed",
    "subscription",
    "renewal",
    "statement",
    "charge",
];

#[derive(Debug, Clone)]
struct Observation {
    from: String,
    from_email: String,
    sender_domain: String,
    subject: String,
    snippet: String,
    date_ms: i64,
    bulk: bool,
    transactional: bool,
    resolver_confidence: u8,
    merchant: Option<String>,
}

#[derive(Debug, Default)]
struct ClusterGroup {
    observations: Vec<Observation>,
}

/// Accumulates screened-in metadata and emits cluster candidates
pub struct ClusterBuilder {
    groups: HashMap<String, ClusterGroup>,
    observed: usize,
    cap: usize,
}

impl ClusterBuilder {
    /// `cap` bounds the metadata rows considered per chunk
    pub fn new(cap: usize) -> Self {
        Self {
            groups: HashMap::new(),
            observed: 0,
            cap,
        }
    }

    /// Feed one screened-in message's metadata
    pub fn observe(&mut self, meta: &EmailMeta, resolution: &MerchantMatch, flags: &ClassifierFlags) {
        if self.observed >= self.cap {
            return;
        }
        let Some(date_ms) = meta.date_ms else {
            return;
        };
        if meta.from_domain.is_empty() {
            return;
        }

        let best = best_domain(&meta.from_domain);
        let key = if is_infra_domain(&best) {
            format!("infra:{}:{}", best, meta.from_domain)
        } else {
            best
        };

        self.observed += 1;
        self.groups.entry(key).or_default().observations.push(Observation {
            from: meta.from.clone(),
            from_email: meta.from_email.clone(),
            sender_domain: meta.from_domain.clone(),
            subject: meta.subject.clone(),
            snippet: meta.snippet.clone(),
            date_ms,
            bulk: flags.bulk_header,
            transactional: flags.likely_transactional,
            resolver_confidence: resolution.confidence,
            merchant: resolution.display_name().map(|s| s.to_string()),
        });
    }

    /// Emit candidates for every qualifying cluster
    pub fn build(self) -> Vec<Candidate> {
        let mut candidates = Vec::new();

        for (_, group) in self.groups {
            let n = group.observations.len();
            if n < MIN_CLUSTER_SIZE {
                continue;
            }

            let dates: Vec<i64> = group.observations.iter().map(|o| o.date_ms).collect();
            let cadence = infer_cadence_from_dates(&dates);

            let joined = group
                .observations
                .iter()
                .map(|o| format!("{} {}", o.subject, o.snippet))
                .collect::<Vec<_>>()
                .join(" ")
                .to_lowercase();
            let has_billing_words = BILLING_WORDS.iter().any(|w| joined.contains(w));

            let transactional_ratio = group.observations.iter().filter(|o| o.transactional).count()
                as f64
                / n as f64;
            let bulk_ratio =
                group.observations.iter().filter(|o| o.bulk).count() as f64 / n as f64;
            let resolver_confidence = group
                .observations
                .iter()
                .map(|o| o.resolver_confidence)
                .max()
                .unwrap_or(0) as f64;

            let mut score = ((n as f64 + 1.0).log2() * 12.0).min(35.0)
                + if cadence.is_some() { 22.0 } else { 0.0 }
                + if has_billing_words { 18.0 } else { 0.0 }
                + (20.0 * transactional_ratio).min(15.0)
                + (0.35 * resolver_confidence).min(20.0);

            if bulk_ratio > 0.8 && !has_billing_words {
                score -= 10.0;
            }

            let score = (score.round() as i32).clamp(0, 100);
            if score < MIN_CLUSTER_SCORE {
                continue;
            }

            // Most recent message represents the cluster
            let mut sorted = group.observations.clone();
            sorted.sort_by_key(|o| std::cmp::Reverse(o.date_ms));
            let newest = &sorted[0];

            let merchant = newest
                .merchant
                .clone()
                .unwrap_or_else(|| pretty_label(&newest.sender_domain));

            let fingerprint = Fingerprint::Cluster {
                merchant: &merchant,
                sender_domain: &newest.sender_domain,
                cadence,
            }
            .compute();

            let samples: Vec<EvidenceSample> = sorted
                .iter()
                .take(3)
                .map(|o| EvidenceSample {
                    from: o.from.clone(),
                    subject: o.subject.clone(),
                    snippet: o.snippet.clone(),
                    sender_email: o.from_email.clone(),
                    sender_domain: o.sender_domain.clone(),
                    date_ms: o.date_ms,
                })
                .collect();

            let confidence = score as u8;
            let mut reasons = vec![format!("{} messages from sender (+cluster)", n)];
            if let Some(cadence) = cadence {
                reasons.push(format!("{} cadence inferred from dates", cadence.as_str()));
            }
            if has_billing_words {
                reasons.push("billing words in subjects".to_string());
            }

            candidates.push(Candidate {
                fingerprint,
                merchant,
                plan: None,
                amount: None,
                currency: None,
                cadence_guess: cadence,
                next_date_guess: None,
                confidence,
                confidence_label: ConfidenceLabel::from_score(confidence),
                evidence_type: EvidenceType::Cluster,
                reasons,
                evidence: samples[0].clone(),
                evidence_samples: samples,
                needs_confirm: true,
                event_type: BillingEventType::BillingSignalNoAmount,
                exclude_from_spend: false,
            });
        }

        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Cadence;
    use crate::resolve::{MatchReason, ResolverSignals};
    use std::collections::HashMap as StdHashMap;
    use subscan_common::time::DAY_MS;

    fn meta(from_email: &str, subject: &str, date_ms: i64) -> EmailMeta {
        let from_domain = crate::resolve::domains::domain_of_email(from_email).unwrap();
        EmailMeta {
            id: format!("{date_ms}"),
            from: from_email.to_string(),
            from_email: from_email.to_string(),
            from_domain,
            subject: subject.to_string(),
            snippet: String::new(),
            date_ms: Some(date_ms),
            headers: StdHashMap::new(),
        }
    }

    fn resolution(confidence: u8, merchant: Option<&str>) -> MerchantMatch {
        MerchantMatch {
            canonical: merchant.map(|s| s.to_string()),
            pretty_fallback: None,
            confidence,
            reason: MatchReason::Domain,
            signals: ResolverSignals::default(),
            from_domain: String::new(),
        }
    }

    fn flags(transactional: bool, bulk: bool) -> ClassifierFlags {
        ClassifierFlags {
            bulk_header: bulk,
            likely_transactional: transactional,
            ..ClassifierFlags::default()
        }
    }

    #[test]
    fn test_monthly_cluster_emitted() {
        let mut builder = ClusterBuilder::new(200);
        let base = 1_730_000_000_000i64;
        for i in 0..6 {
            builder.observe(
                &meta(
                    "billing@mailer.udemymail.com",
                    "Your monthly statement",
                    base + i * 30 * DAY_MS,
                ),
                &resolution(80, Some("Udemy")),
                &flags(false, false),
            );
        }

        let candidates = builder.build();
        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        assert_eq!(c.merchant, "Udemy");
        assert_eq!(c.cadence_guess, Some(Cadence::Monthly));
        assert_eq!(c.evidence_type, EvidenceType::Cluster);
        assert!(c.needs_confirm);
        assert!(c.confidence >= 55);
        assert_eq!(c.evidence_samples.len(), 3);
        // Newest message is the representative
        assert_eq!(c.evidence.date_ms, base + 5 * 30 * DAY_MS);
    }

    #[test]
    fn test_two_messages_never_cluster() {
        let mut builder = ClusterBuilder::new(200);
        let base = 1_730_000_000_000i64;
        for i in 0..2 {
            builder.observe(
                &meta("billing@service.com", "Receipt", base + i * 30 * DAY_MS),
                &resolution(80, Some("Service")),
                &flags(true, false),
            );
        }
        assert!(builder.build().is_empty());
    }

    #[test]
    fn test_undated_messages_do_not_count() {
        let mut builder = ClusterBuilder::new(200);
        let base = 1_730_000_000_000i64;
        for i in 0..2 {
            builder.observe(
                &meta("billing@service.com", "Receipt", base + i * 30 * DAY_MS),
                &resolution(80, Some("Service")),
                &flags(true, false),
            );
        }
        let mut undated = meta("billing@service.com", "Receipt", 0);
        undated.date_ms = None;
        builder.observe(&undated, &resolution(80, Some("Service")), &flags(true, false));
        assert!(builder.build().is_empty());
    }

    #[test]
    fn test_weak_bulk_cluster_discarded() {
        let mut builder = ClusterBuilder::new(200);
        let base = 1_730_000_000_000i64;
        // Irregular dates, bulk headers, no billing words, unknown merchant
        for (i, gap) in [0i64, 3, 11, 50].iter().enumerate() {
            builder.observe(
                &meta(
                    "hello@randomblog.net",
                    "Thoughts on things",
                    base + gap * DAY_MS + i as i64,
                ),
                &resolution(35, None),
                &flags(false, true),
            );
        }
        assert!(builder.build().is_empty());
    }

    #[test]
    fn test_infra_senders_do_not_merge_across_merchants() {
        let mut builder = ClusterBuilder::new(200);
        let base = 1_730_000_000_000i64;
        for i in 0..3 {
            builder.observe(
                &meta("a@em1.sendgrid.net", "Invoice", base + i * 30 * DAY_MS),
                &resolution(40, Some("Alpha")),
                &flags(true, false),
            );
            builder.observe(
                &meta("b@em2.sendgrid.net", "Invoice", base + i * 30 * DAY_MS + 1),
                &resolution(40, Some("Beta")),
                &flags(true, false),
            );
        }
        let candidates = builder.build();
        assert_eq!(candidates.len(), 2);
    }

    #[test]
    fn test_cap_bounds_observations() {
        let mut builder = ClusterBuilder::new(2);
        let base = 1_730_000_000_000i64;
        for i in 0..6 {
            builder.observe(
                &meta("billing@service.com", "Receipt", base + i * 30 * DAY_MS),
                &resolution(80, Some("Service")),
                &flags(true, false),
            );
        }
        // Only two observations were accepted, below the cluster minimum
        assert!(builder.build().is_empty());
    }
}
