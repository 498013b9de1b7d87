//! Merchant resolution
//!
//! Maps a normalized email surface to a canonical merchant through tiered
//! evidence: user overrides first, then directory sender-email and domain
//! matches, then keyword hits, then a pretty-label fallback for plausible
//! non-consumer senders. First tier to match wins; score accumulates only
//! within that tier.

use serde::Serialize;

use crate::resolve::domains::{
    base_domain, domain_matches, is_consumer_domain, is_infra_domain, normalize_domain,
    pretty_label,
};
use crate::store::{DirectoryEntry, UserOverride};

/// Normalized sender surface of one message
#[derive(Debug, Clone, Default)]
pub struct EmailSurface {
    /// Raw From display string
    pub from: String,
    /// Sender address, lowercased
    pub from_email: String,
    /// Sender domain, lowercased (not prefix-stripped)
    pub from_domain: String,
    pub reply_to_domain: Option<String>,
    pub return_path_domain: Option<String>,
    pub list_unsub_domains: Vec<String>,
    pub link_domains: Vec<String>,
    /// Lowercased free text searched for keywords
    pub haystack: String,
}

impl EmailSurface {
    /// All domains that could identify the sender, from-domain first
    pub fn candidate_domains(&self) -> Vec<&str> {
        let mut domains: Vec<&str> = Vec::new();
        if !self.from_domain.is_empty() {
            domains.push(&self.from_domain);
        }
        if let Some(d) = &self.reply_to_domain {
            domains.push(d);
        }
        if let Some(d) = &self.return_path_domain {
            domains.push(d);
        }
        for d in &self.list_unsub_domains {
            domains.push(d);
        }
        for d in &self.link_domains {
            domains.push(d);
        }
        domains
    }
}

/// Which tier produced the match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchReason {
    OverrideEmail,
    OverrideDomain,
    SenderEmail,
    Domain,
    Keywords,
    FallbackDomain,
    NoMatch,
}

impl MatchReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchReason::OverrideEmail => "override-email",
            MatchReason::OverrideDomain => "override-domain",
            MatchReason::SenderEmail => "sender-email",
            MatchReason::Domain => "domain",
            MatchReason::Keywords => "keywords",
            MatchReason::FallbackDomain => "fallback-domain",
            MatchReason::NoMatch => "no-match",
        }
    }
}

/// Evidence flags consulted while scoring
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolverSignals {
    pub reply_to_agrees: bool,
    pub return_path_agrees: bool,
    pub list_unsub_agrees: bool,
    pub link_agrees: bool,
    pub consumer_from: bool,
    pub keyword_hits: u32,
}

/// Resolution output
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MerchantMatch {
    pub canonical: Option<String>,
    pub pretty_fallback: Option<String>,
    /// 0–100
    pub confidence: u8,
    pub reason: MatchReason,
    pub signals: ResolverSignals,
    pub from_domain: String,
}

impl MerchantMatch {
    /// Best display name: canonical, else the fallback label
    pub fn display_name(&self) -> Option<&str> {
        self.canonical
            .as_deref()
            .or(self.pretty_fallback.as_deref())
    }
}

fn clamp_score(score: i32) -> u8 {
    score.clamp(0, 100) as u8
}

/// Resolve a sender surface against the directory and the user's overrides
pub fn resolve(
    surface: &EmailSurface,
    directory: &[DirectoryEntry],
    overrides: &[UserOverride],
) -> MerchantMatch {
    let consumer_from = is_consumer_domain(&surface.from_domain);
    let mut signals = ResolverSignals {
        consumer_from,
        ..ResolverSignals::default()
    };

    // Tier 1: user override by exact sender email
    if !surface.from_email.is_empty() {
        if let Some(ovr) = overrides.iter().find(|o| {
            o.sender_email
                .as_deref()
                .is_some_and(|e| e.eq_ignore_ascii_case(&surface.from_email))
        }) {
            return MerchantMatch {
                canonical: Some(ovr.canonical_name.clone()),
                pretty_fallback: None,
                confidence: 95,
                reason: MatchReason::OverrideEmail,
                signals,
                from_domain: surface.from_domain.clone(),
            };
        }
    }

    // Tier 2: user override by any candidate domain
    for domain in surface.candidate_domains() {
        if let Some(ovr) = overrides.iter().find(|o| {
            o.sender_domain
                .as_deref()
                .is_some_and(|d| domain_matches(domain, d))
        }) {
            return MerchantMatch {
                canonical: Some(ovr.canonical_name.clone()),
                pretty_fallback: None,
                confidence: 90,
                reason: MatchReason::OverrideDomain,
                signals,
                from_domain: surface.from_domain.clone(),
            };
        }
    }

    // Tier 3: directory exact sender email, with agreement bonuses
    if !surface.from_email.is_empty() {
        if let Some(entry) = directory.iter().find(|e| {
            e.sender_emails
                .iter()
                .any(|known| known.eq_ignore_ascii_case(&surface.from_email))
        }) {
            let mut score = 85i32;
            if let Some(reply_to) = &surface.reply_to_domain {
                if entry.sender_domains.iter().any(|d| domain_matches(reply_to, d)) {
                    signals.reply_to_agrees = true;
                    score += 5;
                }
            }
            if let Some(return_path) = &surface.return_path_domain {
                if entry
                    .sender_domains
                    .iter()
                    .any(|d| domain_matches(return_path, d))
                {
                    signals.return_path_agrees = true;
                    score += 5;
                }
            }
            return MerchantMatch {
                canonical: Some(entry.canonical_name.clone()),
                pretty_fallback: None,
                confidence: clamp_score(score),
                reason: MatchReason::SenderEmail,
                signals,
                from_domain: surface.from_domain.clone(),
            };
        }
    }

    // Tier 4: directory domain over candidate domains; from-domain is first
    // in the candidate list, so the first hit is the preferred one
    let mut best_domain_match: Option<(&DirectoryEntry, bool)> = None;
    for (idx, domain) in surface.candidate_domains().iter().enumerate() {
        if let Some(entry) = directory
            .iter()
            .find(|e| e.sender_domains.iter().any(|d| domain_matches(domain, d)))
        {
            best_domain_match = Some((entry, idx == 0));
            break;
        }
    }
    if let Some((entry, via_from)) = best_domain_match {
        let mut score = if via_from { 80i32 } else { 70i32 };
        if surface
            .list_unsub_domains
            .iter()
            .any(|u| entry.sender_domains.iter().any(|d| domain_matches(u, d)))
        {
            signals.list_unsub_agrees = true;
            score += 6;
        }
        if surface
            .link_domains
            .iter()
            .any(|l| entry.sender_domains.iter().any(|d| domain_matches(l, d)))
        {
            signals.link_agrees = true;
            score += 4;
        }
        if consumer_from {
            score -= 30;
        }
        return MerchantMatch {
            canonical: Some(entry.canonical_name.clone()),
            pretty_fallback: None,
            confidence: clamp_score(score),
            reason: MatchReason::Domain,
            signals,
            from_domain: surface.from_domain.clone(),
        };
    }

    // Tier 5: keyword hits over the haystack
    if !surface.haystack.is_empty() {
        let mut best: Option<(&DirectoryEntry, u32)> = None;
        for entry in directory {
            let hits = entry
                .keywords
                .iter()
                .filter(|kw| !kw.is_empty() && surface.haystack.contains(&kw.to_lowercase()))
                .count() as u32;
            if hits > 0 && best.map(|(_, h)| hits > h).unwrap_or(true) {
                best = Some((entry, hits));
            }
        }
        if let Some((entry, hits)) = best {
            signals.keyword_hits = hits;
            let mut score = (10 + 7 * hits as i32).clamp(10, 38);
            if consumer_from {
                score -= 10;
            }
            return MerchantMatch {
                canonical: Some(entry.canonical_name.clone()),
                pretty_fallback: None,
                confidence: clamp_score(score),
                reason: MatchReason::Keywords,
                signals,
                from_domain: surface.from_domain.clone(),
            };
        }
    }

    // Tier 6: pretty-label fallback for plausible merchant senders
    if !surface.from_domain.is_empty() && !consumer_from && !is_infra_domain(&surface.from_domain) {
        let label = pretty_label(&surface.from_domain);
        if !label.is_empty() {
            return MerchantMatch {
                canonical: None,
                pretty_fallback: Some(label),
                confidence: 35,
                reason: MatchReason::FallbackDomain,
                signals,
                from_domain: surface.from_domain.clone(),
            };
        }
    }

    MerchantMatch {
        canonical: None,
        pretty_fallback: None,
        confidence: 0,
        reason: MatchReason::NoMatch,
        signals,
        from_domain: surface.from_domain.clone(),
    }
}

/// Resolver verdict for clustering: the domain that best identifies a sender
///
/// Infra senders keep their literal domain (the cluster key disambiguates
/// with the sender-local part), everyone else collapses to the normalized
/// base domain.
pub fn best_domain(from_domain: &str) -> String {
    if is_infra_domain(from_domain) {
        from_domain.to_lowercase()
    } else {
        base_domain(&normalize_domain(from_domain))
    }
}
