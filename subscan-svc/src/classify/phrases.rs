//! Closed phrase sets for transactional/marketing classification
//!
//! These are matched case-insensitively against the message haystack
//! (subject + snippet + body text). The sets are deliberately closed: tuning
//! happens here, not in the scoring code.

/// Phrases that indicate a billing/receipt/subscription event
pub const POSITIVE_PHRASES: &[&str] = &[
    "payment successful",
    "payment received",
    "payment confirmation",
    "we charged",
    "you were charged",
    "has been charged",
    "invoice",
    "receipt",
    "order confirmation",
    "subscription renewed",
    "your subscription has renewed",
    "renews on",
    "renewal date",
    "next billing date",
    "billing statement",
    "amount due",
    "amount paid",
    "trial ends",
    "trial will end",
    "expires on",
    "auto-renew",
    "thank you for your payment",
    "your membership",
    "billed to",
];

/// Phrases that indicate marketing content
pub const NEGATIVE_PHRASES: &[&str] = &[
    "newsletter",
    "promo",
    "promotion",
    "sale",
    "% off",
    "percent off",
    "discount",
    "limited time",
    "limited-time",
    "act now",
    "don't miss",
    "recommended for you",
    "just for you",
    "new arrivals",
    "free shipping",
    "flash deal",
    "exclusive offer",
];

/// A short list of phrases that alone make a message likely transactional
pub const STRONG_TRANSACTIONAL: &[&str] = &[
    "invoice",
    "receipt",
    "charged",
    "payment",
    "subscription renewed",
];

/// Apple receipt haystack markers, paired with an apple.com sender
pub const APPLE_RECEIPT_MARKERS: &[&str] =
    &["subscription", "purchase", "app store", "itunes", "receipt"];

/// Hard negatives: non-subscription spend the strict gate removes outright
pub const HARD_NEGATIVE_PHRASES: &[&str] = &[
    "funds added",
    "ad spend",
    "advertising spend",
    "campaign budget",
    "campaign",
    "top up",
    "top-up",
    "wallet reload",
];

/// Count phrase hits in a lowercased haystack
pub fn count_hits(haystack: &str, phrases: &[&str]) -> u32 {
    phrases
        .iter()
        .filter(|p| haystack.contains(&p.to_lowercase()))
        .count() as u32
}
