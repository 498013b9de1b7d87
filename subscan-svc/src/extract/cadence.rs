//! Billing cadence extraction
//!
//! Two strategies: explicit cadence keywords in the text, checked shortest
//! period first (week < month < quarter < year), and inference from the
//! median gap between observed message dates when no keyword exists.

use regex::Regex;
use std::sync::LazyLock;

use crate::models::Cadence;
use subscan_common::time::DAY_MS;

static WEEKLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(per week|/\s?week|/\s?wk|\bweekly\b|each week|every week)").unwrap()
});
static MONTHLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(per month|/\s?month|/\s?mo\b|\bmonthly\b|each month|every month)").unwrap()
});
static QUARTERLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(per quarter|/\s?quarter|\bquarterly\b|every 3 months|every three months)")
        .unwrap()
});
static YEARLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(per year|/\s?year|/\s?yr\b|\byearly\b|\bannual(ly)?\b|each year|every year|12 months)")
        .unwrap()
});

/// Extract an explicit cadence keyword, shortest period first
pub fn extract_cadence_keyword(haystack: &str) -> Option<Cadence> {
    if WEEKLY.is_match(haystack) {
        return Some(Cadence::Weekly);
    }
    if MONTHLY.is_match(haystack) {
        return Some(Cadence::Monthly);
    }
    if QUARTERLY.is_match(haystack) {
        return Some(Cadence::Quarterly);
    }
    if YEARLY.is_match(haystack) {
        return Some(Cadence::Yearly);
    }
    None
}

/// Cadence tolerances: (nominal days, slack days, cadence)
const GAP_TABLE: &[(i64, i64, Cadence)] = &[
    (7, 2, Cadence::Weekly),
    (14, 3, Cadence::Biweekly),
    (30, 6, Cadence::Monthly),
    (90, 15, Cadence::Quarterly),
    (365, 45, Cadence::Yearly),
];

/// Infer a cadence from the median gap between event dates
///
/// Needs at least two dates; duplicate-day gaps are ignored so a burst of
/// same-day receipts cannot fake a cadence.
pub fn infer_cadence_from_dates(dates_ms: &[i64]) -> Option<Cadence> {
    if dates_ms.len() < 2 {
        return None;
    }

    let mut sorted = dates_ms.to_vec();
    sorted.sort_unstable();

    let mut gaps_days: Vec<i64> = sorted
        .windows(2)
        .map(|w| (w[1] - w[0]) / DAY_MS)
        .filter(|d| *d >= 1)
        .collect();
    if gaps_days.is_empty() {
        return None;
    }

    gaps_days.sort_unstable();
    let median = gaps_days[gaps_days.len() / 2];

    GAP_TABLE
        .iter()
        .find(|(nominal, slack, _)| (median - nominal).abs() <= *slack)
        .map(|(_, _, cadence)| *cadence)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_monthly() {
        assert_eq!(
            extract_cadence_keyword("US$39.99/month, renews automatically"),
            Some(Cadence::Monthly)
        );
        assert_eq!(
            extract_cadence_keyword("billed monthly until canceled"),
            Some(Cadence::Monthly)
        );
    }

    #[test]
    fn test_keyword_order_prefers_shorter_period() {
        // "weekly" should win even when "year" words appear later
        assert_eq!(
            extract_cadence_keyword("weekly delivery, save $20 per year"),
            Some(Cadence::Weekly)
        );
    }

    #[test]
    fn test_keyword_yearly_variants() {
        assert_eq!(extract_cadence_keyword("your annual plan"), Some(Cadence::Yearly));
        assert_eq!(extract_cadence_keyword("$99/yr"), Some(Cadence::Yearly));
    }

    #[test]
    fn test_keyword_absent() {
        assert_eq!(extract_cadence_keyword("thanks for your order"), None);
    }

    #[test]
    fn test_infer_monthly_from_gaps() {
        let base = 1_700_000_000_000i64;
        let dates: Vec<i64> = (0..6).map(|i| base + i * 30 * DAY_MS).collect();
        assert_eq!(infer_cadence_from_dates(&dates), Some(Cadence::Monthly));
    }

    #[test]
    fn test_infer_monthly_with_jitter() {
        let base = 1_700_000_000_000i64;
        let offsets = [0i64, 29, 61, 90, 122, 151];
        let dates: Vec<i64> = offsets.iter().map(|d| base + d * DAY_MS).collect();
        assert_eq!(infer_cadence_from_dates(&dates), Some(Cadence::Monthly));
    }

    #[test]
    fn test_infer_biweekly() {
        let base = 1_700_000_000_000i64;
        let dates: Vec<i64> = (0..5).map(|i| base + i * 14 * DAY_MS).collect();
        assert_eq!(infer_cadence_from_dates(&dates), Some(Cadence::Biweekly));
    }

    #[test]
    fn test_infer_rejects_irregular_gaps() {
        let base = 1_700_000_000_000i64;
        let offsets = [0i64, 3, 50, 53, 200];
        let dates: Vec<i64> = offsets.iter().map(|d| base + d * DAY_MS).collect();
        assert_eq!(infer_cadence_from_dates(&dates), None);
    }

    #[test]
    fn test_infer_needs_two_dates() {
        assert_eq!(infer_cadence_from_dates(&[1_700_000_000_000]), None);
        assert_eq!(infer_cadence_from_dates(&[]), None);
    }

    #[test]
    fn test_same_day_burst_is_not_a_cadence() {
        let base = 1_700_000_000_000i64;
        let dates = [base, base + 1000, base + 2000];
        assert_eq!(infer_cadence_from_dates(&dates), None);
    }
}
