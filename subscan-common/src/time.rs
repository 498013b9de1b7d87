//! Epoch-millisecond time helpers
//!
//! The scanner stores message dates and event timestamps as epoch
//! milliseconds so ordering comparisons never touch a parser.

use chrono::{DateTime, TimeZone, Utc};

/// Current time as epoch milliseconds
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert epoch milliseconds to a UTC datetime
///
/// Out-of-range values collapse to the epoch rather than panicking.
pub fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(|| Utc.timestamp_millis_opt(0).unwrap())
}

/// Days expressed as milliseconds
pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ms_round_trip() {
        let ms = 1_731_412_800_000; // 2024-11-12T12:00:00Z
        let dt = ms_to_datetime(ms);
        assert_eq!(dt.timestamp_millis(), ms);
    }

    #[test]
    fn test_out_of_range_collapses_to_epoch() {
        let dt = ms_to_datetime(i64::MAX);
        assert_eq!(dt.timestamp_millis(), 0);
    }
}
