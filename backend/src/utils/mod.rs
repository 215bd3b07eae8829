//! # Utilities Module
//!
//! This module contains helper functions and utilities used
//! across the backend service.

use chrono::{DateTime, Duration, Utc};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Round to two decimal places (half away from zero).
///
/// ## Examples
///
/// ```rust,ignore
/// assert_eq!(round2(95.004), 95.0);
/// assert_eq!(round2(66.666), 66.67);
/// ```
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Round to four decimal places; used for per-execution averages.
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Convert a byte count into megabytes rounded to two decimals.
pub fn bytes_to_mb(bytes: f64) -> f64 {
    round2(bytes / BYTES_PER_MB)
}

/// Convert microseconds (Oracle's time counters) into seconds.
pub fn micros_to_secs(micros: f64) -> f64 {
    micros / 1_000_000.0
}

/// Drop sub-microsecond precision; Postgres stores microseconds.
pub fn truncate_to_micros(t: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(t.timestamp_micros()).unwrap_or(t)
}

/// Timestamp for the next snapshot of a key.
///
/// Normally `now`; if the clock has not advanced past the previous
/// snapshot (same microsecond, or a clock step backwards), one
/// microsecond after the previous one.
pub fn next_collected_at(now: DateTime<Utc>, last: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = truncate_to_micros(now);
    match last {
        Some(last) if now <= last => last + Duration::microseconds(1),
        _ => now,
    }
}

/// Parse an ISO 8601 timestamp.
pub fn parse_timestamp(timestamp_str: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(timestamp_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("Invalid timestamp '{}': {}", timestamp_str, e))
}

/// Truncate a string to at most `max_chars` characters.
///
/// Used for target error text in log lines.
pub fn truncate_string(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round2() {
        assert_eq!(round2(95.0), 95.0);
        assert_eq!(round2(33.333_333), 33.33);
        assert_eq!(round2(66.666_666), 66.67);
        assert_eq!(round4(0.123_456), 0.1235);
    }

    #[test]
    fn test_bytes_to_mb() {
        assert_eq!(bytes_to_mb(1024.0 * 1024.0 * 1000.0), 1000.0);
        assert_eq!(bytes_to_mb(0.0), 0.0);
    }

    #[test]
    fn test_next_collected_at_uses_now_when_ahead() {
        let last = Utc::now() - Duration::seconds(10);
        let now = Utc::now();
        assert_eq!(next_collected_at(now, Some(last)), truncate_to_micros(now));
        assert_eq!(next_collected_at(now, None), truncate_to_micros(now));
    }

    #[test]
    fn test_next_collected_at_strictly_increases() {
        let now = truncate_to_micros(Utc::now());
        let next = next_collected_at(now, Some(now));
        assert!(next > now);

        // Clock stepped backwards
        let future = now + Duration::seconds(5);
        let next = next_collected_at(now, Some(future));
        assert_eq!(next, future + Duration::microseconds(1));
    }

    #[test]
    fn test_parse_timestamp() {
        let t = parse_timestamp("2025-01-02T03:04:05Z").unwrap();
        assert_eq!(t.timestamp(), 1_735_787_045);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("abcdefghij", 10), "abcdefghij");
        assert_eq!(truncate_string("abcdefghijklmnop", 10), "abcdefg...");
    }
}
