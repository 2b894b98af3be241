//! Timestamp rendering for console output.

use chrono::{DateTime, TimeZone, Utc};

/// Renders the time of day, as used in stack event lines.
///
/// # Example
/// ```rust
/// use chrono::{TimeZone, Utc};
/// use pipewatch_util::time_format::clock_time;
///
/// let at = Utc.with_ymd_and_hms(2024, 5, 1, 7, 3, 9).unwrap();
/// assert_eq!(clock_time(&at), "07:03:09");
/// ```
pub fn clock_time(at: &DateTime<Utc>) -> String {
    at.format("%H:%M:%S").to_string()
}

/// Renders an epoch-millisecond timestamp as `YYYY-MM-DD HH:MM:SS` (UTC).
///
/// Out-of-range values fall back to the raw number.
pub fn epoch_millis(timestamp: i64) -> String {
    match Utc.timestamp_millis_opt(timestamp).single() {
        Some(at) => at.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => timestamp.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_epoch_millis() {
        assert_eq!(epoch_millis(1_714_521_600_123), "2024-05-01 00:00:00");
        assert_eq!(epoch_millis(i64::MAX), i64::MAX.to_string());
    }
}
