//! Time utilities.
//!
//! Everything time-dependent in the core (TOTP windows, settings stamps)
//! reads the clock through here so tests can pass explicit timestamps to the
//! pure functions instead.

/// Returns the current Unix timestamp in seconds.
pub fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Returns the current Unix timestamp in milliseconds.
pub fn now_timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Returns the current Unix time as an unsigned second count.
///
/// Clocks set before 1970 clamp to zero.
pub fn now_unix_seconds() -> u64 {
    u64::try_from(now_timestamp()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_timestamp_is_reasonable() {
        let ts = now_timestamp();
        // Should be after 2024-01-01 (1704067200)
        assert!(ts > 1704067200, "Timestamp {} is too old", ts);
        // Should be before 2100-01-01 (4102444800)
        assert!(ts < 4102444800, "Timestamp {} is too far in future", ts);
    }

    #[test]
    fn test_now_timestamp_millis_is_reasonable() {
        let ts = now_timestamp_millis();
        assert!(ts > 1704067200_000, "Timestamp {} is too old", ts);
    }

    #[test]
    fn test_unix_seconds_matches_signed() {
        let signed = now_timestamp();
        let unsigned = now_unix_seconds();
        assert!(unsigned as i64 - signed <= 1);
    }
}
