//! Time utilities.

/// Returns the current Unix timestamp in seconds.
pub fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_timestamp_is_reasonable() {
        let ts = now_timestamp();
        // After 2024-01-01 and before 2100-01-01
        assert!(ts > 1704067200, "Timestamp {} is too old", ts);
        assert!(ts < 4102444800, "Timestamp {} is too far in future", ts);
    }
}
