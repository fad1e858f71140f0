use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current Unix time in milliseconds. Clamps to 0 if the system clock is
/// before the epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Saturating `at + d` in milliseconds.
pub fn add_millis(at: u64, d: Duration) -> u64 {
    at.saturating_add(d.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_millis_saturates() {
        assert_eq!(add_millis(1_000, Duration::from_secs(2)), 3_000);
        assert_eq!(add_millis(u64::MAX - 1, Duration::from_secs(1)), u64::MAX);
    }

    #[test]
    fn test_now_is_after_2020() {
        assert!(now_millis() > 1_577_836_800_000);
    }
}
