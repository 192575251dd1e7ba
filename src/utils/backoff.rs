//! Jittered exponential backoff for transient fetch failures

use rand::Rng;
use std::time::Duration;

/// Delay before retry number `attempt` (1-based): `2^(attempt-1)` seconds
/// plus up to one second of jitter to avoid thundering herds.
pub fn retry_delay(attempt: u32) -> Duration {
    let base_ms = 1000u64 << (attempt.saturating_sub(1)).min(6);
    let jitter_ms = rand::rng().random_range(0..1000);
    Duration::from_millis(base_ms + jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_and_stays_bounded() {
        for _ in 0..20 {
            let first = retry_delay(1);
            assert!(first >= Duration::from_secs(1));
            assert!(first < Duration::from_secs(3));

            let second = retry_delay(2);
            assert!(second >= Duration::from_secs(2));
            assert!(second < Duration::from_secs(4));
        }
        // Shift is capped so huge attempt counts cannot overflow
        assert!(retry_delay(200) < Duration::from_secs(66));
    }
}
