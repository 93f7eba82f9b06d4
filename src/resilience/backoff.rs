//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// Delay before retry number `attempt` (1-based).
///
/// `min(initial * 2^(attempt-1), max) + uniform[0, jitter)` milliseconds.
/// Attempt 0 has no delay.
pub fn calculate_backoff(attempt: u32, initial_ms: u64, max_ms: u64, jitter_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let capped_delay = initial_ms.saturating_mul(exponential_base).min(max_ms);

    let jitter = if jitter_ms > 0 {
        rand::thread_rng().gen_range(0..jitter_ms)
    } else {
        0
    };

    Duration::from_millis(capped_delay.saturating_add(jitter))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_until_cap() {
        assert_eq!(calculate_backoff(1, 1000, 30_000, 0), Duration::from_millis(1000));
        assert_eq!(calculate_backoff(2, 1000, 30_000, 0), Duration::from_millis(2000));
        assert_eq!(calculate_backoff(3, 1000, 30_000, 0), Duration::from_millis(4000));
        assert_eq!(calculate_backoff(6, 1000, 30_000, 0), Duration::from_millis(30_000));
        assert_eq!(calculate_backoff(64, 1000, 30_000, 0), Duration::from_millis(30_000));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        for _ in 0..200 {
            let delay = calculate_backoff(2, 100, 10_000, 50).as_millis();
            assert!((200..250).contains(&delay), "delay {delay} out of range");
        }
    }

    #[test]
    fn test_zero_attempt_has_no_delay() {
        assert_eq!(calculate_backoff(0, 1000, 30_000, 500), Duration::ZERO);
    }
}
