//! Delay calculation for retried requests

use std::time::Duration;

use bridge_traits::http::{HttpResponse, RetryPolicy};
use rand::Rng;

/// Delay before retrying after the `failures`-th transport or 5xx failure,
/// without jitter. Starts at `base_delay` and doubles up to `max_delay`.
pub fn exponential_delay(policy: &RetryPolicy, failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    policy
        .base_delay
        .saturating_mul(1u32 << exponent)
        .min(policy.max_delay)
}

/// [`exponential_delay`] plus a random jitter of at most `policy.jitter`.
pub fn backoff_delay(policy: &RetryPolicy, failures: u32) -> Duration {
    let jitter_ms = policy.jitter.as_millis() as u64;
    let jitter = if jitter_ms == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    };
    exponential_delay(policy, failures) + jitter
}

/// Wait requested by a 429 response.
///
/// A missing or unparsable `Retry-After` counts as one second. The result is
/// clamped to the policy's rate-limit bounds.
pub fn retry_after_delay(policy: &RetryPolicy, response: &HttpResponse) -> Duration {
    let requested = response
        .header("Retry-After")
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(1));

    requested.clamp(policy.rate_limit_min_delay, policy.rate_limit_max_delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_delay_doubles_and_caps() {
        let policy = RetryPolicy::default();
        let delays: Vec<u128> = (1..=7)
            .map(|n| exponential_delay(&policy, n).as_millis())
            .collect();

        assert_eq!(delays, vec![500, 1000, 2000, 4000, 8000, 8000, 8000]);
    }

    #[test]
    fn test_backoff_jitter_is_bounded() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            let delay = backoff_delay(&policy, 2);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(1200));
        }
    }

    #[test]
    fn test_retry_after_is_clamped() {
        let policy = RetryPolicy::default();
        let with = |value: &str| HttpResponse::new(429, "").with_header("Retry-After", value);

        assert_eq!(retry_after_delay(&policy, &with("3")), Duration::from_secs(3));
        assert_eq!(retry_after_delay(&policy, &with("0")), Duration::from_secs(1));
        assert_eq!(retry_after_delay(&policy, &with("120")), Duration::from_secs(10));
        assert_eq!(retry_after_delay(&policy, &with("soon")), Duration::from_secs(1));
        assert_eq!(
            retry_after_delay(&policy, &HttpResponse::new(429, "")),
            Duration::from_secs(1)
        );
    }
}
