//! Exponential backoff with jitter for retried downstream calls.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`, capped,
/// plus up to 10% jitter so retries from many requests do not line up.
pub fn backoff_delay(retry: u32, config: &RetryConfig) -> Duration {
    if retry == 0 {
        return Duration::ZERO;
    }

    let capped = config
        .base_delay_ms
        .saturating_mul(1u64 << (retry - 1).min(32))
        .min(config.max_delay_ms);

    let jitter = match capped / 10 {
        0 => 0,
        range => rand::thread_rng().gen_range(0..range),
    };

    Duration::from_millis(capped + jitter)
}
