//! Retry delay computation

use rand::Rng;

use fleet_core::workflow::RetryConfig;

/// Compute the delay before a retry attempt.
///
/// `delay = base_delay * multiplier^(attempt-1) * (1 + jitter)` with jitter
/// uniform in [0, 0.1), attempt 1-indexed, floored to whole milliseconds.
pub fn retry_delay_ms(config: &RetryConfig, attempt: u32) -> u64 {
    let attempt = attempt.max(1);
    let base = config.base_delay_ms as f64 * config.backoff_multiplier.powi(attempt as i32 - 1);
    let jitter: f64 = rand::thread_rng().gen_range(0.0..0.1);
    (base * (1.0 + jitter)).floor() as u64
}
