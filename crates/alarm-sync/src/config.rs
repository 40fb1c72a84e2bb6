//! Coordinator configuration and retry timing.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Configuration for the sync coordinator.
///
/// # Backoff Calculation
///
/// Retry delay follows exponential backoff: `base * 2^(attempt - 1)`
/// capped at `backoff_max`, then scaled by a random factor in
/// `1 ± backoff_jitter`. For the defaults:
/// - 1st retry: ~1s
/// - 2nd retry: ~2s
/// - 3rd retry: ~4s
/// - ... up to 60s
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Capacity of the store-change queue. Overflow triggers a full planning pass.
    pub change_queue_capacity: usize,
    /// Maximum tasks fetched per dispatch.
    pub batch_size: usize,
    /// Maximum adapter calls in flight.
    pub max_concurrency: usize,
    /// Attempts per task before the backend is given up on for the alarm.
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Fractional jitter applied to each backoff, 0.0 to 1.0.
    pub backoff_jitter: f64,
    /// Deadline for every adapter call. Expiry counts as unavailable.
    pub call_timeout: Duration,
    pub dispatch_interval: Duration,
    pub reconcile_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            change_queue_capacity: 256,
            batch_size: 32,
            max_concurrency: 4,
            max_attempts: 5,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
            backoff_jitter: 0.2,
            call_timeout: Duration::from_secs(10),
            dispatch_interval: Duration::from_millis(500),
            reconcile_interval: Duration::from_secs(300),
        }
    }
}

/// Computes the exponential backoff for a given attempt count.
///
/// | Attempt | Delay (base=1s, max=60s) |
/// |---------|--------------------------|
/// | 0       | 0s                       |
/// | 1       | 1s                       |
/// | 2       | 2s                       |
/// | 3       | 4s                       |
/// | 7       | 60s                      |
pub fn compute_backoff(attempt: u32, config: &SyncConfig) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let base_ms = config.backoff_base.as_millis() as u64;
    let max_ms = config.backoff_max.as_millis() as u64;
    let shift = attempt.saturating_sub(1);
    let multiplier = 1u64.checked_shl(shift).unwrap_or(u64::MAX);
    let delay_ms = base_ms.saturating_mul(multiplier).min(max_ms);

    Duration::from_millis(delay_ms)
}

/// [`compute_backoff`] with jitter applied.
pub fn jittered_backoff(attempt: u32, config: &SyncConfig) -> Duration {
    let delay = compute_backoff(attempt, config);
    let jitter = config.backoff_jitter.clamp(0.0, 1.0);
    if jitter == 0.0 || delay.is_zero() {
        return delay;
    }
    let factor = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
    delay.mul_f64(factor)
}
