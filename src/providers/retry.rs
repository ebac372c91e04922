//! Exponential backoff with jitter.
//!
//! The agent loop owns retry decisions (see the recovery ladder); this
//! module only computes how long to wait.

use std::time::Duration;

/// Compute the backoff delay for a given attempt.
///
/// `min(base_delay_ms * 2^attempt + jitter_ms, max_delay_ms)`, with the
/// exponent capped at 16.
///
/// # Arguments
/// * `attempt` - The retry attempt (0-indexed)
/// * `base_delay_ms` - Base delay in milliseconds
/// * `max_delay_ms` - Maximum delay cap in milliseconds
/// * `jitter_ms` - Jitter value to add
pub fn compute_delay(attempt: u32, base_delay_ms: u64, max_delay_ms: u64, jitter_ms: u64) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(16));
    exponential.saturating_add(jitter_ms).min(max_delay_ms)
}

/// Backoff for `attempt` with a small jitter in `[0, base_delay_ms)`.
///
/// The jitter comes from the sub-second clock, enough to decorrelate
/// concurrent workers backing off from the same rate limit.
pub fn backoff_delay(attempt: u32, base_delay_ms: u64, max_delay_ms: u64) -> Duration {
    let jitter_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64 % base_delay_ms.max(1))
        .unwrap_or(0);
    Duration::from_millis(compute_delay(
        attempt,
        base_delay_ms,
        max_delay_ms,
        jitter_ms,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_delay_doubles() {
        assert_eq!(compute_delay(0, 500, 8_000, 0), 500);
        assert_eq!(compute_delay(1, 500, 8_000, 0), 1_000);
        assert_eq!(compute_delay(2, 500, 8_000, 0), 2_000);
    }

    #[test]
    fn test_compute_delay_capped() {
        assert_eq!(compute_delay(5, 500, 8_000, 0), 8_000);
        assert_eq!(compute_delay(60, 500, 8_000, 999), 8_000);
    }

    #[test]
    fn test_backoff_delay_within_bounds() {
        for attempt in 0..4 {
            let d = backoff_delay(attempt, 500, 8_000).as_millis() as u64;
            let floor = compute_delay(attempt, 500, 8_000, 0);
            assert!(d >= floor && d <= 8_000, "attempt {} gave {}", attempt, d);
        }
    }
}
