//! Retry delays for transient serial read failures.

use std::time::Duration;

/// Largest doubling applied to the base delay
const MAX_SHIFT: u32 = 16;

/// Delay before retry number `attempt` (1-based)
///
/// Doubles from `base` on every attempt and never exceeds `max`.
/// Attempt 0 means "no failure yet" and waits for nothing.
pub fn retry_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let shift = (attempt - 1).min(MAX_SHIFT);
    base.saturating_mul(1 << shift).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_millis(100);
    const MAX: Duration = Duration::from_secs(5);

    #[test]
    fn test_backoff_doubles() {
        assert_eq!(retry_delay(1, BASE, MAX), Duration::from_millis(100));
        assert_eq!(retry_delay(2, BASE, MAX), Duration::from_millis(200));
        assert_eq!(retry_delay(3, BASE, MAX), Duration::from_millis(400));
        assert_eq!(retry_delay(6, BASE, MAX), Duration::from_millis(3200));
    }

    #[test]
    fn test_backoff_is_capped() {
        assert_eq!(retry_delay(7, BASE, MAX), MAX);
        assert_eq!(retry_delay(u32::MAX, BASE, MAX), MAX);
    }

    #[test]
    fn test_no_failure_no_delay() {
        assert_eq!(retry_delay(0, BASE, MAX), Duration::ZERO);
    }
}
