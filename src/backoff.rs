//! Delay schedule for re-dialing the event stream.
//!
//! Dial attempts are unbounded; only the spacing between them grows.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;

/// Exponential backoff with a cap and lightweight jitter.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Backoff {
    /// Delay used after the first failed attempt.
    pub initial: Duration,
    /// Upper bound for delay growth.
    pub max: Duration,
    /// Maximum random jitter added to each delay.
    pub jitter: Duration,
}

impl Backoff {
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            initial: delay,
            max: delay,
            jitter: Duration::ZERO,
        }
    }

    /// Computes the delay to apply after the given failed attempt.
    ///
    /// `attempt` is 1-based.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let doublings = u32::try_from(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX)
            .min(31);
        let capped = self
            .initial
            .saturating_mul(1 << doublings)
            .min(self.max);
        capped + self.spread(attempt)
    }

    /// Clock-seeded offset in `0..=jitter`.
    fn spread(&self, attempt: usize) -> Duration {
        let Ok(bound) = u64::try_from(self.jitter.as_nanos()) else {
            return self.jitter;
        };
        if bound == 0 {
            return Duration::ZERO;
        }

        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| u64::from(elapsed.subsec_nanos()))
            .unwrap_or_default();
        let salted = seed.rotate_left((attempt % 64) as u32) ^ attempt as u64;
        Duration::from_nanos(salted % bound.saturating_add(1))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            jitter: Duration::from_millis(250),
        }
    }
}

/// Sleeps for `delay` unless `shutdown` fires first.
///
/// Returns `false` when the sleep was cut short by cancellation.
pub(crate) async fn sleep_or_cancel(delay: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::{sleep_or_cancel, Backoff};

    #[test]
    fn delay_doubles_until_capped() {
        let backoff = Backoff {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(350),
            jitter: Duration::ZERO,
        };

        assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for_attempt(3), Duration::from_millis(350));
        assert_eq!(backoff.delay_for_attempt(50), Duration::from_millis(350));
    }

    #[test]
    fn jitter_stays_within_bound() {
        let backoff = Backoff {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(10),
            jitter: Duration::from_millis(5),
        };

        for attempt in 1..20 {
            let delay = backoff.delay_for_attempt(attempt);
            assert!(delay >= Duration::from_millis(10));
            assert!(delay <= Duration::from_millis(15));
        }
    }

    #[test]
    fn default_schedule_caps_at_thirty_seconds() {
        let backoff = Backoff::default();
        let late = backoff.delay_for_attempt(usize::MAX);
        assert!(late >= Duration::from_secs(30));
        assert!(late <= Duration::from_millis(30_250));
    }

    #[test]
    fn fixed_backoff_never_grows() {
        let backoff = Backoff::fixed(Duration::from_secs(5));
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_secs(5));
        assert_eq!(backoff.delay_for_attempt(9), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn cancelled_sleep_returns_early() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let completed = tokio::time::timeout(
            Duration::from_secs(1),
            sleep_or_cancel(Duration::from_secs(60), &shutdown),
        )
        .await
        .expect("cancelled sleep should not block");
        assert!(!completed);
    }

    #[tokio::test(start_paused = true)]
    async fn uncancelled_sleep_runs_to_completion() {
        let shutdown = CancellationToken::new();
        assert!(sleep_or_cancel(Duration::from_secs(5), &shutdown).await);
    }
}
