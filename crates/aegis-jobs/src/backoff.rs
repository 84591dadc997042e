//! Retry delays for failed jobs.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff: `base * 2^attempts`, plus jitter in `[0, delay / 4)`,
/// never more than `max`.
///
/// Below the cap the jitter can never close the gap to the next step, so
/// successive retries of one job always wait strictly longer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before the retry that follows `attempts` earlier failures, without jitter.
    pub fn delay(&self, attempts: u32) -> Duration {
        let factor = 1u32.checked_shl(attempts).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// [`delay`](Self::delay) plus random jitter, capped at `max`.
    pub fn jittered(&self, attempts: u32) -> Duration {
        self.jittered_with(attempts, &mut rand::thread_rng())
    }

    pub fn jittered_with<R: Rng + ?Sized>(&self, attempts: u32, rng: &mut R) -> Duration {
        let delay = self.delay(attempts);
        let spread = u64::try_from((delay / 4).as_nanos()).unwrap_or(u64::MAX);
        let jitter = if spread == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(rng.gen_range(0..spread))
        };
        delay.saturating_add(jitter).min(self.max)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(3600))
    }
}
