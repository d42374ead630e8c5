use rand::Rng;
use std::time::Duration;

const MAX_DOUBLINGS: u32 = 16;

/// Retry schedule for one background loop. Each consecutive failure doubles
/// the wait up to `ceiling`; a server supplied `Retry-After` takes its place.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    first_delay: Duration,
    ceiling: Duration,
    jitter: bool,
    failures: u32,
}

impl RetryPolicy {
    pub fn new(first_delay: Duration, ceiling: Duration) -> Self {
        Self {
            first_delay,
            ceiling: ceiling.max(first_delay),
            jitter: true,
            failures: 0,
        }
    }

    /// Starts at one second and never waits longer than one regular poll.
    pub fn for_poll_interval(poll_interval: Duration) -> Self {
        let first_delay = Duration::from_secs(1);
        Self::new(first_delay, poll_interval.max(first_delay))
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Counts one more failure and returns how long to wait before the next
    /// attempt.
    pub fn record_failure(&mut self, retry_after_secs: Option<u64>) -> Duration {
        let mut rng = rand::thread_rng();
        self.record_failure_with_rng(retry_after_secs, &mut rng)
    }

    fn record_failure_with_rng<R: Rng + ?Sized>(
        &mut self,
        retry_after_secs: Option<u64>,
        rng: &mut R,
    ) -> Duration {
        let doublings = self.failures.min(MAX_DOUBLINGS);
        self.failures = self.failures.saturating_add(1);
        if let Some(secs) = retry_after_secs {
            return Duration::from_secs(secs).min(self.ceiling);
        }
        let delay = self
            .first_delay
            .saturating_mul(1 << doublings)
            .min(self.ceiling);
        if !self.jitter {
            return delay;
        }
        // Keep at least half of the wait so retries never collapse to zero.
        let half = delay / 2;
        half + rng.gen_range(Duration::ZERO..=delay - half)
    }
}
