//! Exponential backoff between retry attempts.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    factor: f64,
    jitter: f64,
}

impl ExponentialBackoff {
    /// Backoff without jitter, so delays never decrease from one attempt to the next.
    pub fn new(initial: Duration, max: Duration, factor: f64) -> Self {
        Self {
            initial,
            max,
            factor: factor.max(1.0),
            jitter: 0.0,
        }
    }

    /// Randomize each delay by up to `±jitter` of its value. Jittered delays
    /// are still capped at `max` but may dip below the previous attempt's.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Wait before retry number `attempt` (1-based: the wait after the first failure).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base = self.initial.as_millis() as f64 * self.factor.powi(exponent);
        let clamped = base.min(self.max.as_millis() as f64);

        let jittered = if self.jitter > 0.0 {
            let jitter_range = clamped * self.jitter;
            let jitter_offset = rand::random::<f64>() * jitter_range * 2.0 - jitter_range;
            (clamped + jitter_offset).clamp(0.0, self.max.as_millis() as f64)
        } else {
            clamped
        };

        Duration::from_millis(jittered as u64)
    }

    /// Like [`delay_for`](Self::delay_for), but never shorter than a
    /// server-provided `retry-after` hint. The hint is capped at `max`.
    pub fn delay_with_hint(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let delay = self.delay_for(attempt);
        match retry_after {
            Some(hint) => delay.max(hint.min(self.max)),
            None => delay,
        }
    }
}

impl Default for ExponentialBackoff {
    /// 4s, 8s, 16s, 32s, then 60s.
    fn default() -> Self {
        Self::new(Duration::from_secs(4), Duration::from_secs(60), 2.0)
    }
}
