//! Retry budget and backoff for queue items.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How often and how patiently a failed item is redriven.
///
/// The delay before redrive after a failure is
/// `min(base_delay * 2^retry_count, max_delay)`, then stretched by up to
/// `jitter` (a fraction, 0.2 = 20%) so that many documents coming back online
/// together do not all redrive at the same instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Maximum number of retries before an item is dead-lettered
    pub max_retries: u32,
    #[serde(with = "millis")]
    pub base_delay: Duration,
    #[serde(with = "millis")]
    pub max_delay: Duration,
    /// Upper bound of the random stretch, as a fraction of the delay
    pub jitter: f64,
}

impl RetryPolicy {
    /// Creates a policy with default delays.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: 0.2,
        }
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the jitter fraction.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before redriving an item that has already been retried
    /// `retry_count` times.
    ///
    /// `sample` is a uniform random number in `[0, 1)`; it is clamped into that
    /// range so the result stays within the documented bounds.
    pub fn delay_for(&self, retry_count: u32, sample: f64) -> Duration {
        let exponent = retry_count.min(32) as i32;
        let exponential = self.base_delay.as_secs_f64() * 2f64.powi(exponent);
        let capped = exponential.min(self.max_delay.as_secs_f64());

        let stretch = 1.0 + self.jitter.max(0.0) * sample.clamp(0.0, 1.0);
        Duration::from_secs_f64(capped * stretch)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
