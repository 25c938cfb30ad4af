//! Millisecond wall clock driven by the tokio timer.

use quill_engine::Timestamp;
use tokio::time::Instant;

/// Wall-clock milliseconds anchored once, then advanced by tokio's monotonic
/// clock.
///
/// Queue backoff deadlines and tokio sleeps therefore agree with each other,
/// including under a paused test clock.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: Instant,
    origin_ms: Timestamp,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            origin_ms: chrono::Utc::now().timestamp_millis().max(0) as Timestamp,
        }
    }

    /// Milliseconds since the Unix epoch.
    pub fn now_ms(&self) -> Timestamp {
        self.origin_ms + self.origin.elapsed().as_millis() as Timestamp
    }

    /// The tokio instant matching a timestamp from [`Clock::now_ms`].
    pub fn instant_at(&self, at: Timestamp) -> Instant {
        let offset = at.saturating_sub(self.origin_ms);
        self.origin + std::time::Duration::from_millis(offset)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
