//! Time sources for the quota governor and the retry engine.
//!
//! Monotonic time comes from `tokio::time::Instant` so that tests running
//! under a paused tokio clock see waits advance instantly. Wall-clock time
//! is needed to interpret the server's `ratelimit-reset` header, which is
//! an absolute epoch timestamp.

use std::fmt::Debug;

use tokio::time::Instant;

pub trait Clock: Debug + Send + Sync {
    /// Monotonic "now" used for quota window accounting.
    fn now(&self) -> Instant;

    /// Milliseconds since the Unix epoch.
    fn unix_time_millis(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_time_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}
