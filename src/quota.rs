use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::types::error::BskyrmError;
use crate::types::token::{PipelineCancellationToken, sleep_or_cancelled};

/// Length of the rolling accounting window.
pub const QUOTA_WINDOW: Duration = Duration::from_secs(60 * 60);

/// The governor's belief about deletions issued in the trailing hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaWindow {
    pub window_start: Instant,
    pub used_count: u64,
}

/// Client-local approximation of the server's hourly deletion quota.
///
/// Call [`acquire`](Self::acquire) immediately before dispatching a unit
/// and [`record_success`](Self::record_success) once it has been written.
/// A unit is never split: a unit larger than the remaining budget forces
/// exactly one wait-and-reset cycle and then proceeds.
#[derive(Debug)]
pub struct QuotaGovernor {
    budget: u64,
    window: QuotaWindow,
    clock: Arc<dyn Clock>,
    cancellation_token: PipelineCancellationToken,
}

impl QuotaGovernor {
    pub fn new(
        max_deletes_per_hour: u64,
        safety_margin: u64,
        clock: Arc<dyn Clock>,
        cancellation_token: PipelineCancellationToken,
    ) -> Self {
        let window = QuotaWindow {
            window_start: clock.now(),
            used_count: 0,
        };

        Self {
            budget: max_deletes_per_hour.saturating_sub(safety_margin),
            window,
            clock,
            cancellation_token,
        }
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    pub fn used_count(&self) -> u64 {
        self.window.used_count
    }

    pub fn window(&self) -> QuotaWindow {
        self.window
    }

    /// `None` if a unit of `count` fits the current window. Otherwise the
    /// remaining time until the window expires, which is zero when the
    /// hour has already elapsed.
    pub fn required_wait(&self, count: u64) -> Option<Duration> {
        if self.window.used_count.saturating_add(count) <= self.budget {
            return None;
        }

        let elapsed = self
            .clock
            .now()
            .saturating_duration_since(self.window.window_start);
        Some(QUOTA_WINDOW.saturating_sub(elapsed))
    }

    /// Block until a unit of `count` may be dispatched.
    ///
    /// Returns the time spent waiting when the over-budget branch was
    /// taken. The window is reset after that branch whether or not a wait
    /// was needed. Fails with [`BskyrmError::Cancelled`] if cancelled while
    /// waiting, in which case the window is left untouched.
    pub async fn acquire(&mut self, count: u64) -> Result<Option<Duration>> {
        let Some(wait) = self.required_wait(count) else {
            self.roll_expired_window();
            return Ok(None);
        };

        if !wait.is_zero() {
            info!(
                used_count = self.window.used_count,
                unit_size = count,
                budget = self.budget,
                wait_seconds = wait.as_secs(),
                "hourly deletion budget reached. waiting for the quota window to roll over."
            );

            if !sleep_or_cancelled(wait, &self.cancellation_token).await {
                return Err(anyhow::anyhow!(BskyrmError::Cancelled));
            }
        }

        self.reset_window();
        Ok(Some(wait))
    }

    pub fn record_success(&mut self, count: u64) {
        self.window.used_count = self.window.used_count.saturating_add(count);

        debug!(
            used_count = self.window.used_count,
            budget = self.budget,
            "quota usage updated."
        );
    }

    // A window older than an hour counts nothing, even when the next unit fits.
    fn roll_expired_window(&mut self) {
        let elapsed = self
            .clock
            .now()
            .saturating_duration_since(self.window.window_start);
        if elapsed >= QUOTA_WINDOW {
            self.reset_window();
        }
    }

    fn reset_window(&mut self) {
        self.window = QuotaWindow {
            window_start: self.clock.now(),
            used_count: 0,
        };

        debug!("quota window reset.");
    }
}
