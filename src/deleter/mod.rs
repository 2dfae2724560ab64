//! Dispatch retry engine.
//!
//! Submits one work unit as a single batch write and drives it to a
//! terminal outcome:
//!
//! ```text
//! Pending → InFlight → Succeeded
//!              │  ↑
//!              ↓  │ (rate limited)
//!            Waiting
//!              │
//!              └→ Aborted (any other error, or retries exhausted)
//! ```
//!
//! Rate-limit responses are absorbed here and never surface to the caller.
//! The retry loop is iterative and unbounded unless
//! [`RateLimitRetryConfig::max_retries`] is set.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::RateLimitRetryConfig;
use crate::quota::QuotaGovernor;
use crate::storage::Storage;
use crate::types::error::{BskyrmError, as_xrpc_error};
use crate::types::token::{PipelineCancellationToken, sleep_or_cancelled};
use crate::types::{DeletionStatistics, DeletionStatsReport, DispatchOutcome, WorkUnit};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchState {
    Pending,
    InFlight,
    Waiting(Duration),
}

pub struct BatchDeleter {
    storage: Storage,
    retry_config: RateLimitRetryConfig,
    clock: Arc<dyn Clock>,
    stats_report: Arc<DeletionStatsReport>,
    cancellation_token: PipelineCancellationToken,
}

impl BatchDeleter {
    pub fn new(
        storage: Storage,
        retry_config: RateLimitRetryConfig,
        clock: Arc<dyn Clock>,
        stats_report: Arc<DeletionStatsReport>,
        cancellation_token: PipelineCancellationToken,
    ) -> Self {
        Self {
            storage,
            retry_config,
            clock,
            stats_report,
            cancellation_token,
        }
    }

    /// Write `unit` until it succeeds or is aborted.
    ///
    /// On success the governor's usage is increased by the unit size,
    /// exactly once regardless of how many attempts were made. Returns
    /// [`BskyrmError::Cancelled`] if cancelled while backing off.
    pub async fn dispatch(
        &self,
        unit: &WorkUnit,
        governor: &mut QuotaGovernor,
    ) -> Result<DispatchOutcome> {
        let mut state = DispatchState::Pending;
        let mut rate_limit_retries: u32 = 0;

        loop {
            match state {
                DispatchState::Pending => {
                    debug!(unit = unit.index, size = unit.len(), "dispatching batch.");
                    state = DispatchState::InFlight;
                }
                DispatchState::Waiting(wait) => {
                    self.stats_report.increment_rate_limit_waits();
                    self.storage
                        .send_stats(DeletionStatistics::RateLimitWait {
                            wait_milliseconds: wait.as_millis() as u64,
                        })
                        .await;

                    if !sleep_or_cancelled(wait, &self.cancellation_token).await {
                        info!(unit = unit.index, "rate limit wait cancelled.");
                        return Err(anyhow!(BskyrmError::Cancelled));
                    }
                    state = DispatchState::InFlight;
                }
                DispatchState::InFlight => {
                    let Err(e) = self.storage.apply_deletes(&unit.intents).await else {
                        governor.record_success(unit.len() as u64);
                        self.stats_report.add_deleted(unit.len() as u64);
                        self.storage
                            .send_stats(DeletionStatistics::DeleteComplete {
                                count: unit.len() as u64,
                            })
                            .await;

                        info!(
                            unit = unit.index,
                            size = unit.len(),
                            used_count = governor.used_count(),
                            "batch deleted."
                        );
                        return Ok(DispatchOutcome::Succeeded);
                    };

                    let Some(reset) = as_xrpc_error(&e)
                        .filter(|xrpc_error| xrpc_error.is_rate_limited())
                        .map(|xrpc_error| xrpc_error.ratelimit_reset)
                    else {
                        let reason = format!("{e:#}");
                        error!(unit = unit.index, reason = reason, "batch write failed.");
                        return Ok(DispatchOutcome::Aborted(reason));
                    };

                    if let Some(max_retries) = self.retry_config.max_retries {
                        if rate_limit_retries >= max_retries {
                            let reason = format!(
                                "rate limit retries exhausted after {} attempts.",
                                rate_limit_retries + 1
                            );
                            error!(unit = unit.index, reason = reason, "batch write failed.");
                            return Ok(DispatchOutcome::Aborted(reason));
                        }
                    }
                    rate_limit_retries += 1;

                    let wait = rate_limit_wait(
                        reset,
                        self.clock.unix_time_millis(),
                        Duration::from_millis(self.retry_config.default_wait_milliseconds),
                    );
                    warn!(
                        unit = unit.index,
                        ratelimit_reset = reset,
                        wait_milliseconds = wait.as_millis() as u64,
                        retry = rate_limit_retries,
                        "rate limited. waiting before retrying the same batch."
                    );
                    state = DispatchState::Waiting(wait);
                }
            }
        }
    }
}

/// Backoff before retrying a rate-limited write.
///
/// `reset_epoch_seconds` is the server's `ratelimit-reset` hint. Without a
/// hint, or when the hint is not in the future, `default_wait` is used so
/// that the retry never spins.
pub fn rate_limit_wait(
    reset_epoch_seconds: Option<i64>,
    now_unix_millis: i64,
    default_wait: Duration,
) -> Duration {
    let Some(reset) = reset_epoch_seconds else {
        return default_wait;
    };

    let wait_millis = reset.saturating_mul(1000).saturating_sub(now_unix_millis);
    if wait_millis <= 0 {
        default_wait
    } else {
        Duration::from_millis(wait_millis as u64)
    }
}
