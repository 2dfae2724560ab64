//! Deletion pipeline driver.
//!
//! Two phases, read then write:
//!
//! ```text
//! ContentScanner (drain all pages) → partition → for each unit:
//!     QuotaGovernor::acquire → BatchDeleter::dispatch → inter-batch delay
//! ```
//!
//! The intent list is fully materialized before the first write, so the
//! total is known up front for the confirmation prompt and dry-run report.
//! Units are dispatched strictly in order; the first aborted unit halts
//! the run and every later unit is abandoned.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_channel::Receiver;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::deleter::BatchDeleter;
use crate::partitioner::partition;
use crate::quota::QuotaGovernor;
use crate::safety::{PromptHandler, SafetyChecker};
use crate::scanner::ContentScanner;
use crate::storage::{self, Storage};
use crate::types::error::{BskyrmError, is_cancelled_error};
use crate::types::token::{PipelineCancellationToken, sleep_or_cancelled};
use crate::types::{
    DeletionStatistics, DeletionStats, DeletionStatsReport, DispatchOutcome, PipelineReport,
    PipelineStatus, UnitReport, WorkUnit,
};

/// The deletion pipeline.
///
/// ## Usage
///
/// ```no_run
/// # async fn example() -> anyhow::Result<()> {
/// use bskyrm_rs::{Config, DeletionPipeline, create_pipeline_cancellation_token};
///
/// let config: Config = Config::for_target_domain("example.com");
/// let cancellation_token = create_pipeline_cancellation_token();
/// let mut pipeline = DeletionPipeline::new(config, cancellation_token).await?;
/// pipeline.close_stats_sender();
/// pipeline.run().await;
///
/// if pipeline.has_error() {
///     eprintln!("{:?}", pipeline.get_errors_and_consume().unwrap()[0]);
/// }
/// if let Some(report) = pipeline.get_report() {
///     println!("deleted {} of {}", report.deleted, report.intended);
/// }
/// # Ok(())
/// # }
/// ```
pub struct DeletionPipeline {
    config: Config,
    storage: Storage,
    clock: Arc<dyn Clock>,
    cancellation_token: PipelineCancellationToken,
    stats_receiver: Receiver<DeletionStatistics>,
    prompt_handler: Option<Box<dyn PromptHandler>>,
    has_error: Arc<AtomicBool>,
    has_warning: Arc<AtomicBool>,
    errors: Arc<Mutex<VecDeque<anyhow::Error>>>,
    ready: bool,
    deletion_stats_report: Arc<DeletionStatsReport>,
    report: Option<PipelineReport>,
}

impl DeletionPipeline {
    /// Validate `config`, log in and create the pipeline.
    pub async fn new(
        config: Config,
        cancellation_token: PipelineCancellationToken,
    ) -> Result<Self> {
        config.validate()?;

        let has_warning = Arc::new(AtomicBool::new(false));
        let (stats_sender, stats_receiver) = async_channel::unbounded();
        let storage = storage::create_storage(&config, stats_sender, has_warning.clone()).await?;

        let mut pipeline = Self::with_storage(
            config,
            storage,
            stats_receiver,
            Arc::new(SystemClock),
            cancellation_token,
        );
        pipeline.has_warning = has_warning;

        Ok(pipeline)
    }

    /// Create a pipeline over an existing storage.
    ///
    /// `stats_receiver` must be the receiving end of the storage's stats
    /// sender.
    pub fn with_storage(
        config: Config,
        storage: Storage,
        stats_receiver: Receiver<DeletionStatistics>,
        clock: Arc<dyn Clock>,
        cancellation_token: PipelineCancellationToken,
    ) -> Self {
        Self {
            config,
            storage,
            clock,
            cancellation_token,
            stats_receiver,
            prompt_handler: None,
            has_error: Arc::new(AtomicBool::new(false)),
            has_warning: Arc::new(AtomicBool::new(false)),
            errors: Arc::new(Mutex::new(VecDeque::new())),
            ready: true,
            deletion_stats_report: Arc::new(DeletionStatsReport::new()),
            report: None,
        }
    }

    /// Replace the stdin/stdout confirmation prompt.
    pub fn set_prompt_handler(&mut self, prompt_handler: Box<dyn PromptHandler>) {
        self.prompt_handler = Some(prompt_handler);
    }

    /// Run the pipeline to completion.
    ///
    /// Scan failures and configuration errors are recorded as errors and
    /// produce no report. Every other ending produces a [`PipelineReport`];
    /// an aborted or cancelled run also records an error.
    pub async fn run(&mut self) {
        assert!(self.ready, "DeletionPipeline::run() called more than once");
        self.ready = false;

        match self.execute().await {
            Ok(report) => {
                self.record_report_outcome(&report);
                self.report = Some(report);
            }
            Err(e) => {
                if !is_cancelled_error(&e) {
                    error!("{:#}", e);
                }
                self.record_error(e);
            }
        }

        self.shutdown();
    }

    pub fn has_error(&self) -> bool {
        self.has_error.load(Ordering::SeqCst)
    }

    pub fn has_warning(&self) -> bool {
        self.has_warning.load(Ordering::SeqCst)
    }

    /// Consume and return all accumulated errors.
    ///
    /// Returns `None` if no errors occurred.
    pub fn get_errors_and_consume(&self) -> Option<Vec<anyhow::Error>> {
        if !self.has_error() {
            return None;
        }
        let mut error_list = self.errors.lock().unwrap();
        let mut errors = Vec::with_capacity(error_list.len());
        while let Some(e) = error_list.pop_front() {
            errors.push(e);
        }
        Some(errors)
    }

    pub fn get_error_messages(&self) -> Option<Vec<String>> {
        if !self.has_error() {
            return None;
        }
        let error_list = self.errors.lock().unwrap();
        Some(error_list.iter().map(|e| e.to_string()).collect())
    }

    pub fn get_report(&self) -> Option<&PipelineReport> {
        self.report.as_ref()
    }

    pub fn get_stats_receiver(&self) -> Receiver<DeletionStatistics> {
        self.stats_receiver.clone()
    }

    pub fn get_deletion_stats(&self) -> DeletionStats {
        self.deletion_stats_report.snapshot()
    }

    /// Close the stats sender to signal the progress reporter to finish.
    ///
    /// Call this before `run()` if you don't need progress reporting.
    pub fn close_stats_sender(&self) {
        self.storage.get_stats_sender().close();
    }

    async fn execute(&mut self) -> Result<PipelineReport> {
        self.config.validate()?;

        let budget = self.config.quota_budget();
        if self.config.batch_size as u64 > budget {
            warn!(
                batch_size = self.config.batch_size,
                budget = budget,
                "batch size exceeds the hourly budget. every batch will wait for a fresh quota window."
            );
        }

        let target_domain = self.config.target_domain.clone();
        let scanner = ContentScanner::new(
            self.storage.clone(),
            &self.config,
            self.deletion_stats_report.clone(),
            self.cancellation_token.clone(),
        );
        let intents = match scanner.scan(&target_domain).await {
            Ok(intents) => intents,
            Err(e) if is_cancelled_error(&e) => return Ok(cancelled_report(0, vec![])),
            Err(e) => return Err(e),
        };

        if intents.is_empty() {
            info!(target_domain = target_domain, "no matching posts. nothing to do.");
            return Ok(PipelineReport::nothing_to_do());
        }

        let units = partition(&intents, self.config.batch_size as usize)?;
        let intended = intents.len() as u64;
        let unit_reports: Vec<UnitReport> = units
            .iter()
            .map(|unit| UnitReport {
                index: unit.index,
                size: unit.len(),
                outcome: None,
            })
            .collect();

        info!(
            target_domain = target_domain,
            matched = intended,
            units = units.len(),
            batch_size = self.config.batch_size,
            "scan complete."
        );

        if self.config.dry_run {
            info!(matched = intended, "[dry-run] no posts were deleted.");
            return Ok(PipelineReport {
                status: PipelineStatus::DryRun,
                intended,
                deleted: 0,
                abandoned: 0,
                units: unit_reports,
            });
        }

        let checker = match self.prompt_handler.take() {
            Some(prompt_handler) => {
                SafetyChecker::with_prompt_handler(&self.config, prompt_handler)
            }
            None => SafetyChecker::new(&self.config),
        };
        if let Err(e) = checker.check_before_deletion(&target_domain, intents.len()) {
            if is_cancelled_error(&e) {
                info!("deletion declined.");
                self.abandon(intended).await;
                return Ok(cancelled_report(intended, unit_reports));
            }
            return Err(e);
        }

        self.dispatch_units(&units, intended, unit_reports).await
    }

    async fn dispatch_units(
        &self,
        units: &[WorkUnit],
        intended: u64,
        mut unit_reports: Vec<UnitReport>,
    ) -> Result<PipelineReport> {
        let mut governor = QuotaGovernor::new(
            self.config.quota_config.max_deletes_per_hour,
            self.config.quota_config.safety_margin,
            self.clock.clone(),
            self.cancellation_token.clone(),
        );
        let deleter = BatchDeleter::new(
            self.storage.clone(),
            self.config.rate_limit_retry_config,
            self.clock.clone(),
            self.deletion_stats_report.clone(),
            self.cancellation_token.clone(),
        );
        let inter_batch_delay = Duration::from_millis(self.config.inter_batch_delay_milliseconds);

        let mut deleted: u64 = 0;
        let mut status = PipelineStatus::Completed;

        for (position, unit) in units.iter().enumerate() {
            if self.cancellation_token.is_cancelled() {
                status = PipelineStatus::Cancelled;
                break;
            }

            match governor.acquire(unit.len() as u64).await {
                Ok(Some(wait)) if !wait.is_zero() => {
                    self.deletion_stats_report.increment_quota_waits();
                    self.storage
                        .send_stats(DeletionStatistics::QuotaWait {
                            wait_milliseconds: wait.as_millis() as u64,
                        })
                        .await;
                }
                Ok(_) => {}
                Err(e) if is_cancelled_error(&e) => {
                    status = PipelineStatus::Cancelled;
                    break;
                }
                Err(e) => return Err(e),
            }

            match deleter.dispatch(unit, &mut governor).await {
                Ok(DispatchOutcome::Succeeded) => {
                    unit_reports[position].outcome = Some(DispatchOutcome::Succeeded);
                    deleted += unit.len() as u64;
                }
                Ok(DispatchOutcome::Aborted(reason)) => {
                    unit_reports[position].outcome = Some(DispatchOutcome::Aborted(reason.clone()));
                    status = PipelineStatus::Aborted { reason };
                    break;
                }
                Err(e) if is_cancelled_error(&e) => {
                    status = PipelineStatus::Cancelled;
                    break;
                }
                Err(e) => return Err(e),
            }

            let is_last = position + 1 == units.len();
            if !is_last && !inter_batch_delay.is_zero() {
                debug!(
                    delay_milliseconds = self.config.inter_batch_delay_milliseconds,
                    "waiting before next batch."
                );
                if !sleep_or_cancelled(inter_batch_delay, &self.cancellation_token).await {
                    status = PipelineStatus::Cancelled;
                    break;
                }
            }
        }

        let abandoned = intended - deleted;
        self.abandon(abandoned).await;

        Ok(PipelineReport {
            status,
            intended,
            deleted,
            abandoned,
            units: unit_reports,
        })
    }

    async fn abandon(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.deletion_stats_report.add_abandoned(count);
        self.storage
            .send_stats(DeletionStatistics::DeleteAbandoned { count })
            .await;
    }

    fn record_report_outcome(&self, report: &PipelineReport) {
        match &report.status {
            PipelineStatus::NothingToDo | PipelineStatus::DryRun | PipelineStatus::Completed => {
                info!(
                    intended = report.intended,
                    deleted = report.deleted,
                    "deletion run finished."
                );
            }
            PipelineStatus::Aborted { reason } => {
                error!(
                    deleted = report.deleted,
                    abandoned = report.abandoned,
                    reason = reason,
                    "deletion run aborted."
                );
                if report.deleted > 0 {
                    self.record_error(anyhow!(BskyrmError::PartialCompletion {
                        deleted: report.deleted,
                        abandoned: report.abandoned,
                    }));
                } else {
                    self.record_error(anyhow!(BskyrmError::WriteFailure(reason.clone())));
                }
            }
            PipelineStatus::Cancelled => {
                warn!(
                    deleted = report.deleted,
                    abandoned = report.abandoned,
                    "deletion run cancelled."
                );
                self.record_error(anyhow!(BskyrmError::Cancelled));
            }
        }
    }

    fn record_error(&self, error: anyhow::Error) {
        self.has_error.store(true, Ordering::SeqCst);
        self.errors.lock().unwrap().push_back(error);
    }

    fn shutdown(&self) {
        self.close_stats_sender();
    }
}

fn cancelled_report(intended: u64, units: Vec<UnitReport>) -> PipelineReport {
    PipelineReport {
        status: PipelineStatus::Cancelled,
        intended,
        deleted: 0,
        abandoned: intended,
        units,
    }
}
