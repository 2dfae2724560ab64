// Progress line and final summary.
//
// Reads DeletionStatistics from the pipeline's stats channel. The scan
// phase and the delete phase report different counters; both are shown on
// one line.

use std::io;
use std::io::Write;

use async_channel::Receiver;
use bskyrm_rs::DeletionStatistics;
use indicatif::{HumanCount, HumanDuration, ProgressBar, ProgressStyle};
use simple_moving_average::{SMA, SumTreeSMA};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::info;

/// Totals returned by [`show_indicator`] after the stats channel closes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndicatorSummary {
    pub scanned: u64,
    pub matched: u64,
    pub deleted: u64,
    pub abandoned: u64,
    pub skipped: u64,
    pub rate_limit_waits: u64,
    pub quota_waits: u64,
}

impl IndicatorSummary {
    fn apply(&mut self, stats: DeletionStatistics) -> u64 {
        match stats {
            DeletionStatistics::ScanPage { items, matched } => {
                self.scanned += items;
                self.matched += matched;
            }
            DeletionStatistics::DeleteComplete { count } => {
                self.deleted += count;
                return count;
            }
            DeletionStatistics::DeleteAbandoned { count } => {
                self.abandoned += count;
            }
            DeletionStatistics::RateLimitWait { .. } => {
                self.rate_limit_waits += 1;
            }
            DeletionStatistics::QuotaWait { .. } => {
                self.quota_waits += 1;
            }
            DeletionStatistics::SkipWarning { .. } => {
                self.skipped += 1;
            }
        }
        0
    }
}

/// Moving average window in seconds (samples).
const MOVING_AVERAGE_PERIOD_SECS: usize = 10;

/// How often (in seconds) to refresh the progress display.
const REFRESH_INTERVAL: f32 = 1.0;

/// Spawn a task that renders progress until `stats_receiver` is closed.
pub fn show_indicator(
    stats_receiver: Receiver<DeletionStatistics>,
    show_progress: bool,
    show_result: bool,
    dry_run: bool,
) -> JoinHandle<IndicatorSummary> {
    let progress_style = ProgressStyle::with_template("{wide_msg}").unwrap();
    let progress_text = ProgressBar::new(0);
    progress_text.set_style(progress_style);

    tokio::spawn(async move {
        let start_time = Instant::now();

        let mut ma_deleted_count = SumTreeSMA::<_, u64, MOVING_AVERAGE_PERIOD_SECS>::new();
        let mut summary = IndicatorSummary::default();

        loop {
            let mut period_count: u64 = 0;

            let period = Instant::now();
            loop {
                while let Ok(stats) = stats_receiver.try_recv() {
                    period_count += summary.apply(stats);
                }

                if REFRESH_INTERVAL < period.elapsed().as_secs_f32() {
                    break;
                }

                if stats_receiver.is_closed() && stats_receiver.is_empty() {
                    let elapsed = start_time.elapsed();

                    info!(
                        message = "deletion summary",
                        scanned = summary.scanned,
                        matched = summary.matched,
                        deleted = summary.deleted,
                        abandoned = summary.abandoned,
                        skipped = summary.skipped,
                        rate_limit_waits = summary.rate_limit_waits,
                        quota_waits = summary.quota_waits,
                        duration_sec = elapsed.as_secs_f64(),
                    );

                    if show_result {
                        progress_text.set_style(ProgressStyle::with_template("{msg}").unwrap());

                        let message = if dry_run {
                            format!(
                                "[dry-run] scanned {} posts,  {} would be deleted,  skipped {},  duration {}",
                                HumanCount(summary.scanned),
                                HumanCount(summary.matched),
                                summary.skipped,
                                HumanDuration(elapsed),
                            )
                        } else {
                            format!(
                                "scanned {} posts,  matched {},  deleted {},  abandoned {},  skipped {},  rate limit waits {},  quota waits {},  duration {}",
                                HumanCount(summary.scanned),
                                HumanCount(summary.matched),
                                HumanCount(summary.deleted),
                                summary.abandoned,
                                summary.skipped,
                                summary.rate_limit_waits,
                                summary.quota_waits,
                                HumanDuration(elapsed),
                            )
                        };
                        progress_text.finish_with_message(message);

                        println!();
                        let _ = io::stdout().flush();
                    }

                    return summary;
                }

                tokio::time::sleep(std::time::Duration::from_secs_f32(0.05)).await;
            }

            if !dry_run {
                ma_deleted_count.add_sample(period_count);
            }

            if show_progress {
                progress_text.set_message(format!(
                    "scanned {} posts,  matched {},  deleted {} | {} posts/sec,  waits {}",
                    HumanCount(summary.scanned),
                    HumanCount(summary.matched),
                    HumanCount(summary.deleted),
                    HumanCount(ma_deleted_count.get_average()),
                    summary.rate_limit_waits + summary.quota_waits,
                ));
            }
        }
    })
}
