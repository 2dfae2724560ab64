use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::matcher::find_evidence;
use crate::storage::Storage;
use crate::types::error::BskyrmError;
use crate::types::token::PipelineCancellationToken;
use crate::types::{DeleteIntent, DeletionStatistics, DeletionStatsReport, POST_COLLECTION};

/// Tracing target of per-match diagnostic events.
pub const MATCH_DIAGNOSTICS_TARGET: &str = "bskyrm_rs::match";

/// Walks the account's entire post history, oldest first, and collects a
/// delete intent for every post that references the target domain.
///
/// The result is fully materialized before `scan` returns. Any page fetch
/// error aborts the scan: a partial intent list is never returned.
pub struct ContentScanner {
    storage: Storage,
    page_size: u16,
    verbose: bool,
    stats_report: Arc<DeletionStatsReport>,
    cancellation_token: PipelineCancellationToken,
}

impl ContentScanner {
    pub fn new(
        storage: Storage,
        config: &Config,
        stats_report: Arc<DeletionStatsReport>,
        cancellation_token: PipelineCancellationToken,
    ) -> Self {
        Self {
            storage,
            page_size: config.page_size,
            verbose: config.verbose,
            stats_report,
            cancellation_token,
        }
    }

    pub async fn scan(&self, target_domain: &str) -> Result<Vec<DeleteIntent>> {
        debug!(
            account = self.storage.account_id(),
            target_domain = target_domain,
            "scan has started."
        );

        let mut intents = Vec::new();
        let mut cursor: Option<String> = None;
        let mut scanned: u64 = 0;
        let mut pages: u64 = 0;

        loop {
            let page = tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => {
                    info!("scan cancelled.");
                    return Err(anyhow!(BskyrmError::Cancelled));
                }
                page = self.storage.list_records(
                    POST_COLLECTION,
                    self.page_size,
                    cursor.as_deref(),
                    true,
                ) => page,
            };
            let page = page
                .with_context(|| {
                    format!(
                        "failed to fetch page {} (cursor: {}).",
                        pages + 1,
                        cursor.as_deref().unwrap_or("none")
                    )
                })
                .map_err(|e| {
                    let message = format!("{e:#}");
                    e.context(BskyrmError::ScanFailure(message))
                })?;

            pages += 1;
            scanned += page.records.len() as u64;
            let mut matched: u64 = 0;

            for item in &page.records {
                let Some(evidence) = find_evidence(item, target_domain) else {
                    continue;
                };

                let Some(intent) = DeleteIntent::from_uri(&item.uri) else {
                    warn!(uri = item.uri, "matched post has no usable record key. skipping.");
                    self.storage.set_warning();
                    self.storage
                        .send_stats(DeletionStatistics::SkipWarning {
                            uri: item.uri.clone(),
                        })
                        .await;
                    continue;
                };

                if self.verbose {
                    info!(
                        target: MATCH_DIAGNOSTICS_TARGET,
                        uri = item.uri,
                        evidence = evidence.source(),
                        link = evidence.link(),
                        "post matched."
                    );
                } else {
                    debug!(uri = item.uri, evidence = %evidence, "post matched.");
                }

                matched += 1;
                intents.push(intent);
            }

            self.stats_report.add_scanned(page.records.len() as u64);
            self.stats_report.add_matched(matched);
            self.storage
                .send_stats(DeletionStatistics::ScanPage {
                    items: page.records.len() as u64,
                    matched,
                })
                .await;

            match page.next_cursor() {
                Some(next) => cursor = Some(next.to_string()),
                None => break,
            }
        }

        debug!(
            pages = pages,
            scanned = scanned,
            matched = intents.len(),
            "scan has been completed."
        );

        Ok(intents)
    }
}
