/*!
# Overview
bskyrm-rs deletes every Bluesky post of an account that links to a given
domain, without tripping the PDS write quota.

## Features
- **Whole-history scan**: walks every post, oldest first, and matches
  rich-text link facets, external link cards and legacy link entities
- **Quota aware**: a client-side hourly budget keeps batch deletes under
  the server quota; rate-limited batches are retried after the
  advertised reset time
- **Safety First**: dry-run mode, confirmation prompt, force flag,
  Ctrl+C cancellation with a structured partial report
- **Library-First**: the bskyrm CLI is a thin wrapper over this crate

## As a Library

```toml
[dependencies]
bskyrm-rs = "0.1"
tokio = { version = "1", features = ["full"] }
```

```no_run
use bskyrm_rs::config::Config;
use bskyrm_rs::config::args::parse_from_args;
use bskyrm_rs::{DeletionPipeline, create_pipeline_cancellation_token};

#[tokio::main]
async fn main() {
    let args = vec![
        "bskyrm",
        "example.com",
        "--identifier",
        "alice.bsky.social",
        "--app-password",
        "xxxx-xxxx-xxxx-xxxx",
        "--dry-run",
    ];

    let parsed_args = parse_from_args(args).unwrap();
    let config = Config::try_from(parsed_args).unwrap();
    let cancellation_token = create_pipeline_cancellation_token();
    let mut pipeline = DeletionPipeline::new(config, cancellation_token)
        .await
        .unwrap();
    pipeline.close_stats_sender();
    pipeline.run().await;

    if pipeline.has_error() {
        eprintln!("{:?}", pipeline.get_errors_and_consume().unwrap()[0]);
    }
    if let Some(report) = pipeline.get_report() {
        println!("{} post(s) would be deleted", report.intended);
    }
}
```
*/

#![allow(clippy::collapsible_if)]

pub mod clock;
pub mod config;
pub mod deleter;
pub mod matcher;
pub mod partitioner;
pub mod pipeline;
pub mod quota;
pub mod safety;
pub mod scanner;
pub mod storage;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use clock::{Clock, SystemClock};
pub use config::Config;
pub use config::args::{CLIArgs, build_config_from_args, parse_from_args};
pub use deleter::BatchDeleter;
pub use matcher::{MatchEvidence, find_evidence, matches};
pub use partitioner::partition;
pub use pipeline::DeletionPipeline;
pub use quota::{QUOTA_WINDOW, QuotaGovernor, QuotaWindow};
pub use safety::{PromptHandler, SafetyChecker};
pub use scanner::{ContentScanner, MATCH_DIAGNOSTICS_TARGET};
pub use storage::{RecordPage, RepoStorage, Storage};
pub use types::error::{BskyrmError, XrpcError, exit_code_from_error, is_cancelled_error};
pub use types::token::{PipelineCancellationToken, create_pipeline_cancellation_token};
pub use types::{
    ContentItem, DeleteIntent, DeletionStatistics, DeletionStats, DeletionStatsReport,
    DispatchOutcome, PipelineReport, PipelineStatus, UnitReport, WorkUnit,
};
