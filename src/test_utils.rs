//! Shared test utilities for the bskyrm library crate.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_channel::Sender;
use async_trait::async_trait;
use serde_json::json;
use tokio::time::Instant;

use crate::clock::Clock;
use crate::config::Config;
use crate::storage::{RecordPage, RepoStorage};
use crate::types::error::XrpcError;
use crate::types::{ContentItem, DeleteIntent, DeletionStatistics, POST_COLLECTION};

pub(crate) const TEST_DID: &str = "did:plc:testaccount";
pub(crate) const TEST_DOMAIN: &str = "example.com";

/// Initialise a dummy tracing subscriber for tests.
///
/// Uses `try_init` so that only the first call in a process actually
/// installs the subscriber; subsequent calls are silently ignored.
pub(crate) fn init_dummy_tracing_subscriber() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("dummy=trace")
        .try_init();
}

/// Library defaults for `example.com` with no inter-batch delay.
pub(crate) fn make_test_config() -> Config {
    let mut config = Config::for_target_domain(TEST_DOMAIN);
    config.inter_batch_delay_milliseconds = 0;
    config
}

pub(crate) fn post_uri(rkey: &str) -> String {
    format!("at://{TEST_DID}/{POST_COLLECTION}/{rkey}")
}

/// A post whose only link is a rich-text facet pointing at `link`.
pub(crate) fn make_post(rkey: &str, link: &str) -> ContentItem {
    ContentItem::new(
        post_uri(rkey),
        json!({
            "$type": "app.bsky.feed.post",
            "text": format!("check {link}"),
            "facets": [{
                "index": {"byteStart": 6, "byteEnd": 6 + link.len()},
                "features": [{"$type": "app.bsky.richtext.facet#link", "uri": link}]
            }],
            "createdAt": "2024-03-01T12:00:00.000Z"
        }),
    )
}

pub(crate) fn make_plain_post(rkey: &str) -> ContentItem {
    ContentItem::new(
        post_uri(rkey),
        json!({"$type": "app.bsky.feed.post", "text": "no links here"}),
    )
}

pub(crate) fn make_intents(count: usize) -> Vec<DeleteIntent> {
    (0..count)
        .map(|i| DeleteIntent {
            record_id: format!("rkey{i:05}"),
            collection: POST_COLLECTION.to_string(),
        })
        .collect()
}

/// Monotonic time from tokio (so it follows a paused runtime) and a wall
/// clock that starts at `start_unix_millis` and advances in lockstep.
#[derive(Debug)]
pub(crate) struct TestClock {
    start: Instant,
    start_unix_millis: i64,
}

impl TestClock {
    pub(crate) fn new(start_unix_millis: i64) -> Self {
        Self {
            start: Instant::now(),
            start_unix_millis,
        }
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_time_millis(&self) -> i64 {
        self.start_unix_millis + Instant::now().duration_since(self.start).as_millis() as i64
    }
}

/// One `list_records` call as seen by [`MockStorage`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ListRecordsCall {
    pub collection: String,
    pub page_size: u16,
    pub cursor: Option<String>,
    pub reverse: bool,
}

/// One `apply_deletes` call as seen by [`MockStorage`].
#[derive(Debug, Clone)]
pub(crate) struct ApplyDeletesCall {
    pub intents: Vec<DeleteIntent>,
    pub at: Instant,
}

/// Scripted repository. Pages and write results are consumed in order;
/// once the write script is exhausted every write succeeds.
#[derive(Clone)]
pub(crate) struct MockStorage {
    stats_sender: Sender<DeletionStatistics>,
    has_warning: Arc<AtomicBool>,
    pages: Arc<Mutex<VecDeque<Result<RecordPage, XrpcError>>>>,
    write_results: Arc<Mutex<VecDeque<Result<(), XrpcError>>>>,
    pub(crate) list_calls: Arc<Mutex<Vec<ListRecordsCall>>>,
    pub(crate) apply_calls: Arc<Mutex<Vec<ApplyDeletesCall>>>,
}

impl MockStorage {
    pub(crate) fn new(stats_sender: Sender<DeletionStatistics>) -> Self {
        Self {
            stats_sender,
            has_warning: Arc::new(AtomicBool::new(false)),
            pages: Arc::new(Mutex::new(VecDeque::new())),
            write_results: Arc::new(Mutex::new(VecDeque::new())),
            list_calls: Arc::new(Mutex::new(Vec::new())),
            apply_calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn push_page(&self, records: Vec<ContentItem>, cursor: Option<&str>) {
        self.pages.lock().unwrap().push_back(Ok(RecordPage {
            records,
            cursor: cursor.map(str::to_string),
        }));
    }

    pub(crate) fn push_page_error(&self, error: XrpcError) {
        self.pages.lock().unwrap().push_back(Err(error));
    }

    pub(crate) fn push_write_result(&self, result: Result<(), XrpcError>) {
        self.write_results.lock().unwrap().push_back(result);
    }

    pub(crate) fn apply_call_count(&self) -> usize {
        self.apply_calls.lock().unwrap().len()
    }

    pub(crate) fn has_warning(&self) -> bool {
        self.has_warning.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RepoStorage for MockStorage {
    fn account_id(&self) -> &str {
        TEST_DID
    }

    async fn list_records(
        &self,
        collection: &str,
        page_size: u16,
        cursor: Option<&str>,
        reverse: bool,
    ) -> Result<RecordPage> {
        self.list_calls.lock().unwrap().push(ListRecordsCall {
            collection: collection.to_string(),
            page_size,
            cursor: cursor.map(str::to_string),
            reverse,
        });

        let next = self.pages.lock().unwrap().pop_front();
        match next {
            Some(Ok(page)) => Ok(page),
            Some(Err(e)) => Err(anyhow::anyhow!(e).context("listRecords failed.")),
            None => Ok(RecordPage::default()),
        }
    }

    async fn apply_deletes(&self, intents: &[DeleteIntent]) -> Result<()> {
        self.apply_calls.lock().unwrap().push(ApplyDeletesCall {
            intents: intents.to_vec(),
            at: Instant::now(),
        });

        let next = self.write_results.lock().unwrap().pop_front();
        match next {
            Some(Err(e)) => Err(anyhow::anyhow!(e).context("applyWrites failed.")),
            _ => Ok(()),
        }
    }

    fn get_stats_sender(&self) -> Sender<DeletionStatistics> {
        self.stats_sender.clone()
    }

    async fn send_stats(&self, stats: DeletionStatistics) {
        let _ = self.stats_sender.send(stats).await;
    }

    fn set_warning(&self) {
        self.has_warning.store(true, Ordering::SeqCst);
    }
}

/// A 429 response carrying `ratelimit-reset` (epoch seconds) when given.
pub(crate) fn rate_limited(reset_epoch_seconds: Option<i64>) -> XrpcError {
    XrpcError {
        status: 429,
        error: Some("RateLimitExceeded".to_string()),
        message: Some("Rate Limit Exceeded".to_string()),
        ratelimit_reset: reset_epoch_seconds,
    }
}

pub(crate) fn server_error(status: u16) -> XrpcError {
    XrpcError {
        status,
        error: Some("InternalServerError".to_string()),
        message: Some("Internal Server Error".to_string()),
        ratelimit_reset: None,
    }
}
