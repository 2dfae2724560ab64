//! Shared integration test infrastructure for bskyrm-rs.
//!
//! `ScriptedStorage` drives the pipeline through the public `RepoStorage`
//! trait. `MockPds` is an axum server speaking just enough XRPC
//! (createSession, refreshSession, listRecords, applyWrites) to exercise
//! the real client.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bskyrm_rs::{
    Clock, Config, ContentItem, DeleteIntent, DeletionPipeline, DeletionStatistics, RecordPage,
    RepoStorage, XrpcError, create_pipeline_cancellation_token,
};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::Instant;

pub const DID: &str = "did:plc:integration";
pub const POST_COLLECTION: &str = "app.bsky.feed.post";
pub const START_UNIX_MILLIS: i64 = 1_700_000_000_000;
pub const ACCESS_JWT: &str = "access-jwt";
pub const REFRESH_JWT: &str = "refresh-jwt";
pub const REFRESHED_ACCESS_JWT: &str = "access-jwt-2";
pub const REFRESHED_REFRESH_JWT: &str = "refresh-jwt-2";

pub fn init_dummy_tracing_subscriber() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("dummy=trace")
        .try_init();
}

pub fn post_uri(rkey: &str) -> String {
    format!("at://{DID}/{POST_COLLECTION}/{rkey}")
}

pub fn facet_post(rkey: &str, link: &str) -> ContentItem {
    ContentItem::new(
        post_uri(rkey),
        json!({
            "text": "read this",
            "facets": [{
                "index": {"byteStart": 0, "byteEnd": 4},
                "features": [{"$type": "app.bsky.richtext.facet#link", "uri": link}]
            }]
        }),
    )
}

pub fn embed_post(rkey: &str, link: &str) -> ContentItem {
    ContentItem::new(
        post_uri(rkey),
        json!({
            "text": "",
            "embed": {"$type": "app.bsky.embed.external", "external": {"uri": link, "title": "t"}}
        }),
    )
}

pub fn legacy_post(rkey: &str, link: &str) -> ContentItem {
    ContentItem::new(
        post_uri(rkey),
        json!({"text": link, "entities": [{"type": "link", "value": link}]}),
    )
}

pub fn plain_post(rkey: &str) -> ContentItem {
    ContentItem::new(post_uri(rkey), json!({"text": "just words"}))
}

/// Tokio's monotonic clock plus a wall clock starting at
/// [`START_UNIX_MILLIS`] that advances with it.
#[derive(Debug)]
pub struct FixedStartClock {
    start: Instant,
}

impl FixedStartClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Clock for FixedStartClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_time_millis(&self) -> i64 {
        START_UNIX_MILLIS + Instant::now().duration_since(self.start).as_millis() as i64
    }
}

#[derive(Debug, Clone)]
pub struct WriteCall {
    pub record_ids: Vec<String>,
    pub at: Instant,
}

/// Repository that replays scripted pages and write results.
#[derive(Clone)]
pub struct ScriptedStorage {
    stats_sender: Sender<DeletionStatistics>,
    has_warning: Arc<AtomicBool>,
    pages: Arc<Mutex<VecDeque<Result<RecordPage, XrpcError>>>>,
    write_results: Arc<Mutex<VecDeque<Result<(), XrpcError>>>>,
    pub cursors_seen: Arc<Mutex<Vec<Option<String>>>>,
    pub writes: Arc<Mutex<Vec<WriteCall>>>,
}

impl ScriptedStorage {
    pub fn new(stats_sender: Sender<DeletionStatistics>) -> Self {
        Self {
            stats_sender,
            has_warning: Arc::new(AtomicBool::new(false)),
            pages: Arc::new(Mutex::new(VecDeque::new())),
            write_results: Arc::new(Mutex::new(VecDeque::new())),
            cursors_seen: Arc::new(Mutex::new(Vec::new())),
            writes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn page(self, records: Vec<ContentItem>, cursor: Option<&str>) -> Self {
        self.pages.lock().unwrap().push_back(Ok(RecordPage {
            records,
            cursor: cursor.map(str::to_string),
        }));
        self
    }

    pub fn page_error(self, error: XrpcError) -> Self {
        self.pages.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn write_result(self, result: Result<(), XrpcError>) -> Self {
        self.write_results.lock().unwrap().push_back(result);
        self
    }

    pub fn write_calls(&self) -> Vec<WriteCall> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl RepoStorage for ScriptedStorage {
    fn account_id(&self) -> &str {
        DID
    }

    async fn list_records(
        &self,
        _collection: &str,
        _page_size: u16,
        cursor: Option<&str>,
        _reverse: bool,
    ) -> Result<RecordPage> {
        self.cursors_seen
            .lock()
            .unwrap()
            .push(cursor.map(str::to_string));

        let next = self.pages.lock().unwrap().pop_front();
        match next {
            Some(Ok(page)) => Ok(page),
            Some(Err(e)) => Err(anyhow::anyhow!(e)),
            None => Ok(RecordPage::default()),
        }
    }

    async fn apply_deletes(&self, intents: &[DeleteIntent]) -> Result<()> {
        self.writes.lock().unwrap().push(WriteCall {
            record_ids: intents.iter().map(|i| i.record_id.clone()).collect(),
            at: Instant::now(),
        });

        let next = self.write_results.lock().unwrap().pop_front();
        match next {
            Some(Err(e)) => Err(anyhow::anyhow!(e)),
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

pub fn rate_limited(reset_epoch_seconds: Option<i64>) -> XrpcError {
    let mut e = XrpcError::new(429);
    e.error = Some("RateLimitExceeded".to_string());
    e.ratelimit_reset = reset_epoch_seconds;
    e
}

pub fn upstream_failure(status: u16) -> XrpcError {
    let mut e = XrpcError::new(status);
    e.error = Some("UpstreamFailure".to_string());
    e
}

/// Library config for `example.com` with no inter-batch delay.
pub fn test_config() -> Config {
    let mut config = Config::for_target_domain("example.com");
    config.inter_batch_delay_milliseconds = 0;
    config
}

/// Build a pipeline over `storage`, which must have been created with the
/// sender half of `stats`.
pub fn scripted_pipeline(
    config: Config,
    storage: &ScriptedStorage,
    stats_receiver: Receiver<DeletionStatistics>,
) -> DeletionPipeline {
    DeletionPipeline::with_storage(
        config,
        Box::new(storage.clone()),
        stats_receiver,
        Arc::new(FixedStartClock::new()),
        create_pipeline_cancellation_token(),
    )
}

// ---------------------------------------------------------------------------
// MockPds
// ---------------------------------------------------------------------------

/// One HTTP request as seen by [`MockPds`].
#[derive(Debug, Clone)]
pub struct ReceivedRequest {
    pub method: String,
    pub target: String,
    pub authorization: Option<String>,
    pub body: String,
}

impl ReceivedRequest {
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or("")
    }

    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }

    pub fn bearer(&self) -> Option<&str> {
        self.authorization.as_deref()?.strip_prefix("Bearer ")
    }
}

/// A canned response: status, extra headers, JSON body.
#[derive(Debug, Clone)]
pub struct CannedResponse {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl CannedResponse {
    pub fn ok(body: Value) -> Self {
        Self {
            status: StatusCode::OK,
            headers: vec![],
            body: body.to_string(),
        }
    }

    pub fn error(status: StatusCode, error: &str, message: &str) -> Self {
        Self {
            status,
            headers: vec![],
            body: json!({"error": error, "message": message}).to_string(),
        }
    }

    pub fn expired_token() -> Self {
        Self::error(StatusCode::BAD_REQUEST, "ExpiredToken", "Token has expired")
    }
}

impl IntoResponse for CannedResponse {
    fn into_response(self) -> Response {
        let mut response = (
            self.status,
            [(header::CONTENT_TYPE, "application/json")],
            self.body,
        )
            .into_response();
        for (name, value) in self.headers {
            response.headers_mut().insert(
                HeaderName::try_from(name).unwrap(),
                HeaderValue::try_from(value).unwrap(),
            );
        }
        response
    }
}

fn session_body(access_jwt: &str, refresh_jwt: &str) -> Value {
    json!({
        "accessJwt": access_jwt,
        "refreshJwt": refresh_jwt,
        "did": DID,
        "handle": "alice.test"
    })
}

/// Scripted XRPC server. Each endpoint replays its queue in order; an
/// exhausted queue answers with an empty page or an empty success.
///
/// With [`MockPds::expire_token_after_writes`], applyWrites rejects the
/// original access token with `ExpiredToken` once that many writes were
/// accepted, and refreshSession hands out [`REFRESHED_ACCESS_JWT`].
#[derive(Clone, Default)]
pub struct MockPds {
    session: Arc<Mutex<VecDeque<CannedResponse>>>,
    refresh: Arc<Mutex<VecDeque<CannedResponse>>>,
    list_records: Arc<Mutex<VecDeque<CannedResponse>>>,
    apply_writes: Arc<Mutex<VecDeque<CannedResponse>>>,
    expire_after_writes: Arc<Mutex<Option<usize>>>,
    accepted_writes: Arc<Mutex<usize>>,
    pub requests: Arc<Mutex<Vec<ReceivedRequest>>>,
}

impl MockPds {
    pub fn new() -> Self {
        let pds = Self::default();
        pds.session
            .lock()
            .unwrap()
            .push_back(CannedResponse::ok(session_body(ACCESS_JWT, REFRESH_JWT)));
        pds
    }

    pub fn fail_login(self) -> Self {
        let mut session = self.session.lock().unwrap();
        session.clear();
        session.push_back(CannedResponse::error(
            StatusCode::UNAUTHORIZED,
            "AuthenticationRequired",
            "Invalid identifier or password",
        ));
        drop(session);
        self
    }

    pub fn fail_refresh(self) -> Self {
        self.refresh.lock().unwrap().push_back(CannedResponse::error(
            StatusCode::BAD_REQUEST,
            "ExpiredToken",
            "Refresh token has expired",
        ));
        self
    }

    pub fn expire_token_after_writes(self, writes: usize) -> Self {
        *self.expire_after_writes.lock().unwrap() = Some(writes);
        self
    }

    pub fn page(self, records: &[ContentItem], cursor: Option<&str>) -> Self {
        let mut body = json!({ "records": records });
        if let Some(cursor) = cursor {
            body["cursor"] = json!(cursor);
        }
        self.list_records
            .lock()
            .unwrap()
            .push_back(CannedResponse::ok(body));
        self
    }

    pub fn page_response(self, response: CannedResponse) -> Self {
        self.list_records.lock().unwrap().push_back(response);
        self
    }

    pub fn write_response(self, response: CannedResponse) -> Self {
        self.apply_writes.lock().unwrap().push_back(response);
        self
    }

    pub fn requests_to(&self, method: &str) -> Vec<ReceivedRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path().ends_with(method))
            .cloned()
            .collect()
    }

    /// Start serving on an ephemeral port and return the service URL.
    pub async fn start(&self) -> String {
        let router = Router::new()
            .route("/xrpc/com.atproto.server.createSession", post(create_session))
            .route("/xrpc/com.atproto.server.refreshSession", post(refresh_session))
            .route("/xrpc/com.atproto.repo.listRecords", get(list_records))
            .route("/xrpc/com.atproto.repo.applyWrites", post(apply_writes))
            .fallback(|uri: Uri| async move {
                CannedResponse::error(StatusCode::NOT_FOUND, "MethodNotImplemented", uri.path())
            })
            .with_state(self.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        format!("http://{address}")
    }

    fn record(&self, method: &str, uri: &Uri, headers: &HeaderMap, body: String) {
        let request = ReceivedRequest {
            method: method.to_string(),
            target: uri
                .path_and_query()
                .map(|target| target.as_str().to_string())
                .unwrap_or_default(),
            authorization: headers
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string),
            body,
        };
        self.requests.lock().unwrap().push(request);
    }

    fn is_token_expired(&self, headers: &HeaderMap) -> bool {
        let Some(expire_after) = *self.expire_after_writes.lock().unwrap() else {
            return false;
        };
        let authorization = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        *self.accepted_writes.lock().unwrap() >= expire_after
            && authorization == Some(format!("Bearer {ACCESS_JWT}").as_str())
    }
}

fn pop_or(queue: &Mutex<VecDeque<CannedResponse>>, fallback: Value) -> CannedResponse {
    queue
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| CannedResponse::ok(fallback))
}

async fn create_session(
    State(pds): State<MockPds>,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> CannedResponse {
    pds.record("POST", &uri, &headers, body);
    pop_or(&pds.session, session_body(ACCESS_JWT, REFRESH_JWT))
}

async fn refresh_session(
    State(pds): State<MockPds>,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> CannedResponse {
    pds.record("POST", &uri, &headers, body);
    pop_or(&pds.refresh, session_body(REFRESHED_ACCESS_JWT, REFRESHED_REFRESH_JWT))
}

async fn list_records(State(pds): State<MockPds>, uri: Uri, headers: HeaderMap) -> CannedResponse {
    pds.record("GET", &uri, &headers, String::new());
    pop_or(&pds.list_records, json!({ "records": [] }))
}

async fn apply_writes(
    State(pds): State<MockPds>,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> CannedResponse {
    pds.record("POST", &uri, &headers, body);
    if pds.is_token_expired(&headers) {
        return CannedResponse::expired_token();
    }

    let response = pop_or(&pds.apply_writes, json!({}));
    if response.status.is_success() {
        *pds.accepted_writes.lock().unwrap() += 1;
    }
    response
}
