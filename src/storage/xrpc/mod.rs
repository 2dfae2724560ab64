use anyhow::{Context, Result};
use async_channel::Sender;
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use zeroize::Zeroizing;
use zeroize_derive::{Zeroize, ZeroizeOnDrop};

use crate::config::ClientConfig;
use crate::storage::{CallLimiter, RecordPage, RepoStorage, Storage, StorageFactory};
use crate::types::error::{BskyrmError, XrpcError};
use crate::types::{DeleteIntent, DeletionStatistics};

const CREATE_SESSION: &str = "com.atproto.server.createSession";
const REFRESH_SESSION: &str = "com.atproto.server.refreshSession";
const LIST_RECORDS: &str = "com.atproto.repo.listRecords";
const APPLY_WRITES: &str = "com.atproto.repo.applyWrites";
const APPLY_WRITES_DELETE_TYPE: &str = "com.atproto.repo.applyWrites#delete";
const RATELIMIT_RESET_HEADER: &str = "ratelimit-reset";

/// Factory for XRPC-backed repository storage.
pub struct XrpcStorageFactory;

#[async_trait]
impl StorageFactory for XrpcStorageFactory {
    async fn create(
        client_config: ClientConfig,
        call_limiter: CallLimiter,
        stats_sender: Sender<DeletionStatistics>,
        has_warning: Arc<AtomicBool>,
    ) -> Result<Storage> {
        let service_url = client_config.service_url.trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .user_agent(concat!("bskyrm/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client.")?;

        let session = create_session(&http, &service_url, &call_limiter, &client_config).await?;

        tracing::info!(did = session.did, handle = session.handle, "session created.");

        Ok(Box::new(XrpcStorage {
            service_url,
            http,
            did: session.did.clone(),
            session: Arc::new(RwLock::new(session)),
            call_limiter,
            stats_sender,
            has_warning,
        }))
    }
}

#[derive(Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
struct Session {
    access_jwt: String,
    refresh_jwt: String,
    did: String,
    #[serde(default)]
    handle: String,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("did", &self.did)
            .field("handle", &self.handle)
            .field("access_jwt", &"** redacted **")
            .field("refresh_jwt", &"** redacted **")
            .finish()
    }
}

#[derive(Serialize)]
struct CreateSessionInput<'a> {
    identifier: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct ApplyWritesInput<'a> {
    repo: &'a str,
    writes: Vec<DeleteWrite<'a>>,
}

#[derive(Debug, PartialEq, Serialize)]
struct DeleteWrite<'a> {
    #[serde(rename = "$type")]
    write_type: &'static str,
    collection: &'a str,
    rkey: &'a str,
}

#[derive(Default, Deserialize)]
struct XrpcErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Repository storage over AT Protocol XRPC.
///
/// Clones share one session, so a refresh made by any clone is seen by all.
#[derive(Clone)]
struct XrpcStorage {
    service_url: String,
    http: reqwest::Client,
    did: String,
    session: Arc<RwLock<Session>>,
    call_limiter: CallLimiter,
    stats_sender: Sender<DeletionStatistics>,
    has_warning: Arc<AtomicBool>,
}

#[async_trait]
impl RepoStorage for XrpcStorage {
    fn account_id(&self) -> &str {
        &self.did
    }

    async fn list_records(
        &self,
        collection: &str,
        page_size: u16,
        cursor: Option<&str>,
        reverse: bool,
    ) -> Result<RecordPage> {
        let mut query: Vec<(&str, String)> = vec![
            ("repo", self.did.clone()),
            ("collection", collection.to_string()),
            ("limit", page_size.to_string()),
            ("reverse", reverse.to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }

        let response = self
            .send_authorized(LIST_RECORDS, |url| self.http.get(url).query(&query))
            .await?
            .map_err(|e| {
                tracing::error!(
                    status = e.status,
                    error = e.error,
                    message = e.message,
                    "XRPC listRecords failed."
                );
                anyhow::anyhow!(e).context("com.atproto.repo.listRecords failed.")
            })?;

        let page: RecordPage = response
            .json()
            .await
            .context("failed to decode listRecords output.")?;

        tracing::trace!(
            records = page.records.len(),
            cursor = page.cursor,
            "listRecords page received."
        );

        Ok(page)
    }

    async fn apply_deletes(&self, intents: &[DeleteIntent]) -> Result<()> {
        let input = ApplyWritesInput {
            repo: &self.did,
            writes: delete_writes(intents),
        };

        self.send_authorized(APPLY_WRITES, |url| self.http.post(url).json(&input))
            .await?
            .map_err(|e| {
                if !e.is_rate_limited() {
                    tracing::error!(
                        status = e.status,
                        error = e.error,
                        message = e.message,
                        writes = intents.len(),
                        "XRPC applyWrites failed."
                    );
                }
                anyhow::anyhow!(e).context("com.atproto.repo.applyWrites failed.")
            })?;

        Ok(())
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

impl XrpcStorage {
    /// Send an authorized call and classify the response.
    ///
    /// An `ExpiredToken` rejection refreshes the session and the call is
    /// sent once more. The outer error is a transport or refresh failure,
    /// the inner one the server's answer.
    async fn send_authorized<F>(
        &self,
        method: &str,
        build: F,
    ) -> Result<Result<reqwest::Response, XrpcError>>
    where
        F: Fn(String) -> reqwest::RequestBuilder + Send + Sync,
    {
        let access_jwt = Zeroizing::new(self.session.read().await.access_jwt.clone());
        let response = self.send(method, &build, &access_jwt).await?;

        match check_response(response).await {
            Err(e) if e.is_expired_token() => {
                tracing::info!(method = method, "access token expired. refreshing session.");
                let access_jwt = self.refresh_session(&access_jwt).await?;
                let response = self.send(method, &build, &access_jwt).await?;
                Ok(check_response(response).await)
            }
            checked => Ok(checked),
        }
    }

    async fn send<F>(
        &self,
        method: &str,
        build: &F,
        access_jwt: &str,
    ) -> Result<reqwest::Response>
    where
        F: Fn(String) -> reqwest::RequestBuilder + Send + Sync,
    {
        let _permit = self.call_limiter.acquire().await?;
        build(xrpc_url(&self.service_url, method))
            .bearer_auth(access_jwt)
            .send()
            .await
            .with_context(|| format!("{method} request failed."))
    }

    /// Exchange the refresh token for a new session and return its access
    /// token. When another clone already refreshed past `stale_access_jwt`,
    /// its token is returned without a second refresh.
    async fn refresh_session(&self, stale_access_jwt: &str) -> Result<Zeroizing<String>> {
        let mut session = self.session.write().await;
        if session.access_jwt != stale_access_jwt {
            return Ok(Zeroizing::new(session.access_jwt.clone()));
        }

        let _permit = self.call_limiter.acquire().await?;
        let response = self
            .http
            .post(xrpc_url(&self.service_url, REFRESH_SESSION))
            .bearer_auth(&session.refresh_jwt)
            .send()
            .await
            .context("refreshSession request failed.")?;
        let response = check_response(response)
            .await
            .map_err(|e| anyhow::anyhow!(BskyrmError::Authentication(e.to_string())))?;

        *session = response
            .json::<Session>()
            .await
            .context("failed to decode refreshSession output.")?;

        tracing::info!(did = %session.did, "session refreshed.");
        Ok(Zeroizing::new(session.access_jwt.clone()))
    }
}

async fn create_session(
    http: &reqwest::Client,
    service_url: &str,
    call_limiter: &CallLimiter,
    client_config: &ClientConfig,
) -> Result<Session> {
    let input = CreateSessionInput {
        identifier: &client_config.credentials.identifier,
        password: &client_config.credentials.app_password,
    };

    let _permit = call_limiter.acquire().await?;
    let response = http
        .post(xrpc_url(service_url, CREATE_SESSION))
        .json(&input)
        .send()
        .await
        .context("createSession request failed.")?;
    let response = check_response(response)
        .await
        .map_err(|e| anyhow::anyhow!(BskyrmError::Authentication(e.to_string())))?;

    response
        .json::<Session>()
        .await
        .context("failed to decode createSession output.")
}

fn xrpc_url(service_url: &str, method: &str) -> String {
    format!("{service_url}/xrpc/{method}")
}

fn delete_writes(intents: &[DeleteIntent]) -> Vec<DeleteWrite<'_>> {
    intents
        .iter()
        .map(|intent| DeleteWrite {
            write_type: APPLY_WRITES_DELETE_TYPE,
            collection: &intent.collection,
            rkey: &intent.record_id,
        })
        .collect()
}

/// `ratelimit-reset` header as epoch seconds, if present and numeric.
fn parse_ratelimit_reset(headers: &HeaderMap) -> Option<i64> {
    headers
        .get(RATELIMIT_RESET_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<i64>().ok())
}

async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, XrpcError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status().as_u16();
    let ratelimit_reset = parse_ratelimit_reset(response.headers());
    let text = response.text().await.unwrap_or_default();
    let (error, message) = match serde_json::from_str::<XrpcErrorBody>(&text) {
        Ok(body) => (body.error, body.message),
        Err(_) if text.is_empty() => (None, None),
        Err(_) => (None, Some(text)),
    };

    Err(XrpcError {
        status,
        error,
        message,
        ratelimit_reset,
    })
}
