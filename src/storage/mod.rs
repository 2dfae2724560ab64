use anyhow::{Context, Result};
use async_channel::Sender;
use async_trait::async_trait;
use dyn_clone::DynClone;
use leaky_bucket::RateLimiter;
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::{CallLimitConfig, ClientConfig, Config};
use crate::types::error::BskyrmError;
use crate::types::{ContentItem, DeleteIntent, DeletionStatistics};

pub mod xrpc;

/// Type alias for a boxed repository storage trait object.
pub type Storage = Box<dyn RepoStorage + Send + Sync>;

/// Factory trait for creating Storage instances.
#[async_trait]
pub trait StorageFactory {
    async fn create(
        client_config: ClientConfig,
        call_limiter: CallLimiter,
        stats_sender: Sender<DeletionStatistics>,
        has_warning: Arc<AtomicBool>,
    ) -> Result<Storage>;
}

/// One page of records returned by a listing call.
///
/// An absent or empty `cursor` means the listing is exhausted.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RecordPage {
    #[serde(default)]
    pub records: Vec<ContentItem>,
    #[serde(default)]
    pub cursor: Option<String>,
}

impl RecordPage {
    pub fn next_cursor(&self) -> Option<&str> {
        self.cursor.as_deref().filter(|cursor| !cursor.is_empty())
    }
}

/// Operations the deletion pipeline needs from an account repository.
///
/// Errors from `list_records` and `apply_deletes` carry an
/// [`XrpcError`](crate::types::error::XrpcError) in their chain when the
/// server answered with a non-success status, so callers can classify
/// them with [`as_xrpc_error`](crate::types::error::as_xrpc_error).
#[async_trait]
pub trait RepoStorage: DynClone {
    /// The authenticated account (DID) whose repository is operated on.
    fn account_id(&self) -> &str;

    /// Fetch one page of `collection`. `reverse = true` lists oldest first.
    async fn list_records(
        &self,
        collection: &str,
        page_size: u16,
        cursor: Option<&str>,
        reverse: bool,
    ) -> Result<RecordPage>;

    /// Delete every intent in one atomic batch write.
    async fn apply_deletes(&self, intents: &[DeleteIntent]) -> Result<()>;

    fn get_stats_sender(&self) -> Sender<DeletionStatistics>;

    async fn send_stats(&self, stats: DeletionStatistics);

    fn set_warning(&self);
}

dyn_clone::clone_trait_object!(RepoStorage);

// Refill every 100ms.
const REFILL_PER_INTERVAL_DIVIDER: usize = 10;

/// Client-side courtesy limit shared by every remote call: a cap on calls
/// in flight plus a cap on calls started per second.
#[derive(Clone)]
pub struct CallLimiter {
    in_flight: Arc<Semaphore>,
    calls_per_sec: Arc<RateLimiter>,
}

impl CallLimiter {
    pub fn new(config: &CallLimitConfig) -> Self {
        let calls_per_second = config.calls_per_second.max(1) as usize;
        let refill = if calls_per_second <= REFILL_PER_INTERVAL_DIVIDER {
            1
        } else {
            calls_per_second / REFILL_PER_INTERVAL_DIVIDER
        };
        let interval_millis = if calls_per_second <= REFILL_PER_INTERVAL_DIVIDER {
            1000 / calls_per_second as u64
        } else {
            1000 / REFILL_PER_INTERVAL_DIVIDER as u64
        };

        CallLimiter {
            in_flight: Arc::new(Semaphore::new(config.max_concurrent_calls.max(1) as usize)),
            calls_per_sec: Arc::new(
                RateLimiter::builder()
                    .max(calls_per_second)
                    .initial(calls_per_second)
                    .refill(refill)
                    .interval(std::time::Duration::from_millis(interval_millis))
                    .fair(true)
                    .build(),
            ),
        }
    }

    /// Wait for a call slot. Hold the returned permit until the call returns.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        let permit = self
            .in_flight
            .clone()
            .acquire_owned()
            .await
            .context("call limiter semaphore closed.")?;
        self.calls_per_sec.acquire_one().await;

        Ok(permit)
    }

    pub fn available_calls(&self) -> usize {
        self.in_flight.available_permits()
    }
}

/// Log in and create the repository storage for the deletion pipeline.
pub async fn create_storage(
    config: &Config,
    stats_sender: Sender<DeletionStatistics>,
    has_warning: Arc<AtomicBool>,
) -> Result<Storage> {
    let client_config = config.client_config.clone().ok_or_else(|| {
        anyhow::anyhow!(BskyrmError::InvalidConfig(
            "identifier and app password are required.".to_string()
        ))
    })?;
    let call_limiter = CallLimiter::new(&config.call_limit_config);

    xrpc::XrpcStorageFactory::create(client_config, call_limiter, stats_sender, has_warning).await
}
