use std::fmt;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use zeroize_derive::{Zeroize, ZeroizeOnDrop};

pub mod error;
pub mod token;

/// Collection that holds the account's posts.
pub const POST_COLLECTION: &str = "app.bsky.feed.post";

const AT_URI_SCHEME: &str = "at://";
const LINK_FACET_FEATURE_TYPE: &str = "app.bsky.richtext.facet#link";
const LEGACY_LINK_ENTITY_TYPE: &str = "link";

/// One record fetched from the account's repository.
///
/// `value` is kept as raw JSON: historical posts use several encodings
/// for links (rich-text facets, external embeds, legacy entities) and a
/// record that lacks or malforms any of them must still be classifiable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub uri: String,
    #[serde(default)]
    pub cid: Option<String>,
    #[serde(default)]
    pub value: Value,
}

impl ContentItem {
    pub fn new(uri: impl Into<String>, value: Value) -> Self {
        Self {
            uri: uri.into(),
            cid: None,
            value,
        }
    }

    /// URIs of every rich-text facet feature of the link kind.
    pub fn link_facet_uris(&self) -> impl Iterator<Item = &str> {
        self.value
            .get("facets")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|facet| facet.get("features").and_then(Value::as_array))
            .flatten()
            .filter(|feature| {
                feature.get("$type").and_then(Value::as_str) == Some(LINK_FACET_FEATURE_TYPE)
            })
            .filter_map(|feature| feature.get("uri").and_then(Value::as_str))
    }

    /// URI of the attached external link card, if any.
    pub fn external_embed_uri(&self) -> Option<&str> {
        self.value
            .get("embed")
            .and_then(|embed| embed.get("external"))
            .and_then(|external| external.get("uri"))
            .and_then(Value::as_str)
    }

    /// Values of legacy `entities` entries whose type is `link`.
    pub fn legacy_link_values(&self) -> impl Iterator<Item = &str> {
        self.value
            .get("entities")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter(|entity| {
                entity.get("type").and_then(Value::as_str) == Some(LEGACY_LINK_ENTITY_TYPE)
            })
            .filter_map(|entity| entity.get("value").and_then(Value::as_str))
    }
}

/// A resolved instruction to delete one record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeleteIntent {
    pub record_id: String,
    pub collection: String,
}

impl DeleteIntent {
    /// Build an intent from a record URI (`at://<authority>/<collection>/<rkey>`).
    ///
    /// Both the collection and the record key come from the URI. Returns
    /// `None` unless the URI has exactly those three non-empty segments.
    pub fn from_uri(uri: &str) -> Option<Self> {
        let path = uri.strip_prefix(AT_URI_SCHEME)?;
        let mut segments = path.split('/');
        let (Some(authority), Some(collection), Some(record_id), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return None;
        };
        if authority.is_empty()
            || collection.is_empty()
            || record_id.is_empty()
            || record_id == "."
            || record_id == ".."
        {
            return None;
        }

        Some(Self {
            record_id: record_id.to_string(),
            collection: collection.to_string(),
        })
    }
}

/// An ordered group of intents submitted in one batch-write call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    pub index: usize,
    pub intents: Vec<DeleteIntent>,
}

impl WorkUnit {
    pub fn len(&self) -> usize {
        self.intents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }
}

/// Terminal state of one dispatched work unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Succeeded,
    Aborted(String),
}

impl DispatchOutcome {
    pub fn is_succeeded(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Per-unit line of a [`PipelineReport`]. `outcome` is `None` for units
/// that were never attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitReport {
    pub index: usize,
    pub size: usize,
    pub outcome: Option<DispatchOutcome>,
}

/// How a pipeline run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineStatus {
    /// The scan found no matching posts. No write calls were made.
    NothingToDo,
    /// Every unit succeeded.
    Completed,
    /// Dry-run mode: matches were found but nothing was deleted.
    DryRun,
    /// A unit was aborted; it and every later unit were abandoned.
    Aborted { reason: String },
    /// The run was cancelled (Ctrl+C or declined confirmation).
    Cancelled,
}

/// Structured result of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub status: PipelineStatus,
    pub intended: u64,
    pub deleted: u64,
    pub abandoned: u64,
    pub units: Vec<UnitReport>,
}

impl PipelineReport {
    pub fn nothing_to_do() -> Self {
        Self {
            status: PipelineStatus::NothingToDo,
            intended: 0,
            deleted: 0,
            abandoned: 0,
            units: vec![],
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self.status,
            PipelineStatus::NothingToDo | PipelineStatus::Completed | PipelineStatus::DryRun
        )
    }
}

/// Statistics sent through the stats channel during pipeline execution.
#[derive(Debug, Clone, PartialEq)]
pub enum DeletionStatistics {
    ScanPage { items: u64, matched: u64 },
    DeleteComplete { count: u64 },
    DeleteAbandoned { count: u64 },
    RateLimitWait { wait_milliseconds: u64 },
    QuotaWait { wait_milliseconds: u64 },
    SkipWarning { uri: String },
}

/// Snapshot of [`DeletionStatsReport`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeletionStats {
    pub scanned: u64,
    pub matched: u64,
    pub deleted: u64,
    pub abandoned: u64,
    pub rate_limit_waits: u64,
    pub quota_waits: u64,
}

/// Thread-safe counters for a pipeline run.
#[derive(Debug, Default)]
pub struct DeletionStatsReport {
    scanned: AtomicU64,
    matched: AtomicU64,
    deleted: AtomicU64,
    abandoned: AtomicU64,
    rate_limit_waits: AtomicU64,
    quota_waits: AtomicU64,
}

impl DeletionStatsReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_scanned(&self, count: u64) {
        self.scanned.fetch_add(count, Ordering::SeqCst);
    }

    pub fn add_matched(&self, count: u64) {
        self.matched.fetch_add(count, Ordering::SeqCst);
    }

    pub fn add_deleted(&self, count: u64) {
        self.deleted.fetch_add(count, Ordering::SeqCst);
    }

    pub fn add_abandoned(&self, count: u64) {
        self.abandoned.fetch_add(count, Ordering::SeqCst);
    }

    pub fn increment_rate_limit_waits(&self) {
        self.rate_limit_waits.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_quota_waits(&self) {
        self.quota_waits.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> DeletionStats {
        DeletionStats {
            scanned: self.scanned.load(Ordering::SeqCst),
            matched: self.matched.load(Ordering::SeqCst),
            deleted: self.deleted.load(Ordering::SeqCst),
            abandoned: self.abandoned.load(Ordering::SeqCst),
            rate_limit_waits: self.rate_limit_waits.load(Ordering::SeqCst),
            quota_waits: self.quota_waits.load(Ordering::SeqCst),
        }
    }
}

/// Account identifier and app password used to open a session.
///
/// The password is cleared from memory when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AppCredentials {
    pub identifier: String,
    pub app_password: String,
}

impl Debug for AppCredentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppCredentials")
            .field("identifier", &self.identifier)
            .field("app_password", &"** redacted **")
            .finish()
    }
}
