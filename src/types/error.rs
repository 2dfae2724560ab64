use anyhow::Error;
use thiserror::Error;

/// Application-level error types for bskyrm-rs.
///
/// ## Exit Codes
///
/// Each variant maps to an exit code (via `exit_code()`):
/// - 0: Non-error conditions (Cancelled)
/// - 1: General errors (ScanFailure, WriteFailure, Authentication)
/// - 2: Configuration errors (InvalidConfig)
/// - 3: Partial completion (some posts deleted before the run halted)
#[derive(Error, Debug, PartialEq)]
pub enum BskyrmError {
    /// A page fetch failed. Fatal: raised before any deletion happens.
    #[error("Scan failed: {0}")]
    ScanFailure(String),

    /// A batch write failed with a non rate-limit error.
    #[error("Batch write failed: {0}")]
    WriteFailure(String),

    /// Configuration error (non-retryable).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Session creation or refresh failed.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Operation cancelled by user.
    #[error("Operation cancelled by user")]
    Cancelled,

    /// Run halted after some posts were already deleted.
    #[error("Partial completion: {deleted} deleted, {abandoned} abandoned")]
    PartialCompletion { deleted: u64, abandoned: u64 },
}

impl BskyrmError {
    /// Get the appropriate process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            BskyrmError::Cancelled => 0,
            BskyrmError::InvalidConfig(_) => 2,
            BskyrmError::PartialCompletion { .. } => 3,
            _ => 1,
        }
    }
}

/// Non-success response from an XRPC endpoint.
///
/// `ratelimit_reset` carries the `ratelimit-reset` header (epoch seconds)
/// when the server supplied one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "XRPC request failed with status {status}: {} ({})",
    .error.as_deref().unwrap_or("unknown"),
    .message.as_deref().unwrap_or("no message")
)]
pub struct XrpcError {
    pub status: u16,
    pub error: Option<String>,
    pub message: Option<String>,
    pub ratelimit_reset: Option<i64>,
}

pub const HTTP_STATUS_TOO_MANY_REQUESTS: u16 = 429;
pub const XRPC_ERROR_EXPIRED_TOKEN: &str = "ExpiredToken";

impl XrpcError {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            error: None,
            message: None,
            ratelimit_reset: None,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status == HTTP_STATUS_TOO_MANY_REQUESTS
    }

    /// The access token was rejected as expired; a session refresh may fix it.
    pub fn is_expired_token(&self) -> bool {
        self.error.as_deref() == Some(XRPC_ERROR_EXPIRED_TOKEN)
    }
}

/// Find an [`XrpcError`] anywhere in an anyhow error chain.
pub fn as_xrpc_error(e: &Error) -> Option<&XrpcError> {
    e.chain().find_map(|cause| cause.downcast_ref::<XrpcError>())
}

/// Check if an anyhow::Error wraps a cancellation error.
pub fn is_cancelled_error(e: &Error) -> bool {
    if let Some(err) = e.downcast_ref::<BskyrmError>() {
        return *err == BskyrmError::Cancelled;
    }
    false
}

/// Extract the exit code from an anyhow::Error, defaulting to 1.
pub fn exit_code_from_error(e: &Error) -> i32 {
    if let Some(err) = e.downcast_ref::<BskyrmError>() {
        return err.exit_code();
    }
    1
}
