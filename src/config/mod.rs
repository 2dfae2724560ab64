pub mod args;

use crate::types::AppCredentials;
use crate::types::error::BskyrmError;

pub const DEFAULT_SERVICE_URL: &str = "https://bsky.social";
pub const DEFAULT_BATCH_SIZE: u16 = 200;
pub const DEFAULT_PAGE_SIZE: u16 = 100;
pub const MAX_PAGE_SIZE: u16 = 100;
pub const DEFAULT_MAX_DELETES_PER_HOUR: u64 = 5000;
pub const DEFAULT_SAFETY_MARGIN: u64 = 100;
pub const DEFAULT_INTER_BATCH_DELAY_MILLISECONDS: u64 = 5000;
pub const DEFAULT_RATE_LIMIT_WAIT_MILLISECONDS: u64 = 60_000;
pub const DEFAULT_MAX_CONCURRENT_CALLS: u16 = 3;
pub const DEFAULT_CALLS_PER_SECOND: u32 = 5;

pub(crate) const ERROR_MESSAGE_TARGET_DOMAIN_EMPTY: &str = "Target domain must not be empty.";
pub(crate) const ERROR_MESSAGE_BATCH_SIZE_ZERO: &str = "Batch size must be at least 1.";
pub(crate) const ERROR_MESSAGE_PAGE_SIZE_OUT_OF_RANGE: &str =
    "Page size must be between 1 and 100.";
pub(crate) const ERROR_MESSAGE_QUOTA_BUDGET_EMPTY: &str =
    "Safety margin must be smaller than max deletes per hour.";
pub(crate) const ERROR_MESSAGE_RATE_LIMIT_WAIT_ZERO: &str =
    "Rate limit default wait must be at least 1 millisecond.";
pub(crate) const ERROR_MESSAGE_MAX_CONCURRENT_CALLS_ZERO: &str =
    "Max concurrent calls must be at least 1.";
pub(crate) const ERROR_MESSAGE_CALLS_PER_SECOND_ZERO: &str =
    "Calls per second must be at least 1.";

/// Main configuration for the bskyrm-rs deletion pipeline.
///
/// # Quick Start
///
/// ```
/// use bskyrm_rs::Config;
///
/// let config = Config::for_target_domain("example.com");
/// assert_eq!(config.batch_size, 200);
/// assert_eq!(config.quota_config.max_deletes_per_hour, 5000);
/// assert!(config.verbose);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    pub target_domain: String,
    pub client_config: Option<ClientConfig>,
    pub call_limit_config: CallLimitConfig,
    pub page_size: u16,
    pub batch_size: u16,
    pub quota_config: QuotaConfig,
    pub rate_limit_retry_config: RateLimitRetryConfig,
    pub inter_batch_delay_milliseconds: u64,
    /// Log every match with the evidence that triggered it.
    /// Affects diagnostic output only.
    pub verbose: bool,
    pub tracing_config: Option<TracingConfig>,
    pub dry_run: bool,
    pub force: bool,
    pub show_no_progress: bool,
    pub auto_complete_shell: Option<clap_complete::shells::Shell>,
}

impl Config {
    /// Create a `Config` with library defaults for the given domain.
    ///
    /// `force` is set so that no interactive confirmation is attempted.
    /// `client_config` is left empty; set it before running against a
    /// real server.
    pub fn for_target_domain(target_domain: &str) -> Self {
        Config {
            target_domain: target_domain.to_string(),
            force: true,
            ..Config::default()
        }
    }

    /// Usable deletions per hour after subtracting the safety margin.
    pub fn quota_budget(&self) -> u64 {
        self.quota_config
            .max_deletes_per_hour
            .saturating_sub(self.quota_config.safety_margin)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), BskyrmError> {
        if self.target_domain.is_empty() {
            return Err(BskyrmError::InvalidConfig(
                ERROR_MESSAGE_TARGET_DOMAIN_EMPTY.to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(BskyrmError::InvalidConfig(
                ERROR_MESSAGE_BATCH_SIZE_ZERO.to_string(),
            ));
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(BskyrmError::InvalidConfig(
                ERROR_MESSAGE_PAGE_SIZE_OUT_OF_RANGE.to_string(),
            ));
        }
        if self.quota_budget() == 0 {
            return Err(BskyrmError::InvalidConfig(
                ERROR_MESSAGE_QUOTA_BUDGET_EMPTY.to_string(),
            ));
        }
        if self.rate_limit_retry_config.default_wait_milliseconds == 0 {
            return Err(BskyrmError::InvalidConfig(
                ERROR_MESSAGE_RATE_LIMIT_WAIT_ZERO.to_string(),
            ));
        }
        if self.call_limit_config.max_concurrent_calls == 0 {
            return Err(BskyrmError::InvalidConfig(
                ERROR_MESSAGE_MAX_CONCURRENT_CALLS_ZERO.to_string(),
            ));
        }
        if self.call_limit_config.calls_per_second == 0 {
            return Err(BskyrmError::InvalidConfig(
                ERROR_MESSAGE_CALLS_PER_SECOND_ZERO.to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            target_domain: String::new(),
            client_config: None,
            call_limit_config: CallLimitConfig::default(),
            page_size: DEFAULT_PAGE_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            quota_config: QuotaConfig::default(),
            rate_limit_retry_config: RateLimitRetryConfig::default(),
            inter_batch_delay_milliseconds: DEFAULT_INTER_BATCH_DELAY_MILLISECONDS,
            verbose: true,
            tracing_config: None,
            dry_run: false,
            force: false,
            show_no_progress: false,
            auto_complete_shell: None,
        }
    }
}

/// PDS endpoint and login.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub service_url: String,
    pub credentials: AppCredentials,
}

/// Client-side courtesy limit applied to every XRPC call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallLimitConfig {
    pub max_concurrent_calls: u16,
    pub calls_per_second: u32,
}

impl Default for CallLimitConfig {
    fn default() -> Self {
        CallLimitConfig {
            max_concurrent_calls: DEFAULT_MAX_CONCURRENT_CALLS,
            calls_per_second: DEFAULT_CALLS_PER_SECOND,
        }
    }
}

/// Rolling one-hour deletion budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaConfig {
    pub max_deletes_per_hour: u64,
    pub safety_margin: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        QuotaConfig {
            max_deletes_per_hour: DEFAULT_MAX_DELETES_PER_HOUR,
            safety_margin: DEFAULT_SAFETY_MARGIN,
        }
    }
}

/// Backoff policy for rate-limited batch writes.
///
/// `max_retries = None` retries forever, which can stall a run against a
/// persistently rate-limited server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRetryConfig {
    pub default_wait_milliseconds: u64,
    pub max_retries: Option<u32>,
}

impl Default for RateLimitRetryConfig {
    fn default() -> Self {
        RateLimitRetryConfig {
            default_wait_milliseconds: DEFAULT_RATE_LIMIT_WAIT_MILLISECONDS,
            max_retries: None,
        }
    }
}

/// Tracing (logging) configuration.
#[derive(Debug, Clone, Copy)]
pub struct TracingConfig {
    pub tracing_level: log::Level,
    pub json_tracing: bool,
    pub span_events_tracing: bool,
    pub disable_color_tracing: bool,
}
