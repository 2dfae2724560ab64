use crate::config::{
    CallLimitConfig, ClientConfig, Config, QuotaConfig, RateLimitRetryConfig, TracingConfig,
};
use crate::types::AppCredentials;
use crate::types::error::BskyrmError;
use clap::Parser;
use clap::builder::NonEmptyStringValueParser;
use clap_verbosity_flag::{Verbosity, WarnLevel};
use std::ffi::OsString;

pub mod value_parser;


// ---------------------------------------------------------------------------
// Default constants
// ---------------------------------------------------------------------------

const DEFAULT_SERVICE_URL: &str = crate::config::DEFAULT_SERVICE_URL;
const DEFAULT_BATCH_SIZE: u16 = crate::config::DEFAULT_BATCH_SIZE;
const DEFAULT_PAGE_SIZE: u16 = crate::config::DEFAULT_PAGE_SIZE;
const DEFAULT_MAX_DELETES_PER_HOUR: u64 = crate::config::DEFAULT_MAX_DELETES_PER_HOUR;
const DEFAULT_SAFETY_MARGIN: u64 = crate::config::DEFAULT_SAFETY_MARGIN;
const DEFAULT_INTER_BATCH_DELAY_MILLISECONDS: u64 =
    crate::config::DEFAULT_INTER_BATCH_DELAY_MILLISECONDS;
const DEFAULT_RATE_LIMIT_WAIT_MILLISECONDS: u64 =
    crate::config::DEFAULT_RATE_LIMIT_WAIT_MILLISECONDS;
const DEFAULT_MAX_CONCURRENT_CALLS: u16 = crate::config::DEFAULT_MAX_CONCURRENT_CALLS;
const DEFAULT_CALLS_PER_SECOND: u32 = crate::config::DEFAULT_CALLS_PER_SECOND;
const DEFAULT_MATCH_DIAGNOSTICS: bool = true;
const DEFAULT_JSON_TRACING: bool = false;
const DEFAULT_SPAN_EVENTS_TRACING: bool = false;
const DEFAULT_DISABLE_COLOR_TRACING: bool = false;
const DEFAULT_DRY_RUN: bool = false;
const DEFAULT_SHOW_NO_PROGRESS: bool = false;
const DEFAULT_FORCE: bool = false;

// ---------------------------------------------------------------------------
// Error messages
// ---------------------------------------------------------------------------

const ERROR_MESSAGE_CREDENTIALS_REQUIRED: &str =
    "Both --identifier and --app-password (or BSKY_IDENTIFIER / BSKY_APP_PASSWORD) are required.";

// ---------------------------------------------------------------------------
// CLIArgs (clap-derived argument struct)
// ---------------------------------------------------------------------------

/// bskyrm - Delete every Bluesky post that links to a domain.
///
/// Scans the whole post history of the account, then deletes matching
/// posts in batches while staying under the PDS hourly write quota.
///
/// Example:
///   bskyrm example.com --identifier alice.bsky.social --dry-run
///   BSKY_APP_PASSWORD=xxxx-xxxx-xxxx-xxxx bskyrm example.com --identifier alice.bsky.social --force
#[derive(Parser, Clone, Debug)]
#[command(name = "bskyrm", version, about, long_about = None)]
pub struct CLIArgs {
    /// Domain whose links mark a post for deletion (substring match).
    #[arg(
        env,
        value_parser = NonEmptyStringValueParser::new(),
        default_value_if("auto_complete_shell", clap::builder::ArgPredicate::IsPresent, "ignored"),
        required = false,
    )]
    pub target_domain: String,

    // -----------------------------------------------------------------------
    // General options
    // -----------------------------------------------------------------------
    /// Scan and report matches but do not delete anything.
    #[arg(short = 'd', long, env, default_value_t = DEFAULT_DRY_RUN, help_heading = "General")]
    pub dry_run: bool,

    /// Don't show the progress bar.
    #[arg(long, env, default_value_t = DEFAULT_SHOW_NO_PROGRESS, help_heading = "General")]
    pub show_no_progress: bool,

    /// Log every matched post together with the link that matched.
    #[arg(
        long,
        env,
        default_value_t = DEFAULT_MATCH_DIAGNOSTICS,
        action = clap::ArgAction::Set,
        help_heading = "General"
    )]
    pub match_diagnostics: bool,

    // -----------------------------------------------------------------------
    // Account options
    // -----------------------------------------------------------------------
    /// Handle or DID of the account.
    #[arg(
        long,
        env = "BSKY_IDENTIFIER",
        value_parser = NonEmptyStringValueParser::new(),
        help_heading = "Account"
    )]
    pub identifier: Option<String>,

    /// App password of the account.
    #[arg(
        long,
        env = "BSKY_APP_PASSWORD",
        hide_env_values = true,
        value_parser = NonEmptyStringValueParser::new(),
        help_heading = "Account"
    )]
    pub app_password: Option<String>,

    /// PDS service URL.
    #[arg(
        long,
        env,
        default_value = DEFAULT_SERVICE_URL,
        value_parser = value_parser::url::check_scheme,
        help_heading = "Account"
    )]
    pub service_url: String,

    // -----------------------------------------------------------------------
    // Deletion options
    // -----------------------------------------------------------------------
    /// Number of posts per batch-write call. Default: 200.
    #[arg(long, env, default_value_t = DEFAULT_BATCH_SIZE, help_heading = "Deletion")]
    pub batch_size: u16,

    /// Milliseconds to wait between batch-write calls. Default: 5000.
    #[arg(
        long,
        env,
        default_value_t = DEFAULT_INTER_BATCH_DELAY_MILLISECONDS,
        help_heading = "Deletion"
    )]
    pub inter_batch_delay_milliseconds: u64,

    /// Records per listRecords page (1-100). Default: 100.
    #[arg(long, env, default_value_t = DEFAULT_PAGE_SIZE, help_heading = "Deletion")]
    pub page_size: u16,

    // -----------------------------------------------------------------------
    // Safety options
    // -----------------------------------------------------------------------
    /// Skip confirmation prompt before deleting.
    #[arg(short = 'f', long, env, default_value_t = DEFAULT_FORCE, help_heading = "Safety")]
    pub force: bool,

    // -----------------------------------------------------------------------
    // Quota options
    // -----------------------------------------------------------------------
    /// Server-side deletion quota per rolling hour. Default: 5000.
    #[arg(long, env, default_value_t = DEFAULT_MAX_DELETES_PER_HOUR, help_heading = "Quota")]
    pub max_deletes_per_hour: u64,

    /// Deletions per hour left unused as headroom. Default: 100.
    #[arg(long, env, default_value_t = DEFAULT_SAFETY_MARGIN, help_heading = "Quota")]
    pub safety_margin: u64,

    // -----------------------------------------------------------------------
    // Rate limit options
    // -----------------------------------------------------------------------
    /// Wait used when a rate-limited response has no usable reset time. Default: 60000.
    #[arg(
        long,
        env,
        default_value_t = DEFAULT_RATE_LIMIT_WAIT_MILLISECONDS,
        help_heading = "Rate limit"
    )]
    pub rate_limit_default_wait_milliseconds: u64,

    /// Give up on a batch after this many rate-limited retries. Unbounded when omitted.
    #[arg(long, env, help_heading = "Rate limit")]
    pub max_rate_limit_retries: Option<u32>,

    /// Maximum XRPC calls in flight. Default: 3.
    #[arg(long, env, default_value_t = DEFAULT_MAX_CONCURRENT_CALLS, help_heading = "Rate limit")]
    pub max_concurrent_calls: u16,

    /// Maximum XRPC calls per second. Default: 5.
    #[arg(long, env, default_value_t = DEFAULT_CALLS_PER_SECOND, help_heading = "Rate limit")]
    pub calls_per_second: u32,

    // -----------------------------------------------------------------------
    // Logging options
    // -----------------------------------------------------------------------
    /// Verbosity level. -q (quiet), default (normal), -v, -vv, -vvv.
    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    /// Output logs in JSON format.
    #[arg(long, env, default_value_t = DEFAULT_JSON_TRACING, help_heading = "Logging")]
    pub json_tracing: bool,

    /// Enable tracing span events.
    #[arg(long, env, default_value_t = DEFAULT_SPAN_EVENTS_TRACING, help_heading = "Logging")]
    pub span_events_tracing: bool,

    /// Disable colored output in logs.
    #[arg(long, env, default_value_t = DEFAULT_DISABLE_COLOR_TRACING, help_heading = "Logging")]
    pub disable_color_tracing: bool,

    // -----------------------------------------------------------------------
    // Advanced options
    // -----------------------------------------------------------------------
    /// Generate shell completions.
    #[arg(long, env, help_heading = "Advanced")]
    pub auto_complete_shell: Option<clap_complete::shells::Shell>,
}

// ---------------------------------------------------------------------------
// parse_from_args (public API)
// ---------------------------------------------------------------------------

/// Parse command-line arguments into a `CLIArgs` struct.
///
/// # Example
///
/// ```
/// use bskyrm_rs::config::args::parse_from_args;
///
/// let args = vec!["bskyrm", "example.com", "--dry-run"];
/// let cli_args = parse_from_args(args).unwrap();
/// assert!(cli_args.dry_run);
/// ```
pub fn parse_from_args<I, T>(args: I) -> Result<CLIArgs, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    CLIArgs::try_parse_from(args)
}

/// Parse arguments and build a Config in one step.
pub fn build_config_from_args<I, T>(args: I) -> Result<Config, String>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli_args = CLIArgs::try_parse_from(args).map_err(|e| e.to_string())?;
    Config::try_from(cli_args)
}

// ---------------------------------------------------------------------------
// Validation and Config conversion
// ---------------------------------------------------------------------------

impl CLIArgs {
    fn build_client_config(&self) -> Result<Option<ClientConfig>, String> {
        let (Some(identifier), Some(app_password)) = (&self.identifier, &self.app_password) else {
            // Completion generation never talks to a server.
            if self.auto_complete_shell.is_some() {
                return Ok(None);
            }
            return Err(ERROR_MESSAGE_CREDENTIALS_REQUIRED.to_string());
        };

        Ok(Some(ClientConfig {
            service_url: self.service_url.trim_end_matches('/').to_string(),
            credentials: AppCredentials {
                identifier: identifier.clone(),
                app_password: app_password.clone(),
            },
        }))
    }

    fn build_tracing_config(&self) -> Option<TracingConfig> {
        let log_level = self.verbosity.log_level()?;

        Some(TracingConfig {
            tracing_level: log_level,
            json_tracing: self.json_tracing,
            span_events_tracing: self.span_events_tracing,
            disable_color_tracing: self.disable_color_tracing,
        })
    }
}

impl TryFrom<CLIArgs> for Config {
    type Error = String;

    fn try_from(args: CLIArgs) -> Result<Self, Self::Error> {
        let client_config = args.build_client_config()?;
        let tracing_config = args.build_tracing_config();

        let config = Config {
            target_domain: args.target_domain.clone(),
            client_config,
            call_limit_config: CallLimitConfig {
                max_concurrent_calls: args.max_concurrent_calls,
                calls_per_second: args.calls_per_second,
            },
            page_size: args.page_size,
            batch_size: args.batch_size,
            quota_config: QuotaConfig {
                max_deletes_per_hour: args.max_deletes_per_hour,
                safety_margin: args.safety_margin,
            },
            rate_limit_retry_config: RateLimitRetryConfig {
                default_wait_milliseconds: args.rate_limit_default_wait_milliseconds,
                max_retries: args.max_rate_limit_retries,
            },
            inter_batch_delay_milliseconds: args.inter_batch_delay_milliseconds,
            verbose: args.match_diagnostics,
            tracing_config,
            dry_run: args.dry_run,
            force: args.force,
            show_no_progress: args.show_no_progress,
            auto_complete_shell: args.auto_complete_shell,
        };
        config.validate().map_err(|e| match e {
            BskyrmError::InvalidConfig(message) => message,
            e => e.to_string(),
        })?;

        Ok(config)
    }
}
