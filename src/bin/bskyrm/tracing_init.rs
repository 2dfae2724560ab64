// Initializes the tracing subscriber for the CLI binary.

use std::env;
use std::io::IsTerminal;

use tracing_subscriber::fmt::format::FmtSpan;

use bskyrm_rs::MATCH_DIAGNOSTICS_TARGET;
use bskyrm_rs::config::TracingConfig;

const EVENT_FILTER_ENV_VAR: &str = "RUST_LOG";

/// Default event filter when `RUST_LOG` is not set.
///
/// Match diagnostics are info events, so at the default Warn level their
/// target is raised to info when they are enabled.
fn default_event_filter(config: &TracingConfig, match_diagnostics: bool) -> String {
    let tracing_level = config.tracing_level;
    let mut filter = format!("bskyrm_rs={tracing_level},bskyrm={tracing_level}");
    if match_diagnostics && tracing_level == log::Level::Warn {
        filter.push_str(&format!(",{MATCH_DIAGNOSTICS_TARGET}=info"));
    }
    filter
}

pub fn init_tracing(config: &TracingConfig, match_diagnostics: bool) {
    let fmt_span = if config.span_events_tracing {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let subscriber_builder = tracing_subscriber::fmt()
        .with_writer(std::io::stdout)
        .compact()
        .with_ansi(!config.disable_color_tracing && std::io::stdout().is_terminal())
        .with_span_events(fmt_span);

    let (event_filter, show_target) = match env::var(EVENT_FILTER_ENV_VAR) {
        Ok(filter) => (filter, true),
        Err(_) => (default_event_filter(config, match_diagnostics), false),
    };

    let subscriber_builder = subscriber_builder
        .with_env_filter(event_filter)
        .with_target(show_target);
    if config.json_tracing {
        subscriber_builder.json().init();
    } else {
        subscriber_builder.init();
    }
}
