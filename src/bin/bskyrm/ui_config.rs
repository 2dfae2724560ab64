// Decides whether the progress line and the final summary are shown.

use bskyrm_rs::config::Config;

/// Whether to show the live-updating progress line.
///
/// Returns `false` when:
/// - `show_no_progress` is set
/// - Verbosity is above Warn (tracing takes over the terminal)
/// - JSON logging is enabled
pub fn is_progress_indicator_needed(config: &Config) -> bool {
    if config.show_no_progress {
        return false;
    }

    let Some(tracing_config) = config.tracing_config else {
        return true;
    };

    if log::Level::Warn < tracing_config.tracing_level {
        return false;
    }

    !tracing_config.json_tracing
}

/// Whether to show the final result summary line.
pub fn is_show_result_needed(config: &Config) -> bool {
    if config.show_no_progress {
        return false;
    }

    config
        .tracing_config
        .map(|tracing_config| !tracing_config.json_tracing)
        .unwrap_or(true)
}
