use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use tracing::{debug, error, trace};

use bskyrm_rs::config::Config;
use bskyrm_rs::{
    CLIArgs, DeletionPipeline, create_pipeline_cancellation_token, exit_code_from_error,
    is_cancelled_error,
};

mod ctrl_c_handler;
pub mod indicator;
mod tracing_init;
pub mod ui_config;

const EXIT_CODE_WARNING: i32 = 3;

/// bskyrm - Delete every Bluesky post that links to a domain.
///
/// This binary is a thin wrapper over the bskyrm-rs library.
#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config_exit_if_err();

    if let Some(shell) = config.auto_complete_shell {
        generate(
            shell,
            &mut CLIArgs::command(),
            "bskyrm",
            &mut std::io::stdout(),
        );

        return Ok(());
    }

    start_tracing_if_necessary(&config);

    trace!("config = {:?}", config);

    let exit_code = run(config).await?;
    if exit_code != 0 {
        std::process::exit(exit_code);
    }

    Ok(())
}

fn load_config_exit_if_err() -> Config {
    match Config::try_from(CLIArgs::parse()) {
        Ok(config) => config,
        Err(error_message) => {
            clap::Error::raw(clap::error::ErrorKind::ValueValidation, error_message).exit()
        }
    }
}

fn start_tracing_if_necessary(config: &Config) -> bool {
    let Some(tracing_config) = config.tracing_config.as_ref() else {
        return false;
    };

    tracing_init::init_tracing(tracing_config, config.verbose);
    true
}

async fn run(config: Config) -> Result<i32> {
    let cancellation_token = create_pipeline_cancellation_token();

    ctrl_c_handler::spawn_ctrl_c_handler(cancellation_token.clone());

    let start_time = tokio::time::Instant::now();
    debug!("deletion pipeline start.");

    let mut pipeline = match DeletionPipeline::new(config.clone(), cancellation_token).await {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!("{:#}", e);
            return Ok(exit_code_from_error(&e));
        }
    };

    let indicator_join_handle = indicator::show_indicator(
        pipeline.get_stats_receiver(),
        ui_config::is_progress_indicator_needed(&config),
        ui_config::is_show_result_needed(&config),
        config.dry_run,
    );

    pipeline.run().await;
    indicator_join_handle.await?;

    let duration_sec = format!("{:.3}", start_time.elapsed().as_secs_f32());

    if let Some(errors) = pipeline.get_errors_and_consume() {
        let mut exit_code = 0;
        for err in &errors {
            if is_cancelled_error(err) {
                debug!("deletion cancelled by user.");
                continue;
            }
            error!("{:#}", err);
            exit_code = exit_code.max(exit_code_from_error(err));
        }
        if exit_code != 0 {
            error!(duration_sec = duration_sec, "bskyrm failed.");
        }
        return Ok(exit_code);
    }

    debug!(duration_sec = duration_sec, "bskyrm has been completed.");

    if pipeline.has_warning() {
        return Ok(EXIT_CODE_WARNING);
    }

    Ok(0)
}
