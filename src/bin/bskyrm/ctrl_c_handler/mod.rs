// Cancels the pipeline token on Ctrl+C. Every wait in the pipeline
// observes the token, so the run ends with a partial report.

use bskyrm_rs::PipelineCancellationToken;
use tokio::task::JoinHandle;
use tokio::{select, signal};
use tracing::{debug, warn};

pub fn spawn_ctrl_c_handler(cancellation_token: PipelineCancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        select! {
            _ = cancellation_token.cancelled() => {
                debug!("cancellation_token canceled.")
            }
            _ = signal::ctrl_c() => {
                warn!("ctrl-c received, stopping after the current batch.");
                cancellation_token.cancel();
            }
        }
    })
}
