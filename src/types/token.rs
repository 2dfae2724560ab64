/// A cancellation token used to signal pipeline shutdown.
///
/// This is a type alias for [`tokio_util::sync::CancellationToken`]. Pass the
/// token to [`DeletionPipeline::new`](crate::DeletionPipeline::new) and call
/// [`cancel()`](tokio_util::sync::CancellationToken::cancel) on it to interrupt
/// any wait (inter-batch delay, quota window, rate-limit backoff) and stop
/// dispatching further batches.
pub type PipelineCancellationToken = tokio_util::sync::CancellationToken;

/// Create a new [`PipelineCancellationToken`].
///
/// # Example
///
/// ```
/// use bskyrm_rs::create_pipeline_cancellation_token;
///
/// let token = create_pipeline_cancellation_token();
/// assert!(!token.is_cancelled());
///
/// token.cancel();
/// assert!(token.is_cancelled());
/// ```
pub fn create_pipeline_cancellation_token() -> PipelineCancellationToken {
    tokio_util::sync::CancellationToken::new()
}

/// Sleep for `duration`, returning `false` if the token was cancelled first.
pub async fn sleep_or_cancelled(
    duration: std::time::Duration,
    cancellation_token: &PipelineCancellationToken,
) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancellation_token.cancelled() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn create_cancellation_token() {
        create_pipeline_cancellation_token();
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_completes_when_not_cancelled() {
        let token = create_pipeline_cancellation_token();
        assert!(sleep_or_cancelled(Duration::from_secs(10), &token).await);
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_interrupted_by_cancellation() {
        let token = create_pipeline_cancellation_token();
        token.cancel();
        assert!(!sleep_or_cancelled(Duration::from_secs(3600), &token).await);
    }
}
