//! Retry wrapper for external calls.

use std::future::Future;

use tracing::warn;

use crate::config::JobsConfig;
use crate::error::{PipelineError, PipelineResult};

/// Run an external call with a per-attempt timeout, capped attempts and
/// exponential backoff. Terminal and non-retryable errors short-circuit;
/// a timeout counts as a retryable failure.
pub async fn with_retry<T, F, Fut>(
    jobs: &JobsConfig,
    what: &str,
    mut call: F,
) -> PipelineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PipelineResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;

        let error = match tokio::time::timeout(jobs.call_timeout(), call()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e,
            Err(_) => PipelineError::Unreachable(format!("{what} timed out")),
        };

        if error.is_terminal() || !error.is_retryable() || attempt >= jobs.max_attempts {
            return Err(error);
        }

        let delay = jobs.backoff_delay(attempt);
        warn!(
            %what,
            attempt,
            max_attempts = jobs.max_attempts,
            ?delay,
            error = %error,
            "call failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}
