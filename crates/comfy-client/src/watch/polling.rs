use super::{deadline_after, time_left, CompletionSource};
use crate::client::{ComfyClient, HistoryPoll};
use crate::error::ClientError;
use crate::protocol::{JobHandle, OutputManifest};
use std::time::Duration;
use tokio::time::Instant;

/// Polls job history until outputs appear or the deadline passes
#[derive(Debug, Clone)]
pub struct PollingWatcher {
    interval: Duration,
    timeout: Duration,
}

impl PollingWatcher {
    /// Create a polling watcher
    #[inline]
    #[must_use]
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

#[async_trait::async_trait]
impl CompletionSource for PollingWatcher {
    async fn wait(
        &mut self,
        client: &ComfyClient,
        job: &JobHandle,
    ) -> Result<OutputManifest, ClientError> {
        let start = Instant::now();
        let deadline = deadline_after(start, self.timeout);
        let mut attempts = 0u32;

        loop {
            let remaining = time_left(deadline);
            if remaining.is_zero() {
                let elapsed = start.elapsed();
                tracing::warn!(
                    "Job {} not finished after {} polls ({:.1}s)",
                    job,
                    attempts,
                    elapsed.as_secs_f64()
                );
                return Err(ClientError::Timeout {
                    job: job.clone(),
                    elapsed_secs: elapsed.as_secs_f64(),
                });
            }

            attempts += 1;
            match tokio::time::timeout(remaining, client.poll_history(job)).await {
                Ok(Ok(HistoryPoll::Complete(manifest))) => {
                    tracing::info!(
                        "Job {} finished after {} polls with {} artifact(s)",
                        job,
                        attempts,
                        manifest.artifact_count()
                    );
                    return Ok(manifest);
                }
                Ok(Ok(HistoryPoll::Pending)) => {
                    tracing::debug!("Job {} still running (poll {})", job, attempts);
                }
                Ok(Ok(HistoryPoll::Unavailable { status })) => {
                    tracing::warn!("History for {} answered HTTP {}, retrying", job, status);
                }
                Ok(Err(e)) => {
                    tracing::warn!("History poll for {} failed: {}", job, e);
                }
                // deadline hit mid-request; the check at the top reports it
                Err(_) => continue,
            }

            tokio::time::sleep(self.interval.min(time_left(deadline))).await;
        }
    }

    fn name(&self) -> &'static str {
        "poll"
    }
}
