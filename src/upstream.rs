//! Timeouts and bounded retries around collaborator calls.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::backend::BackendError;

/// Default number of extra attempts for idempotent reads
const DEFAULT_MAX_RETRIES: u32 = 2;

/// Base delay for exponential backoff (milliseconds)
const RETRY_BASE_DELAY_MS: u64 = 100;

#[derive(Debug, Clone, Copy)]
pub struct UpstreamPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for UpstreamPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl UpstreamPolicy {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
        }
    }

    /// Run a single attempt bounded by the timeout. Used for writes.
    pub async fn once<T, Fut>(&self, operation: &'static str, call: Fut) -> Result<T, BackendError>
    where
        Fut: Future<Output = Result<T, BackendError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, timeout_ms = self.timeout.as_millis() as u64, "Upstream call timed out");
                Err(BackendError::Timeout(self.timeout))
            }
        }
    }

    /// Run an idempotent call, retrying transient failures with exponential backoff.
    pub async fn retrying<T, F, Fut>(&self, operation: &'static str, call: F) -> Result<T, BackendError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let mut attempt = 0;
        loop {
            match self.once(operation, call()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.base_delay * 2u32.pow(attempt - 1);
                    warn!(
                        operation,
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying upstream call"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_once_times_out() {
        let policy = UpstreamPolicy::new(Duration::from_secs(1));
        let result: Result<(), _> = policy
            .once("slow", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(BackendError::Timeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrying_recovers_from_transient_failure() {
        let policy = UpstreamPolicy::new(Duration::from_secs(1));
        let calls = Arc::new(AtomicU32::new(0));

        let result = policy
            .retrying("flaky", || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(BackendError::Status {
                            status: 502,
                            body: "bad gateway".to_string(),
                        })
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrying_is_bounded() {
        let policy = UpstreamPolicy::new(Duration::from_secs(1));
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = policy
            .retrying("down", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(BackendError::Timeout(Duration::from_secs(1)))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1 + DEFAULT_MAX_RETRIES);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let policy = UpstreamPolicy::new(Duration::from_secs(1));
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = policy
            .retrying("bad-input", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(BackendError::Status {
                        status: 400,
                        body: "bad".to_string(),
                    })
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
