//! Retry with exponential backoff for external-service calls.
//!
//! Every call into the embedding provider, vector store, and metadata store
//! goes through [`invoke`] — no call site carries its own retry loop.
//! Backoff sleeps suspend only the calling task.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::{ErrorKind, KestrelError, Result};

/// Retry behavior for one class of external calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the initial attempt; total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    /// Fraction of the delay used as ± randomization (0.0 disables).
    pub jitter: f64,
    /// Error kinds that trigger a retry; everything else re-raises at once.
    pub retryable: Vec<ErrorKind>,
    /// Optional per-call deadline. Elapsing counts as a retryable timeout.
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: 0.1,
            retryable: vec![ErrorKind::Connectivity, ErrorKind::Timeout, ErrorKind::Io],
            deadline: None,
        }
    }
}

impl RetryPolicy {
    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        self.retryable.contains(&kind)
    }

    /// Delay before retry number `attempt` (0-based):
    /// `min(max_delay, initial_delay * base^attempt)`, randomized ± jitter.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let raw = self.initial_delay.as_secs_f64() * self.exponential_base.powi(attempt as i32);
        let capped = raw.min(self.max_delay.as_secs_f64());
        let jittered = if self.jitter > 0.0 {
            let fraction = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
            (capped * (1.0 + fraction)).max(0.0)
        } else {
            capped
        };
        Duration::from_secs_f64(jittered)
    }
}

/// Run `f` under `policy`, retrying retryable failures with backoff.
///
/// The first attempt runs immediately. A non-retryable failure re-raises
/// after exactly one invocation; exhausting `max_retries` re-raises the
/// last error.
pub async fn invoke<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        let outcome = match policy.deadline {
            Some(limit) => match tokio::time::timeout(limit, f()).await {
                Ok(result) => result,
                Err(_) => Err(KestrelError::Timeout(limit)),
            },
            None => f().await,
        };

        match outcome {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(
                        operation,
                        attempts = attempt + 1,
                        "call succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) => {
                let kind = err.kind();
                if !policy.is_retryable(kind) {
                    tracing::error!(operation, %kind, error = %err, "non-retryable failure");
                    return Err(err);
                }
                if attempt >= policy.max_retries {
                    tracing::error!(
                        operation,
                        %kind,
                        attempts = attempt + 1,
                        error = %err,
                        "retries exhausted"
                    );
                    return Err(err);
                }
                let delay = policy.backoff_delay(attempt);
                tracing::warn!(
                    operation,
                    %kind,
                    attempt = attempt + 1,
                    max_attempts = policy.max_retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
