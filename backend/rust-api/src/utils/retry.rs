use std::time::Duration;

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter_max: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(500),
            jitter_max: Some(Duration::from_millis(50)),
        }
    }
}

impl RetryConfig {
    /// Single attempt; used by tests and latency-sensitive paths.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    fn delay(&self, backoff: Duration) -> Duration {
        match self.jitter_max {
            Some(jitter_max) => {
                let jitter_ms = jitter_max.as_millis() as u64;
                let extra = if jitter_ms == 0 {
                    0
                } else {
                    rand::random::<u64>() % (jitter_ms + 1)
                };
                backoff + Duration::from_millis(extra)
            }
            None => backoff,
        }
    }
}

/// Retries `f` with jittered exponential backoff while it fails with a
/// transient error. Validation, state and not-found errors return at once.
pub async fn retry_transient<F, Fut, T>(
    operation: &str,
    config: &RetryConfig,
    mut f: F,
) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = EngineResult<T>>,
{
    let mut attempts_left = config.max_attempts.max(1);
    let mut backoff = config.base_backoff;

    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempts_left -= 1;
                if attempts_left == 0 || !err.is_transient() {
                    return Err(err);
                }
                tracing::warn!(
                    operation,
                    attempts_left,
                    error = %err,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(config.delay(backoff)).await;
                backoff = std::cmp::min(backoff * 2, config.max_backoff);
            }
        }
    }
}

/// Collapses a timed-out future into `UpstreamUnavailable`.
pub async fn with_timeout<Fut, T>(operation: &str, limit: Duration, future: Fut) -> EngineResult<T>
where
    Fut: std::future::Future<Output = EngineResult<T>>,
{
    tokio::time::timeout(limit, future).await.map_err(|_| {
        EngineError::upstream(format!("{} timed out after {}ms", operation, limit.as_millis()))
    })?
}
