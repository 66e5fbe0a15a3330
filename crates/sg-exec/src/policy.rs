use std::future::Future;

use tokio_util::sync::CancellationToken;

use sg_types::SgError;

use crate::circuit::{CircuitBreaker, CircuitState};
use crate::resilience::ResilienceConfig;

/// Retry plus circuit breaker for a single named operation.
#[derive(Debug)]
pub struct ResiliencePolicy {
    operation: String,
    config: ResilienceConfig,
    breaker: CircuitBreaker,
}

impl ResiliencePolicy {
    pub fn new(operation: &str, config: &ResilienceConfig) -> Self {
        ResiliencePolicy {
            operation: operation.to_owned(),
            config: config.clone(),
            breaker: CircuitBreaker::new(
                operation,
                config.breaker_failure_count,
                config.breaker_test_interval(),
            ),
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Run `attempt` until it succeeds, fails permanently, or the retry
    /// budget is spent.
    ///
    /// Transient failures are retried after the configured backoff and count
    /// toward the breaker. Permanent failures, cancellation and an open
    /// circuit are returned immediately.
    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, mut attempt: F) -> Result<T, SgError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SgError>>,
    {
        let mut retries = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(SgError::Cancelled);
            }
            let permit = self.breaker.acquire()?;

            let err = match attempt().await {
                Ok(value) => {
                    permit.succeed();
                    return Ok(value);
                }
                Err(err) if err.is_transient() => {
                    permit.fail();
                    err
                }
                Err(err) => {
                    permit.release();
                    return Err(err);
                }
            };

            if retries >= self.config.retry_count {
                tracing::warn!(
                    operation = %self.operation,
                    attempts = retries + 1,
                    error = %err,
                    "retries exhausted"
                );
                return Err(err);
            }
            retries += 1;
            let delay = self.config.backoff(retries);
            tracing::warn!(
                operation = %self.operation,
                retry = retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient failure, retrying"
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(SgError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
