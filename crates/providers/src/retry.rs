//! Provider retry wrapper: per-attempt timeout plus bounded exponential backoff.
//!
//! Transient failures (network, timeout, rate limit, 5xx) are retried;
//! anything else is returned immediately.

use async_trait::async_trait;
use convoke_core::error::ProviderError;
use convoke_core::provider::*;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// How hard to try before giving up on a model call.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Wall-clock limit for a single attempt.
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry, doubled for each subsequent one.
    pub base_backoff: Duration,
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff.saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            max_retries: 3,
            base_backoff: Duration::from_millis(500),
        }
    }
}

/// A provider that retries transient failures of an inner provider.
pub struct RetryingProvider {
    inner: Arc<dyn convoke_core::Provider>,
    policy: RetryPolicy,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn convoke_core::Provider>) -> Self {
        Self {
            inner,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn run<T, F, Fut>(&self, operation: &str, mut attempt_fn: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let provider = self.inner.name();
        let mut attempt = 0u32;

        loop {
            let result = match tokio::time::timeout(self.policy.timeout, attempt_fn()).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(format!(
                    "Provider '{}' {} timed out after {}ms",
                    provider,
                    operation,
                    self.policy.timeout.as_millis()
                ))),
            };

            let error = match result {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(provider, operation, attempt, "Retry succeeded");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !error.is_transient() || attempt >= self.policy.max_retries {
                warn!(
                    provider,
                    operation,
                    attempts = attempt + 1,
                    error = %error,
                    "Provider call failed"
                );
                return Err(error);
            }

            let mut delay = self.policy.backoff(attempt);
            if let ProviderError::RateLimited { retry_after_secs } = &error {
                delay = delay.max(Duration::from_secs(*retry_after_secs));
            }

            warn!(
                provider,
                operation,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient provider failure, retrying"
            );

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl convoke_core::Provider for RetryingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        self.run("completion", || self.inner.complete(request.clone()))
            .await
    }

    async fn embed(
        &self,
        request: EmbeddingRequest,
    ) -> std::result::Result<EmbeddingResponse, ProviderError> {
        self.run("embedding", || self.inner.embed(request.clone()))
            .await
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        self.inner.health_check().await
    }
}
