use std::{future::Future, time::Duration};

use tokio_util::sync::CancellationToken;

use crate::{settings::SyncConfig, sync::types::TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.backoff_base(),
        }
    }

    /// Wait after the given failed attempt (1-based): base, 2x base, 4x base...
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

/// Details handed to the retry observer before each backoff wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryAttempt<'a> {
    pub attempt: u32,
    pub error: &'a TransportError,
    pub next_delay: Duration,
}

/// Runs `operation` until it returns `Ok`, the attempts run out, or `cancel`
/// fires. Only transport failures are retried; a returned outcome is final
/// whatever it contains. Cancellation interrupts both in-flight attempts and
/// backoff waits and yields `TransportError::Cancelled`.
pub async fn with_retry<T, F, Fut, O>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
    mut on_retry: O,
) -> Result<T, TransportError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
    O: FnMut(RetryAttempt<'_>),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            result = operation(attempt) => result,
        };

        let error = match result {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if !error.is_retryable() || attempt >= max_attempts {
            return Err(error);
        }

        let delay = policy.delay_after(attempt);
        on_retry(RetryAttempt {
            attempt,
            error: &error,
            next_delay: delay,
        });

        tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }

        attempt += 1;
    }
}
