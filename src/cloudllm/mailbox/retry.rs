//! Bounded exponential backoff for transient provider errors.
//!
//! `clients::common`/`clients::openai` send requests once and propagate failures directly; the
//! `Mailbox` adapters need retry since provider 429/5xx responses are routine and should not
//! surface as a hard failure on the first hiccup. Built the way the rest of this crate handles
//! ambient concerns: `log::warn!` around the retry, a plain config struct with a hand-written
//! `Default`.

use crate::cloudllm::error::CoreError;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Retry `op` while it returns [`CoreError::ProviderTransient`], doubling the backoff each time,
/// up to `config.max_attempts` total attempts. `on_retry(attempt, cause)` is invoked before each
/// sleep so callers can surface progress via [`crate::cloudllm::callbacks::StepCallbacks`].
pub async fn with_retry<T, F, Fut>(
    config: RetryConfig,
    mut on_retry: impl FnMut(u32, &CoreError),
    mut op: F,
) -> Result<T, CoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
{
    let mut attempt = 0;
    let mut backoff = config.initial_backoff;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(CoreError::ProviderTransient(msg)) if attempt < config.max_attempts => {
                let err = CoreError::ProviderTransient(msg);
                on_retry(attempt, &err);
                log::warn!(
                    "transient provider error on attempt {}/{}: {} (retrying in {:?})",
                    attempt,
                    config.max_attempts,
                    err,
                    backoff
                );
                tokio::time::sleep(backoff).await;
                backoff = std::cmp::min(backoff * 2, config.max_backoff);
            }
            Err(other) => return Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry_when_first_attempt_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_retry(
            RetryConfig {
                initial_backoff: Duration::from_millis(1),
                ..Default::default()
            },
            |_, _| {},
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, CoreError>(42) }
            },
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_errors_up_to_max_attempts() {
        let calls = AtomicU32::new(0);
        let result = with_retry(
            RetryConfig {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(4),
            },
            |_, _| {},
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<i32, _>(CoreError::ProviderTransient("boom".into())) }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result = with_retry(
            RetryConfig::default(),
            |_, _| {},
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<i32, _>(CoreError::ProviderFatal("bad auth".into())) }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
