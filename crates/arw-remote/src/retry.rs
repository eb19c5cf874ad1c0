//! Retry with exponential back-off and jitter for the remote clients.
//!
//! [`retry_with_backoff`] retries only transient failures: network errors,
//! request timeouts, throttling and 5xx responses. Anything else is a
//! property of the request and is returned after the first attempt.

use std::future::Future;
use std::time::Duration;

use crate::error::RemoteError;

/// Returns `true` for errors that are worth retrying after a back-off delay.
pub(crate) fn is_retriable(err: &RemoteError) -> bool {
    match err {
        RemoteError::Http(e) => {
            e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| s.is_server_error())
        }
        RemoteError::Status { status, .. } => {
            matches!(status, 408 | 429) || (500..600).contains(status)
        }
        RemoteError::Deserialize { .. } | RemoteError::InvalidBaseUrl { .. } => false,
    }
}

/// Runs `operation` with up to `max_retries` additional attempts on transient
/// errors.
///
/// The delay before retry `n` is `backoff_base_ms * 2^(n-1)`, capped at 60 s
/// and jittered by ±25 %.
pub(crate) async fn retry_with_backoff<T, F, Fut>(
    service: &'static str,
    max_retries: u32,
    backoff_base_ms: u64,
    mut operation: F,
) -> Result<T, RemoteError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    const MAX_DELAY_MS: u64 = 60_000;
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_retriable(&err) || attempt >= max_retries {
                    return Err(err);
                }
                attempt += 1;
                let computed = backoff_base_ms.saturating_mul(1u64 << (attempt - 1).min(10));
                let capped = computed.min(MAX_DELAY_MS);
                #[allow(
                    clippy::cast_possible_truncation,
                    clippy::cast_sign_loss,
                    clippy::cast_precision_loss
                )]
                let delay_ms = (capped as f64 * (rand::random::<f64>() * 0.5 + 0.75)) as u64;
                tracing::warn!(
                    service,
                    attempt,
                    max_retries,
                    delay_ms,
                    error = %err,
                    "transient remote error, retrying after back-off"
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}
