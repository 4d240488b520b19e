//! Retry policy for transient provider responses.
//!
//! Statuses 429 and 529 are retriable. A `Retry-After` header (integer
//! seconds or an HTTP date) takes precedence over the computed backoff;
//! otherwise delays double from 1 s up to a 32 s cap with ±20 % jitter.
//! The backoff sleep races the turn's cancel token.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use keel_domain::cancel::CancelToken;
use keel_domain::config::RetryConfig;
use keel_domain::{Error, Result};

/// Outcome of one HTTP attempt, from the retry loop's point of view.
pub enum AttemptError {
    /// 429 / 529 -- worth another attempt.
    Retriable {
        status: u16,
        retry_after: Option<Duration>,
        message: String,
    },
    /// Anything else -- surface immediately.
    Fatal(Error),
}

/// Whether an HTTP status justifies a retry.
pub fn is_retriable_status(status: u16) -> bool {
    status == 429 || status == 529
}

/// Parse a `Retry-After` header value: either delay-seconds or an
/// HTTP date (RFC 2822). Past dates collapse to zero.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    if let Ok(when) = chrono::DateTime::parse_from_rfc2822(value) {
        let delta = when.with_timezone(&chrono::Utc) - chrono::Utc::now();
        return Some(delta.to_std().unwrap_or(Duration::ZERO));
    }
    None
}

/// Exponential backoff with jitter for the given zero-based attempt.
pub fn backoff_delay(cfg: &RetryConfig, attempt: u32) -> Duration {
    let doubled = cfg
        .base_delay_ms
        .saturating_mul(1u64 << attempt.min(16))
        .min(cfg.max_delay_ms);
    let jitter = cfg.jitter.clamp(0.0, 1.0);
    let factor = if jitter > 0.0 {
        1.0 + rand::thread_rng().gen_range(-jitter..=jitter)
    } else {
        1.0
    };
    Duration::from_millis((doubled as f64 * factor).max(0.0) as u64)
}

/// Drive `attempt_fn` until it succeeds, fails fatally, or the retry
/// budget is exhausted. At most `1 + max_retries` attempts run.
pub async fn with_retry<T, F, Fut>(
    cfg: &RetryConfig,
    cancel: &CancelToken,
    provider: &str,
    mut attempt_fn: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, AttemptError>>,
{
    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        match attempt_fn().await {
            Ok(v) => return Ok(v),
            Err(AttemptError::Fatal(e)) => return Err(e),
            Err(AttemptError::Retriable {
                status,
                retry_after,
                message,
            }) => {
                if attempt >= cfg.max_retries {
                    return Err(Error::Provider {
                        provider: provider.to_string(),
                        message: format!(
                            "HTTP {status} after {} attempts - {message}",
                            attempt + 1
                        ),
                    });
                }

                let delay = retry_after.unwrap_or_else(|| backoff_delay(cfg, attempt));
                tracing::warn!(
                    provider = provider,
                    status = status,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "retriable provider response; backing off"
                );

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                }
                attempt += 1;
            }
        }
    }
}
