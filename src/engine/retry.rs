//! Bounded retry with exponential backoff for single order attempts. Only orders the venue
//! provably never received are sent again.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::AssetSettings;
use crate::error::VenueError;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            exponential_base: 2,
        }
    }
}

impl RetryConfig {
    pub fn from_settings(settings: &AssetSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_delay: settings.retry_backoff,
            ..Self::default()
        }
    }
}

/// Runs `operation` until it succeeds, fails with a non-resendable error, or
/// `max_retries` retries are spent. Returns the last error on exhaustion.
pub async fn retry_with_backoff<F, Fut, T>(
    operation: F,
    config: &RetryConfig,
    context: &str,
) -> Result<T, VenueError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, VenueError>>,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_resendable() => return Err(e),
            Err(e) if attempt > config.max_retries => {
                warn!("{} failed after {} attempts: {}", context, attempt, e);
                return Err(e);
            }
            Err(e) => {
                warn!(
                    "Attempt {}/{} failed for {}: {}. Retrying in {}ms...",
                    attempt,
                    config.max_retries + 1,
                    context,
                    e,
                    delay.as_millis()
                );

                tokio::time::sleep(delay).await;
                delay = (delay * config.exponential_base).min(config.max_delay);
            }
        }
    }
}
