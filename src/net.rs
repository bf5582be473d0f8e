use std::future::Future;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::sources::SourceError;

pub const USER_AGENT: &str = "paper-finder/0.1";

/// Desktop user agents rotated by the HTML-scraped sources.
const BROWSER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7)",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36",
];

pub fn random_browser_agent() -> &'static str {
    BROWSER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(BROWSER_AGENTS[0])
}

/// Build an HTTP client with the given per-request timeout.
pub fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .unwrap()
}

/// Pause between consecutive requests to the same site, with jitter, to
/// reduce the chance of rate-limiting or bot-detection blocks.
pub async fn courtesy_delay(base: Duration, jitter: Duration) {
    let extra = rand::thread_rng().gen_range(0..=jitter.as_millis() as u64);
    tokio::time::sleep(base + Duration::from_millis(extra)).await;
}

/// Run `op` up to `max_attempts` times, sleeping `delay` between failed
/// attempts. When the attempts are exhausted the last error is returned
/// wrapped in [`SourceError::NetworkFailure`] with the attempt count.
pub async fn with_retry<T, F, Fut>(
    max_attempts: u32,
    delay: Option<Duration>,
    mut op: F,
) -> Result<T, SourceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    debug_assert!(max_attempts >= 1);
    let mut attempts = 0;
    loop {
        attempts += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempts >= max_attempts => {
                return Err(SourceError::NetworkFailure {
                    attempts,
                    cause: Box::new(err),
                });
            }
            Err(err) => {
                tracing::debug!("attempt {}/{} failed: {}", attempts, max_attempts, err);
                if let Some(d) = delay {
                    tokio::time::sleep(d).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retry_returns_success_on_third_attempt() {
        let calls = AtomicU32::new(0);
        let result = with_retry(3, None, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(SourceError::Status(500))
                } else {
                    Ok("ok")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_exhaustion_carries_last_cause() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(3, None, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(SourceError::Status(503)) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result.unwrap_err() {
            SourceError::NetworkFailure { attempts, cause } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*cause, SourceError::Status(503)));
            }
            other => panic!("expected NetworkFailure, got {other}"),
        }
    }

    #[tokio::test]
    async fn retry_single_attempt_succeeds_immediately() {
        let result = with_retry(3, None, || async { Ok(1) }).await;
        assert_eq!(result.unwrap(), 1);
    }
}
