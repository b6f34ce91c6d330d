use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("{what} unavailable after {attempts} attempts: {last_error}")]
    Unavailable {
        what: String,
        attempts: u32,
        last_error: String,
    },
}

/// Calls `connect` until it succeeds or `attempts` tries are spent, sleeping
/// `delay` between failures.
pub async fn connect_with_retry<T, E, F, Fut>(
    what: &str,
    attempts: u32,
    delay: Duration,
    mut connect: F,
) -> Result<T, StartupError>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = attempts.max(1);
    let mut last_error = String::new();
    for attempt in 1..=attempts {
        match connect().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(what, attempt, "connected after retry");
                }
                return Ok(value);
            }
            Err(err) => {
                last_error = err.to_string();
                tracing::warn!(what, attempt, attempts, error = %last_error, "connection attempt failed");
                if attempt < attempts {
                    sleep(delay).await;
                }
            }
        }
    }
    Err(StartupError::Unavailable {
        what: what.to_string(),
        attempts,
        last_error,
    })
}
