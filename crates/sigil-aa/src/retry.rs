use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

/// Outcome of one polling attempt.
#[derive(Debug)]
pub enum Attempt<T, E> {
    /// Done; stop polling.
    Ready(T),
    /// Not yet; try again after the interval.
    Pending,
    /// Give up immediately.
    Failed(E),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts")]
    Exhausted { attempts: u32 },
    #[error(transparent)]
    Aborted(E),
}

/// Fixed-interval polling with a hard attempt cap. No backoff, no jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 60,
            interval: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Run `attempt` until it is ready, fails, or the cap is reached.
    ///
    /// The first attempt runs immediately and the interval is slept between
    /// attempts, so `n` attempts take `(n - 1) * interval`. `attempt` receives
    /// the 1-based attempt number.
    pub async fn poll<T, E, F, Fut>(&self, mut attempt: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Attempt<T, E>>,
    {
        for n in 1..=self.max_attempts {
            match attempt(n).await {
                Attempt::Ready(value) => return Ok(value),
                Attempt::Failed(err) => return Err(RetryError::Aborted(err)),
                Attempt::Pending => {
                    debug!(attempt = n, max_attempts = self.max_attempts, "not ready");
                    if n < self.max_attempts {
                        tokio::time::sleep(self.interval).await;
                    }
                }
            }
        }
        Err(RetryError::Exhausted {
            attempts: self.max_attempts,
        })
    }
}
