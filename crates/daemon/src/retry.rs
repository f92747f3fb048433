//! Fixed-delay retry and injectable sleeping
//!
//! All waits in the bootstrap path go through [`Sleeper`] so tests can observe
//! them without real time passing.

use async_trait::async_trait;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Something that can wait
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real time via tokio
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Retry forever with a constant delay between attempts.
///
/// There is no attempt ceiling and the delay never grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    delay: Duration,
}

impl RetryPolicy {
    pub const fn fixed(delay: Duration) -> Self {
        Self { delay }
    }

    /// Run `op` until it succeeds, sleeping `delay` after every failure
    pub async fn run<T, E, F, Fut>(&self, sleeper: &dyn Sleeper, what: &str, mut op: F) -> T
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return value,
                Err(e) => {
                    warn!(
                        "{} failed (attempt {}): {}; retrying in {:?}",
                        what, attempt, e, self.delay
                    );
                    sleeper.sleep(self.delay).await;
                }
            }
        }
    }
}
