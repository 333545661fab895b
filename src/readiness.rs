// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Bounded readiness polling.

use std::{
    fmt::Display,
    future::Future,
    time::Duration,
};
use tokio::time::{sleep, timeout, Instant};
use tracing::debug;

/// Retry policy for waiting on something to become ready.
///
/// Attempts run back to back with `interval` of sleep in between, until one
/// succeeds or `timeout` has passed since the first attempt. A single attempt
/// never runs past the overall deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retry {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Retry {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Poll `attempt` until it succeeds.
    ///
    /// # Errors
    ///
    /// - Return [`TimedOut`] carrying the last failure once the deadline
    ///   passes.
    pub async fn poll<T, E, F, Fut>(&self, what: &str, mut attempt: F) -> Result<T, TimedOut>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut attempts = 0;
        let mut last_error = None;

        loop {
            attempts += 1;
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, attempt()).await {
                Ok(Ok(value)) => {
                    debug!("{what} ready after {attempts} attempts");
                    return Ok(value);
                }
                Ok(Err(err)) => {
                    debug!("{what} not ready: {err}");
                    last_error = Some(err.to_string());
                }
                Err(_) => last_error = Some("attempt timed out".into()),
            }

            if Instant::now() + self.interval >= deadline {
                return Err(TimedOut {
                    what: what.into(),
                    waited: started.elapsed(),
                    attempts,
                    last_error,
                });
            }
            sleep(self.interval).await;
        }
    }
}

/// Readiness deadline passed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "{what} not ready after {attempts} attempts in {:.1}s{}",
    .waited.as_secs_f64(),
    last_error_suffix(.last_error)
)]
pub struct TimedOut {
    pub what: String,
    pub waited: Duration,
    pub attempts: u32,
    pub last_error: Option<String>,
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    last_error
        .as_deref()
        .map(|err| format!(" (last error: {err})"))
        .unwrap_or_default()
}
