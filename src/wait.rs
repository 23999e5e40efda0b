//! Polling for conditions on remote systems.
//!
//! Hosts under test can't notify us of anything, every state transition
//! (host up, vm running, sr attached, ...) is awaited by polling a predicate.

use crate::config::WaitConfig;
use std::{thread::sleep, time::Duration};
use thiserror::Error;

/// Predicate never yielded the expected value.
#[derive(Debug, Clone, Error)]
#[error(
    "timeout reached while waiting for {} to yield {} ({:.1}s)",
    .message.as_deref().unwrap_or("condition"),
    .expected,
    .timeout.as_secs_f64()
)]
pub struct TimeoutError {
    pub expected: bool,
    pub timeout: Duration,
    pub message: Option<String>,
}

/// Description of one wait.
#[derive(Debug, Clone)]
pub struct Wait {
    message: Option<String>,
    timeout: Duration,
    retry_delay: Duration,
    invert: bool,
}

impl Default for Wait {
    fn default() -> Self {
        Self::from_config(&WaitConfig::default())
    }
}

impl Wait {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(conf: &WaitConfig) -> Self {
        Self {
            message: None,
            timeout: conf.timeout,
            retry_delay: conf.retry_delay,
            invert: false,
        }
    }

    /// Logged once when the wait starts.
    pub fn message<T: Into<String>>(mut self, msg: T) -> Self {
        self.message = Some(msg.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Wait for the predicate to be false instead.
    pub fn invert(mut self) -> Self {
        self.invert = !self.invert;
        self
    }

    pub fn until<F>(&self, mut f: F) -> Result<(), TimeoutError>
    where
        F: FnMut() -> bool,
    {
        self.try_until(|| Ok::<_, TimeoutError>(f()))
    }

    /// Like [`Wait::until`], errors of `f` end the wait immediately.
    pub fn try_until<F, E>(&self, mut f: F) -> Result<(), E>
    where
        F: FnMut() -> Result<bool, E>,
        E: From<TimeoutError>,
    {
        if let Some(msg) = self.message.as_ref() {
            log::info!("{}", msg);
        }
        let expected = !self.invert;
        // a zero delay would never consume the budget
        let delay = self.retry_delay.max(Duration::from_millis(1));
        let mut remaining = self.timeout;
        loop {
            if f()? == expected {
                return Ok(());
            }
            // budget is checked after at least one try, even if timeout < delay
            remaining = remaining.checked_sub(delay).unwrap_or_default();
            if remaining == Duration::from_secs(0) {
                return Err(TimeoutError {
                    expected,
                    timeout: self.timeout,
                    message: self.message.clone(),
                }
                .into());
            }
            sleep(delay);
        }
    }
}

/// Waits until `f` returns true.
pub fn wait_for<F>(
    f: F,
    message: Option<&str>,
    timeout: Duration,
    retry_delay: Duration,
) -> Result<(), TimeoutError>
where
    F: FnMut() -> bool,
{
    build(message, timeout, retry_delay).until(f)
}

/// Waits until `f` returns false.
pub fn wait_for_not<F>(
    f: F,
    message: Option<&str>,
    timeout: Duration,
    retry_delay: Duration,
) -> Result<(), TimeoutError>
where
    F: FnMut() -> bool,
{
    build(message, timeout, retry_delay).invert().until(f)
}

fn build(message: Option<&str>, timeout: Duration, retry_delay: Duration) -> Wait {
    let mut w = Wait::new().timeout(timeout).retry_delay(retry_delay);
    if let Some(msg) = message {
        w = w.message(msg);
    }
    w
}
