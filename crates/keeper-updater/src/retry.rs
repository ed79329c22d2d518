use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use keeper_core::UpdateConfig;
use tracing::{debug, warn};

pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Fixed-delay polling: check, and between failed checks wait `delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &UpdateConfig) -> Self {
        Self {
            max_attempts: config.verify_attempts,
            delay: config.verify_delay(),
        }
    }

    /// Returns the attempt on which `check` first reported true. Check
    /// errors count as failed attempts; the last one is returned if no
    /// attempt succeeds.
    pub fn poll(
        &self,
        sleeper: &dyn Sleeper,
        mut check: impl FnMut(u32) -> Result<bool>,
    ) -> Result<u32> {
        let attempts = self.max_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match check(attempt) {
                Ok(true) => return Ok(attempt),
                Ok(false) => {
                    debug!(attempt, max_attempts = attempts, "condition not met yet");
                    last_error = None;
                }
                Err(err) => {
                    warn!(attempt, max_attempts = attempts, error = %format!("{err:#}"), "status check failed");
                    last_error = Some(err);
                }
            }
            if attempt < attempts {
                sleeper.sleep(self.delay);
            }
        }

        Err(match last_error {
            Some(err) => err.context(format!("still failing after {attempts} attempts")),
            None => anyhow!("condition not met after {attempts} attempts"),
        })
    }
}
