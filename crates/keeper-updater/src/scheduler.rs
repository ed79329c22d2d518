use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::{FailureClass, Orchestrator, Sleeper, UpdateError, UpdateOutcome};

/// Fixed-interval loop around [`Orchestrator::check_and_update`]. Ticks never
/// overlap; each one runs to completion, rollback included.
pub struct Scheduler {
    orchestrator: Orchestrator,
    interval: Duration,
    sleeper: Arc<dyn Sleeper>,
}

impl Scheduler {
    pub fn new(orchestrator: Orchestrator, interval: Duration, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            orchestrator,
            interval,
            sleeper,
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn tick(&mut self) -> Result<UpdateOutcome, UpdateError> {
        let result = self.orchestrator.check_and_update();
        log_tick(&result);
        result
    }

    /// Runs until `max_ticks` ticks have completed, or forever when `None`.
    pub fn run(&mut self, max_ticks: Option<u64>) -> u64 {
        info!(
            interval_secs = self.interval.as_secs(),
            "starting update loop"
        );
        let mut completed = 0_u64;
        loop {
            let _ = self.tick();
            completed += 1;
            if max_ticks.is_some_and(|max| completed >= max) {
                return completed;
            }
            self.sleeper.sleep(self.interval);
        }
    }
}

pub fn log_tick(result: &Result<UpdateOutcome, UpdateError>) {
    match result {
        Ok(UpdateOutcome::UpToDate { version }) => {
            info!(version = %version, "update check complete; no update needed");
        }
        Ok(UpdateOutcome::Updated { from, to, binary_path }) => {
            info!(from = %from, to = %to, binary = %binary_path.display(), "agent updated");
        }
        Err(err) => match err.class() {
            FailureClass::Transient => {
                warn!(error = %err, "update check failed; will retry on next tick");
            }
            FailureClass::RolledBack => {
                error!(error = %err, "update failed and was rolled back");
            }
            FailureClass::Critical => {
                if let UpdateError::Critical { recovery, .. } = err {
                    error!(error = %err, "CRITICAL: agent may be down\n{recovery}");
                } else {
                    error!(error = %err, "CRITICAL: agent may be down");
                }
            }
        },
    }
}
