mod error;
mod inspector;
mod orchestrator;
mod phase;
mod retry;
mod scheduler;

pub use error::{recovery_instructions, FailureClass, RollbackFailure, UpdateError};
pub use inspector::{CommandVersionReader, VersionReader};
pub use orchestrator::{Collaborators, Orchestrator, UpdateOutcome, VersionStatus};
pub use phase::{Phase, PhaseFailure};
pub use retry::{RetryPolicy, Sleeper, ThreadSleeper};
pub use scheduler::{log_tick, Scheduler};
