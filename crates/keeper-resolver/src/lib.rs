mod cache;
mod platform;
mod report;
mod resolver;
mod strategy;
mod validate;

pub use cache::{CachedPath, PathCache};
pub use platform::{Platform, SearchEnvironment};
pub use report::{DetectionReport, StrategyFailure};
pub use resolver::{BinaryResolver, ResolvedBinary};
pub use strategy::{
    common_paths, default_strategies, CommonPathsStrategy, DetectionStrategy, PathSearchStrategy,
    ProcessEntry, ProcessTable, RunningProcessStrategy, ServiceConfigStrategy,
    SysinfoProcessTable,
};
pub use validate::validate_binary;

#[cfg(test)]
mod tests;
