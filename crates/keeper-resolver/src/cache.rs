use std::path::PathBuf;

use chrono::{DateTime, Utc};
use keeper_core::DetectionMethod;
use parking_lot::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPath {
    pub path: PathBuf,
    pub method: DetectionMethod,
    pub validated_at: DateTime<Utc>,
}

/// Last validated binary location, shared by every resolver consumer.
#[derive(Debug, Default)]
pub struct PathCache {
    entry: RwLock<Option<CachedPath>>,
}

impl PathCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<CachedPath> {
        self.entry.read().clone()
    }

    pub fn store(&self, path: PathBuf, method: DetectionMethod) {
        *self.entry.write() = Some(CachedPath {
            path,
            method,
            validated_at: Utc::now(),
        });
    }

    pub fn invalidate(&self) -> Option<CachedPath> {
        self.entry.write().take()
    }
}
