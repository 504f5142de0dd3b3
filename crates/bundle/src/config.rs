//! Cache configuration types

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for a [`BundleManager`](crate::BundleManager).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Number of slots the dedup table reserves up front.
    pub initial_capacity: usize,
    /// How many lifecycle events may queue before slow subscribers lag.
    pub event_buffer: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 2 << 10,
            event_buffer: 256,
        }
    }
}

impl CacheConfig {
    /// Validate the configuration, returning an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.event_buffer == 0 {
            return Err(Error::configuration("event_buffer must be greater than 0"));
        }
        Ok(())
    }
}
