//! Registry configuration.
//!
//! The only tunable is the grace period: how long an entity whose last
//! reference was released stays alive waiting for someone to reacquire it.
//! Configs can be built in code or parsed from JSON, with missing fields
//! falling back to the defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShelfError};

/// Default grace period before an unreferenced entity is destroyed.
pub const DEFAULT_GRACE_PERIOD_MS: u64 = 20;

/// Upper bound on the grace period. Longer values keep abandoned entities
/// (and their sync-client listeners) alive far past any remount.
pub const MAX_GRACE_PERIOD_MS: u64 = 60_000;

/// Configuration for a [`Registry`](crate::Registry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    /// Delay between the reference count reaching zero and destruction.
    pub grace_period_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
        }
    }
}

impl RegistryConfig {
    /// Config with the given grace period, truncated to whole milliseconds.
    pub fn with_grace_period(grace_period: Duration) -> Self {
        Self {
            grace_period_ms: u64::try_from(grace_period.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Parse and validate a JSON config.
    pub fn from_json(source: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.grace_period_ms > MAX_GRACE_PERIOD_MS {
            return Err(ShelfError::InvalidConfig(format!(
                "grace_period_ms must be at most {MAX_GRACE_PERIOD_MS}, got {}",
                self.grace_period_ms
            )));
        }
        Ok(())
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}
