use crate::{time::duration_ms, Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default lease length written into a lock row (30 seconds)
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(30);

/// Default sleep between acquisition attempts
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(15);

/// Default overall wait for a blocking acquire (1000 polls of 15ms)
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_millis(15_000);

/// Tunables for a [`LeaseLock`](crate::LeaseLock)
///
/// Serialized with millisecond fields so it can be loaded from a small JSON
/// file; any missing field falls back to its default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub lease_duration_ms: u64,
    pub poll_interval_ms: u64,
    pub acquire_timeout_ms: u64,
    /// Flush every held lock when the process receives Ctrl-C
    pub release_on_ctrl_c: bool,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease_duration_ms: duration_ms(DEFAULT_LEASE_DURATION),
            poll_interval_ms: duration_ms(DEFAULT_POLL_INTERVAL),
            acquire_timeout_ms: duration_ms(DEFAULT_ACQUIRE_TIMEOUT),
            release_on_ctrl_c: false,
        }
    }
}

impl LockConfig {
    /// Load from a JSON file and validate
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: LockConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.lease_duration_ms == 0 {
            return Err(Error::Config("lease_duration_ms must be positive".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_millis(self.lease_duration_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    #[must_use]
    pub fn with_lease_duration(mut self, lease: Duration) -> Self {
        self.lease_duration_ms = duration_ms(lease);
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = duration_ms(interval);
        self
    }

    #[must_use]
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout_ms = duration_ms(timeout);
        self
    }

    #[must_use]
    pub fn with_release_on_ctrl_c(mut self, enabled: bool) -> Self {
        self.release_on_ctrl_c = enabled;
        self
    }
}
