use std::env;
use std::time::Duration;

use crate::error::{Result, RuntimeError};

/// Environment variable holding the number of processes.
pub const NPROC_ENV: &str = "TA_NPROC";
/// Environment variable holding the blocking-wait timeout in seconds.
pub const WAIT_TIMEOUT_ENV: &str = "TA_WAIT_TIMEOUT";

/// Default timeout for blocking waits and fences.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(900);

/// Process-group configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// Number of cooperating processes.
    pub nprocs: usize,
    /// How long a blocking wait may make no progress before the group aborts.
    pub wait_timeout: Duration,
    /// How long an idle process sleeps before re-checking its mailbox.
    pub idle_poll: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            nprocs: 1,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            idle_poll: Duration::from_millis(1),
        }
    }
}

impl RuntimeConfig {
    pub fn with_nprocs(nprocs: usize) -> Self {
        RuntimeConfig {
            nprocs,
            ..Default::default()
        }
    }

    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Build a configuration from `TA_NPROC` and `TA_WAIT_TIMEOUT`, falling
    /// back to the defaults for unset variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = RuntimeConfig::default();
        if let Some(v) = lookup(NPROC_ENV) {
            config.nprocs = v.trim().parse().map_err(|_| {
                RuntimeError::Config(format!("{}={:?} is not a process count", NPROC_ENV, v))
            })?;
        }
        if let Some(v) = lookup(WAIT_TIMEOUT_ENV) {
            let secs: u64 = v.trim().parse().map_err(|_| {
                RuntimeError::Config(format!("{}={:?} is not a number of seconds", WAIT_TIMEOUT_ENV, v))
            })?;
            config.wait_timeout = Duration::from_secs(secs);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.nprocs == 0 {
            return Err(RuntimeError::Config(
                "process group must have at least one process".to_string(),
            ));
        }
        if self.wait_timeout.is_zero() {
            return Err(RuntimeError::Config("wait timeout must be positive".to_string()));
        }
        Ok(())
    }
}
