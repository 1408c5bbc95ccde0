use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Result;

pub const DEFAULT_INITIAL_CAPACITY: usize = 2 * 1024;
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 60_000;

/// Tunables of a [`BufferedTransferStream`](crate::BufferedTransferStream).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Capacity of the buffer allocated when the stream is created.
    pub initial_capacity: usize,
    /// Upper bound for buffer growth. Reaching it is handled the same
    /// way as a failed allocation: reads get shorter, nothing aborts.
    pub max_capacity: Option<usize>,
    /// How long a single readiness wait may block.
    pub wait_timeout_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            max_capacity: None,
            wait_timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
        }
    }
}

impl StreamConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a config from a JSON file, missing fields take their defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        log::debug!("config: loaded {}", path.as_ref().display());
        Ok(serde_json::from_slice(&bytes)?)
    }
}
