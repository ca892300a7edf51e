//! Engine Configuration
//!
//! Timer periods, the peer roster anchor and channel sizing. Loadable from
//! YAML; every field falls back to its default when omitted.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Anchor whose linked identities form the peer roster
pub const DEFAULT_PEER_ANCHOR: &str = "SYNC_ENGINE_ALL_PEERS";

/// Configuration for the sync engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine-wide batched poll period in seconds
    pub poll_interval_secs: u64,
    /// Per-node refresh period while subscribed, in seconds
    pub node_refresh_interval_secs: u64,
    /// Delay before confirming a signal's writes, in milliseconds
    pub confirmation_delay_ms: u64,
    pub peer_anchor: String,
    /// Capacity of the inbound signal channel
    pub signal_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            node_refresh_interval_secs: 10,
            confirmation_delay_ms: 100,
            peer_anchor: DEFAULT_PEER_ANCHOR.to_string(),
            signal_channel_capacity: 1024,
        }
    }
}

impl EngineConfig {
    /// Load from a YAML file and validate
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(Error::Configuration(
                "poll_interval_secs must be positive".into(),
            ));
        }
        if self.node_refresh_interval_secs == 0 {
            return Err(Error::Configuration(
                "node_refresh_interval_secs must be positive".into(),
            ));
        }
        if self.peer_anchor.is_empty() {
            return Err(Error::Configuration("peer_anchor must not be empty".into()));
        }
        if self.signal_channel_capacity == 0 {
            return Err(Error::Configuration(
                "signal_channel_capacity must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn node_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.node_refresh_interval_secs)
    }

    pub fn confirmation_delay(&self) -> Duration {
        Duration::from_millis(self.confirmation_delay_ms)
    }
}
