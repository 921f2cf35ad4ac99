//! Client configuration, loaded from JSON with every field defaulted.

use std::fs;
use std::path::Path;

use hopline_core::{AggregatorConfig, LATE_EVENT_GRACE_MS};
use serde::{Deserialize, Serialize};

use crate::chain::ChainConfig;
use crate::error::ConfigError;
use crate::retry::RetryPolicy;

/// Host-side settings for a game client.
///
/// Every field is optional in the JSON form; missing fields take their
/// defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientConfig {
    /// How long after a session ends its late events are still recognized.
    pub late_event_grace_ms: u64,
    /// Keep a replayable journal of every finished session.
    pub record_journals: bool,
    pub chain: ChainConfig,
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            late_event_grace_ms: LATE_EVENT_GRACE_MS,
            record_journals: false,
            chain: ChainConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Load settings from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn aggregator(&self) -> AggregatorConfig {
        AggregatorConfig {
            late_event_grace_ms: self.late_event_grace_ms,
        }
    }
}
