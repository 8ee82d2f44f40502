use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::chain::SnapshotPolicy;

/// Process settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub symbols: SymbolsConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Symbol list location
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolsConfig {
    /// Newline-separated instrument names; no file means no instruments
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Upstream consumer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Wire protocol version as "major.minor"
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,

    /// Upper bound on a single feed poll (milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Maximum number of live cache entries
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            protocol_version: default_protocol_version(),
            poll_interval_ms: default_poll_interval_ms(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

/// Snapshot trigger settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Hour of day (0-23) that opens the snapshot window
    #[serde(default = "default_boundary_hour")]
    pub boundary_hour: u32,

    /// Field id carrying the time of last activity
    #[serde(default = "default_timestamp_field")]
    pub timestamp_field: u16,

    /// Delay after the window opens before the first scan
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,

    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,

    #[serde(default)]
    pub policy: SnapshotPolicy,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            boundary_hour: default_boundary_hour(),
            timestamp_field: default_timestamp_field(),
            grace_secs: default_grace_secs(),
            scan_interval_ms: default_scan_interval_ms(),
            policy: SnapshotPolicy::default(),
        }
    }
}

/// Downstream provider settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service id echoed on every response
    #[serde(default = "default_service_id")]
    pub service_id: u16,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Serve requests before the feed reports synchronisation
    #[serde(default)]
    pub accept_before_sync: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_id: default_service_id(),
            poll_interval_ms: default_poll_interval_ms(),
            accept_before_sync: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_protocol_version() -> String {
    "14.1".to_string()
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_cache_capacity() -> usize {
    65_536
}

fn default_boundary_hour() -> u32 {
    15
}

fn default_timestamp_field() -> u16 {
    5
}

fn default_grace_secs() -> u64 {
    60
}

fn default_scan_interval_ms() -> u64 {
    1_000
}

fn default_service_id() -> u16 {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}
