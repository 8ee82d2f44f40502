pub mod types;

pub use types::*;

use anyhow::{Context, Result};
use config::{Config as ConfigLoader, Environment, File};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::core::ProtocolVersion;
use crate::trigger::TriggerPolicy;

impl Settings {
    /// Load settings: defaults, then the optional TOML file, then `CHAINSNAP__*` variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ConfigLoader::builder()
            .set_default("feed.protocol_version", "14.1")?
            .set_default("feed.poll_interval_ms", 100)?
            .set_default("feed.cache_capacity", 65_536)?
            .set_default("trigger.boundary_hour", 15)?
            .set_default("trigger.timestamp_field", 5)?
            .set_default("trigger.grace_secs", 60)?
            .set_default("trigger.scan_interval_ms", 1_000)?
            .set_default("trigger.policy", "continuous")?
            .set_default("service.service_id", 1)?
            .set_default("service.poll_interval_ms", 100)?
            .set_default("service.accept_before_sync", false)?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        let loaded = builder
            .add_source(
                Environment::with_prefix("CHAINSNAP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let settings: Settings = loaded
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        self.protocol()?;

        if self.trigger.boundary_hour > 23 {
            anyhow::bail!(
                "trigger.boundary_hour must be within 0-23, got {}",
                self.trigger.boundary_hour
            );
        }
        if self.trigger.scan_interval_ms == 0 {
            anyhow::bail!("trigger.scan_interval_ms must be positive");
        }
        if self.feed.poll_interval_ms == 0 || self.service.poll_interval_ms == 0 {
            anyhow::bail!("poll intervals must be positive");
        }
        if self.feed.cache_capacity == 0 {
            anyhow::bail!("feed.cache_capacity must be positive");
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.as_str()) {
            anyhow::bail!(
                "Invalid log level '{}', must be one of: {:?}",
                self.logging.level,
                valid_log_levels
            );
        }

        Ok(())
    }

    /// Parsed `feed.protocol_version`
    pub fn protocol(&self) -> Result<ProtocolVersion> {
        let raw = self.feed.protocol_version.trim();
        let (major, minor) = raw
            .split_once('.')
            .with_context(|| format!("protocol version '{}' is not major.minor", raw))?;
        let major = major
            .parse()
            .with_context(|| format!("invalid protocol major version '{}'", major))?;
        let minor = minor
            .parse()
            .with_context(|| format!("invalid protocol minor version '{}'", minor))?;
        Ok(ProtocolVersion::new(major, minor))
    }

    pub fn trigger_policy(&self) -> TriggerPolicy {
        TriggerPolicy {
            boundary_hour: self.trigger.boundary_hour,
            timestamp_field: self.trigger.timestamp_field,
            grace: Duration::from_secs(self.trigger.grace_secs),
            scan_interval: Duration::from_millis(self.trigger.scan_interval_ms),
        }
    }

    pub fn feed_poll_interval(&self) -> Duration {
        Duration::from_millis(self.feed.poll_interval_ms)
    }

    pub fn service_poll_interval(&self) -> Duration {
        Duration::from_millis(self.service.poll_interval_ms)
    }
}

/// Read the instrument list
///
/// No path or a missing file yields a warning and an empty list; any other
/// read failure is an error.
pub fn load_symbols(path: Option<&Path>) -> Result<Vec<String>> {
    let Some(path) = path else {
        warn!("No symbol file provided.");
        return Ok(Vec::new());
    };
    if !path.exists() {
        warn!(path = %path.display(), "Symbol file not found.");
        return Ok(Vec::new());
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read symbol file {}", path.display()))?;
    let symbols = parse_symbols(&contents);
    info!(entries = symbols.len(), "Symbol set loaded");
    Ok(symbols)
}

/// Newline-separated names, surrounding whitespace trimmed, blank lines dropped
pub fn parse_symbols(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::SnapshotPolicy;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.protocol().unwrap(), ProtocolVersion::CURRENT);
        assert_eq!(settings.trigger_policy(), TriggerPolicy::default());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.trigger.boundary_hour = 24;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.feed.protocol_version = "fourteen".to_string();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.logging.level = "loud".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_from_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[trigger]\nboundary_hour = 16\npolicy = \"at_trigger\"\n\n[service]\naccept_before_sync = true"
        )
        .unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.trigger.boundary_hour, 16);
        assert_eq!(settings.trigger.policy, SnapshotPolicy::AtTrigger);
        assert!(settings.service.accept_before_sync);
        assert_eq!(settings.trigger.grace_secs, 60);
    }

    #[test]
    fn test_parse_symbols() {
        let symbols = parse_symbols("  FOO \n\n\tBAR\n   \nBAZ");
        assert_eq!(symbols, vec!["FOO", "BAR", "BAZ"]);
    }

    #[test]
    fn test_missing_symbol_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let symbols = load_symbols(Some(&dir.path().join("absent.txt"))).unwrap();
        assert!(symbols.is_empty());
        assert!(load_symbols(None).unwrap().is_empty());
    }

    #[test]
    fn test_load_symbols_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "FOO\nBAR\n").unwrap();
        assert_eq!(load_symbols(Some(file.path())).unwrap(), vec!["FOO", "BAR"]);
    }
}
