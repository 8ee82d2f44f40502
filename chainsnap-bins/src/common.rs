//! Common utilities for all binaries
//!
//! Shared initialization and CLI parsing.

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use chainsnap_core::config::Settings;
use chainsnap_core::utils::try_init_logger;
use clap::Parser;

/// Common CLI arguments for all binaries
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CommonArgs {
    /// TOML settings file (defaults and CHAINSNAP__* variables apply without one)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Symbol list, one instrument per line (overrides `symbols.path`)
    #[arg(short, long)]
    pub symbols: Option<PathBuf>,

    /// Log level or filter directive (overrides `logging.level`)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Emit JSON log lines
    #[arg(long)]
    pub json: bool,

    /// Print the Prometheus metrics at shutdown
    #[arg(long)]
    pub metrics: bool,
}

impl CommonArgs {
    /// Load settings and apply command-line overrides
    pub fn settings(&self) -> Result<Settings> {
        let mut settings = Settings::load(self.config.as_deref())?;
        if let Some(path) = &self.symbols {
            settings.symbols.path = Some(path.clone());
        }
        if let Some(level) = &self.log_level {
            settings.logging.level = level.clone();
        }
        if self.json {
            settings.logging.json = true;
        }
        Ok(settings)
    }
}

/// Initialize tracing/logging
pub fn init_logging(settings: &Settings) -> Result<()> {
    try_init_logger(&settings.logging.level, settings.logging.json)
        .map_err(|e| anyhow!("failed to initialize logging: {}", e))
}
