// Configuration module for page-tracker
//
// Provides:
// - YAML configuration file loading
// - Environment variable substitution
// - Configuration validation
// - Default values
//
// The tracker core only ever sees a resolved `TrackerConfig`; reading files
// and the environment happens here, before activation.

pub mod types;
mod loader;

pub use types::*;
pub use loader::ConfigLoader;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<TrackerConfig> {
    ConfigLoader::load(path).context("Failed to load configuration")
}

/// Load configuration with environment variable overrides
///
/// Overrides are applied before validation, so a file without an api_key
/// can be completed from `TRACKER_API_KEY`.
pub fn load_config_with_env<P: AsRef<Path>>(path: P) -> Result<TrackerConfig> {
    load_config_with_overrides(path, None)
}

/// Like `load_config_with_env`, with an explicit api key (from the command
/// line) taking precedence over both the file and the environment
pub fn load_config_with_overrides<P: AsRef<Path>>(
    path: P,
    api_key: Option<String>,
) -> Result<TrackerConfig> {
    let content = std::fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
    let mut config = ConfigLoader::parse(&content).context("Failed to load configuration")?;

    if let Ok(api_key) = std::env::var("TRACKER_API_KEY") {
        config.tracker.api_key = api_key;
    }

    if let Ok(endpoint) = std::env::var("TRACKER_ENDPOINT") {
        config.tracker.endpoint = endpoint;
    }

    if let Some(api_key) = api_key {
        config.tracker.api_key = api_key;
    }

    ConfigLoader::validate(&config)?;
    Ok(config)
}
