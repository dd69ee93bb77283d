// Configuration loader with environment variable substitution

use super::types::*;
use anyhow::{bail, Context, Result};
use regex::Regex;
use std::path::Path;

/// One year, keeping the timeout well inside `i64` milliseconds
const MAX_SESSION_TIMEOUT_MINUTES: u64 = 365 * 24 * 60;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file with environment variable substitution
    pub fn load<P: AsRef<Path>>(path: P) -> Result<TrackerConfig> {
        let content = std::fs::read_to_string(path.as_ref())
            .context("Failed to read config file")?;

        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<TrackerConfig> {
        let config = Self::parse(content)?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Substitute environment variables and parse, without validating
    pub(crate) fn parse(content: &str) -> Result<TrackerConfig> {
        let content = Self::substitute_env_vars(content)?;

        serde_yaml::from_str(&content).context("Failed to parse YAML configuration")
    }

    /// Substitute ${VAR} and ${VAR:-default} patterns with environment variables
    ///
    /// Examples:
    /// - ${HOME} -> /home/user
    /// - ${TRACKER_API_KEY:-dev-key} -> dev-key (if TRACKER_API_KEY not set)
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}")
            .context("Invalid substitution pattern")?;

        let substituted = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str());

            match std::env::var(var_name) {
                Ok(value) => value,
                Err(_) => match default_value {
                    Some(default) => default.to_string(),
                    // Keep original if no default and var not found
                    None => format!("${{{}}}", var_name),
                },
            }
        });

        Ok(substituted.into_owned())
    }

    /// Validate configuration
    pub(crate) fn validate(config: &TrackerConfig) -> Result<()> {
        let tracker = &config.tracker;

        if tracker.api_key.is_empty() || tracker.api_key.starts_with("${") {
            bail!("tracker.api_key must be set");
        }

        if tracker.endpoint.is_empty() {
            bail!("tracker.endpoint cannot be empty");
        }

        if tracker.flush_interval_ms == 0 {
            bail!("tracker.flush_interval_ms must be > 0");
        }

        if tracker.max_queue_size == 0 {
            bail!("tracker.max_queue_size must be > 0");
        }

        if tracker.session_timeout_minutes == 0 {
            bail!("tracker.session_timeout_minutes must be > 0");
        }

        if tracker.session_timeout_minutes > MAX_SESSION_TIMEOUT_MINUTES {
            bail!(
                "tracker.session_timeout_minutes must be <= {}",
                MAX_SESSION_TIMEOUT_MINUTES
            );
        }

        if tracker.activity_throttle_ms >= tracker.session_timeout_ms() as u64 {
            bail!(
                "tracker.activity_throttle_ms ({}) must be shorter than the session timeout",
                tracker.activity_throttle_ms
            );
        }

        match config.storage.backend.as_str() {
            "memory" => {}
            "filesystem" => {
                if config.storage.filesystem.is_none() {
                    bail!("filesystem backend selected but filesystem config missing");
                }
            }
            unknown => bail!(
                "Unknown backend: '{}'. Supported: memory, filesystem",
                unknown
            ),
        }

        if config.transport.beacon_max_bytes == 0 {
            bail!("transport.beacon_max_bytes must be > 0");
        }

        Ok(())
    }
}
