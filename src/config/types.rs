// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Configuration types for page-tracker

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TrackerConfig {
    pub tracker: TrackerSettings,
    #[serde(default)]
    pub collectors: CollectorToggles,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Core delivery and session settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrackerSettings {
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_flush_interval")]
    pub flush_interval_ms: u64,

    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    #[serde(default = "default_session_timeout")]
    pub session_timeout_minutes: u64,

    /// Minimum spacing between session-activity writes
    #[serde(default = "default_activity_throttle")]
    pub activity_throttle_ms: u64,

    /// 0 disables the periodic time-on-page report
    #[serde(default = "default_time_on_page_report")]
    pub time_on_page_report_ms: u64,

    #[serde(default)]
    pub debug: bool,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: default_endpoint(),
            flush_interval_ms: default_flush_interval(),
            max_queue_size: default_max_queue_size(),
            session_timeout_minutes: default_session_timeout(),
            activity_throttle_ms: default_activity_throttle(),
            time_on_page_report_ms: default_time_on_page_report(),
            debug: false,
        }
    }
}

impl TrackerSettings {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn session_timeout_ms(&self) -> i64 {
        self.session_timeout_minutes
            .saturating_mul(60 * 1000)
            .min(i64::MAX as u64) as i64
    }

    pub fn time_on_page_report_interval(&self) -> Option<Duration> {
        (self.time_on_page_report_ms > 0).then(|| Duration::from_millis(self.time_on_page_report_ms))
    }
}

/// Per-collector enable flags
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CollectorToggles {
    pub session_replay: bool,
    pub device: bool,
    pub connection: bool,
    pub location: bool,
    pub performance: bool,
    pub battery: bool,
    pub orientation: bool,
    pub motion: bool,
    pub time_on_page: bool,
    pub permissions: bool,
    pub clicks: bool,
    pub visibility: bool,
}

impl Default for CollectorToggles {
    fn default() -> Self {
        Self {
            session_replay: true,
            device: true,
            connection: true,
            location: false,
            performance: true,
            battery: true,
            orientation: true,
            motion: false,
            time_on_page: true,
            permissions: false,
            clicks: true,
            visibility: true,
        }
    }
}

impl CollectorToggles {
    /// Whether the collector registered under `name` may be started.
    /// Names outside the known set are always enabled.
    pub fn is_enabled(&self, name: &str) -> bool {
        match name {
            "session_replay" | "rrweb" => self.session_replay,
            "device" => self.device,
            "connection" => self.connection,
            "location" => self.location,
            "performance" => self.performance,
            "battery" => self.battery,
            "orientation" => self.orientation,
            "motion" => self.motion,
            "time_on_page" => self.time_on_page,
            "permissions" => self.permissions,
            "click" | "clicks" => self.clicks,
            "visibility" => self.visibility,
            _ => true,
        }
    }
}

/// Storage configuration with backend selection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Backend type: "memory" or "filesystem"
    pub backend: String,

    #[serde(default)]
    pub filesystem: Option<FilesystemConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "filesystem".to_string(),
            filesystem: Some(FilesystemConfig::default()),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FilesystemConfig {
    pub base_path: String,
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            base_path: "/var/lib/page-tracker".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    #[serde(default = "default_transport_timeout")]
    pub timeout_seconds: u64,

    /// Largest body the unload transport will accept
    #[serde(default = "default_beacon_max_bytes")]
    pub beacon_max_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_transport_timeout(),
            beacon_max_bytes: default_beacon_max_bytes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default value functions
fn default_endpoint() -> String { "/events".to_string() }
fn default_flush_interval() -> u64 { 3000 }
fn default_max_queue_size() -> usize { 1000 }
fn default_session_timeout() -> u64 { 30 }
fn default_activity_throttle() -> u64 { 1000 }
fn default_time_on_page_report() -> u64 { 30_000 }
fn default_transport_timeout() -> u64 { 30 }
fn default_beacon_max_bytes() -> usize { 64 * 1024 }
fn default_log_level() -> String { "info".to_string() }
