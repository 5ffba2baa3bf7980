//! Configuration management for Georoute
//!
//! Parses TOML configuration files and provides typed access to settings.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Operating mode (static hash routing vs dynamic health-aware routing)
    #[serde(default)]
    pub mode: Mode,
    pub server: ServerConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub static_pool: StaticPoolConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Operating mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Deterministic hash routing over a fixed manifest, no health awareness
    #[default]
    Static,
    /// Registration-driven routing with health checks, sessions and failover
    Dynamic,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest inbound request body accepted for forwarding, in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

/// Outbound timeout configuration
///
/// The effective forwarding deadline for a node is `forward_base_ms` plus the
/// node's fixed region latency.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_forward_base_ms")]
    pub forward_base_ms: u64,
    #[serde(default = "default_probe_ms")]
    pub probe_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            forward_base_ms: default_forward_base_ms(),
            probe_ms: default_probe_ms(),
        }
    }
}

fn default_forward_base_ms() -> u64 {
    2000
}

fn default_probe_ms() -> u64 {
    5000
}

impl TimeoutsConfig {
    /// Probe timeout as a Duration
    pub fn probe(&self) -> Duration {
        Duration::from_millis(self.probe_ms)
    }
}

/// Health monitor configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthConfig {
    /// Seconds between health-check sweeps
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: default_probe_interval_secs(),
        }
    }
}

fn default_probe_interval_secs() -> u64 {
    10
}

/// Static mode configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StaticPoolConfig {
    /// Path to the JSON node manifest consumed in static mode
    #[serde(default = "default_manifest")]
    pub manifest: String,
}

impl Default for StaticPoolConfig {
    fn default() -> Self {
        Self {
            manifest: default_manifest(),
        }
    }
}

fn default_manifest() -> String {
    "servers.json".to_string()
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file and validate it
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&raw)
            .map_err(|e| AppError::Config(format!("failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate settings that serde alone cannot express
    pub fn validate(&self) -> AppResult<()> {
        if self.server.host.parse::<std::net::IpAddr>().is_err() {
            return Err(AppError::Config(format!(
                "server.host {:?} is not a valid IP address",
                self.server.host
            )));
        }
        if self.server.max_body_bytes == 0 {
            return Err(AppError::Config(
                "server.max_body_bytes must be greater than 0".to_string(),
            ));
        }
        if self.timeouts.forward_base_ms == 0 {
            return Err(AppError::Config(
                "timeouts.forward_base_ms must be greater than 0".to_string(),
            ));
        }
        if self.timeouts.probe_ms == 0 {
            return Err(AppError::Config(
                "timeouts.probe_ms must be greater than 0".to_string(),
            ));
        }
        if self.health.probe_interval_secs == 0 {
            return Err(AppError::Config(
                "health.probe_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.mode == Mode::Static && self.static_pool.manifest.trim().is_empty() {
            return Err(AppError::Config(
                "static_pool.manifest is required in static mode".to_string(),
            ));
        }
        Ok(())
    }
}
