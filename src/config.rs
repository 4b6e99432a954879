// src/config.rs

//! Top-level configuration, loaded from a YAML file (default `main.yaml`).
//! Follows a two-stage pattern: deserialize into `RawConfig`, where every
//! field has a sane default, then `validate()` into the `Config` the rest
//! of the crate actually uses, rejecting combinations that parse fine but
//! don't make sense (e.g. a zero guild id).

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::HostctlError;

fn default_udp_listen() -> String {
    "0.0.0.0:10308".to_string()
}

fn default_metrics_port() -> u16 {
    9091
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_directory() -> String {
    "logs".to_string()
}

fn default_heartbeat() -> Duration {
    Duration::from_secs(30)
}

fn default_file_reap_age() -> Duration {
    Duration::from_secs(300)
}

fn default_true() -> bool {
    true
}

fn default_dcs_executable() -> String {
    "DCS_server.exe".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawMetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for RawMetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawLogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_directory")]
    pub directory: String,
    #[serde(default = "default_true")]
    pub rotate_daily: bool,
}

impl Default for RawLogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: default_log_directory(),
            rotate_daily: true,
        }
    }
}

/// The as-deserialized shape, before cross-field validation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    pub guild_id: i64,
    pub node_name: String,
    pub database_url: String,
    pub public_ip: String,
    #[serde(default = "default_udp_listen")]
    pub udp_listen_address: String,
    #[serde(default)]
    pub preferred_master: bool,
    #[serde(default)]
    pub slow_system: bool,
    /// Accepts humantime strings ("30s", "2m") as well as bare numbers of seconds.
    #[serde(default = "default_heartbeat", with = "humantime_serde")]
    pub heartbeat: Duration,
    #[serde(default = "default_file_reap_age", with = "humantime_serde")]
    pub file_reap_age: Duration,
    #[serde(default)]
    pub metrics: RawMetricsConfig,
    #[serde(default)]
    pub log: RawLogConfig,
    #[serde(default)]
    pub schedules_path: Option<String>,
    /// Executable launched by the lifecycle orchestrator's startup sequence;
    /// resolved relative to each host's instance directory at spawn time.
    #[serde(default = "default_dcs_executable")]
    pub dcs_executable: String,
}

/// The validated configuration actually handed to the rest of the crate.
#[derive(Debug, Clone)]
pub struct Config {
    pub guild_id: i64,
    pub node_name: String,
    pub database_url: String,
    pub public_ip: String,
    pub udp_listen_address: String,
    pub preferred_master: bool,
    pub slow_system: bool,
    pub heartbeat: Duration,
    pub file_reap_age: Duration,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
    pub log_level: String,
    pub log_directory: String,
    pub log_rotate_daily: bool,
    pub schedules_path: Option<String>,
    pub dcs_executable: String,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, HostctlError> {
        let raw_text = fs::read_to_string(path.as_ref())
            .map_err(|e| HostctlError::Config(format!("reading {}: {e}", path.as_ref().display())))?;
        let raw: RawConfig = serde_yaml::from_str(&raw_text)
            .map_err(|e| HostctlError::Config(format!("parsing {}: {e}", path.as_ref().display())))?;
        Self::validate(raw)
    }

    fn validate(raw: RawConfig) -> Result<Self, HostctlError> {
        if raw.guild_id == 0 {
            return Err(HostctlError::Config("guild_id must be non-zero".into()));
        }
        if raw.node_name.trim().is_empty() {
            return Err(HostctlError::Config("node_name must not be empty".into()));
        }
        if raw.database_url.trim().is_empty() {
            return Err(HostctlError::Config("database_url must not be empty".into()));
        }
        raw.udp_listen_address
            .parse::<std::net::SocketAddr>()
            .map_err(|e| HostctlError::Config(format!("invalid udp_listen_address: {e}")))?;
        if raw.heartbeat.is_zero() {
            return Err(HostctlError::Config("heartbeat must be non-zero".into()));
        }

        Ok(Config {
            guild_id: raw.guild_id,
            node_name: raw.node_name,
            database_url: raw.database_url,
            public_ip: raw.public_ip,
            udp_listen_address: raw.udp_listen_address,
            preferred_master: raw.preferred_master,
            slow_system: raw.slow_system,
            heartbeat: raw.heartbeat,
            file_reap_age: raw.file_reap_age,
            metrics_enabled: raw.metrics.enabled,
            metrics_port: raw.metrics.port,
            log_level: raw.log.level,
            log_directory: raw.log.directory,
            log_rotate_daily: raw.log.rotate_daily,
            schedules_path: raw.schedules_path,
            dcs_executable: raw.dcs_executable,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_raw() -> RawConfig {
        RawConfig {
            guild_id: 1,
            node_name: "node1".into(),
            database_url: "postgres://localhost/hostctl".into(),
            public_ip: "127.0.0.1".into(),
            udp_listen_address: default_udp_listen(),
            preferred_master: false,
            slow_system: false,
            heartbeat: default_heartbeat(),
            file_reap_age: default_file_reap_age(),
            metrics: RawMetricsConfig::default(),
            log: RawLogConfig::default(),
            schedules_path: None,
            dcs_executable: default_dcs_executable(),
        }
    }

    #[test]
    fn rejects_zero_guild_id() {
        let mut raw = minimal_raw();
        raw.guild_id = 0;
        assert!(Config::validate(raw).is_err());
    }

    #[test]
    fn rejects_empty_node_name() {
        let mut raw = minimal_raw();
        raw.node_name = "  ".into();
        assert!(Config::validate(raw).is_err());
    }

    #[test]
    fn accepts_minimal_config() {
        assert!(Config::validate(minimal_raw()).is_ok());
    }

    #[test]
    fn parses_humantime_heartbeat() {
        let yaml = r#"
guild_id: 1
node_name: node1
database_url: "postgres://localhost/hostctl"
public_ip: "127.0.0.1"
heartbeat: "45s"
"#;
        let raw: RawConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(raw.heartbeat, Duration::from_secs(45));
    }
}
