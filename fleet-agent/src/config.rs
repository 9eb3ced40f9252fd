use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, time::Duration};
use tracing::{info, warn};
use uuid::Uuid;

fn default_server_url() -> String {
    "ws://localhost:3000/ws".to_string()
}
fn default_heartbeat_interval() -> u64 {
    30
}
fn default_metrics_interval() -> u64 {
    60
}
fn default_reconnect_base() -> u64 {
    5
}
fn default_reconnect_cap() -> u64 {
    60
}
fn default_max_reconnect_attempts() -> u32 {
    10
}
fn default_log_level() -> String {
    "info".to_string()
}
fn generate_machine_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Stable identity this machine registers under. Generated once and
    /// persisted with the config so reinstalls keep their history.
    #[serde(default = "generate_machine_id")]
    pub machine_id: String,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,
    #[serde(default = "default_reconnect_base")]
    pub reconnect_base_secs: u64,
    #[serde(default = "default_reconnect_cap")]
    pub reconnect_cap_secs: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            machine_id: generate_machine_id(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            metrics_interval_secs: default_metrics_interval(),
            reconnect_base_secs: default_reconnect_base(),
            reconnect_cap_secs: default_reconnect_cap(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_file_path()?;

        if config_path.exists() {
            let contents =
                fs::read_to_string(&config_path).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            Ok(config)
        } else {
            warn!("Config file not found, using defaults");
            let config = Self::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_file_path()?;
        let config_dir = config_path
            .parent()
            .context("Failed to get config directory")?;

        fs::create_dir_all(config_dir).context("Failed to create config directory")?;

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&config_path, contents).context("Failed to write config file")?;

        info!("Config saved to: {:?}", config_path);
        Ok(())
    }

    pub fn config_file_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Failed to get config directory")?;
        Ok(config_dir.join("fleet-agent").join("config.json"))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_secs)
    }

    pub fn reconnect_base(&self) -> Duration {
        Duration::from_secs(self.reconnect_base_secs)
    }

    pub fn reconnect_cap(&self) -> Duration {
        Duration::from_secs(self.reconnect_cap_secs)
    }

    /// Connection URL carrying the role and machine identity.
    pub fn websocket_url(&self) -> String {
        format!(
            "{}?role=agent&machineId={}",
            self.server_url, self.machine_id
        )
    }
}
