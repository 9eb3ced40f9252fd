use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn default_arch() -> String {
    "unknown".to_string()
}

/// Host snapshot an agent reports in its `register` handshake.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct HostFacts {
    pub hostname: String,
    pub os: String,
    #[serde(default)]
    pub os_version: String,
    #[serde(default = "default_arch")]
    pub arch: String,
    #[serde(default)]
    pub cpu_count: usize,
    /// Total physical memory in bytes
    #[serde(default)]
    pub total_memory: u64,
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub mac_address: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MachineStatus {
    Online,
    Offline,
}

impl Display for MachineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MachineStatus::Online => write!(f, "online"),
            MachineStatus::Offline => write!(f, "offline"),
        }
    }
}

/// Persisted view of a managed machine. The registry, not this record,
/// is the source of truth for the live connection itself.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MachineRecord {
    pub id: String,
    #[serde(flatten)]
    pub facts: HostFacts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub status: MachineStatus,
    pub last_seen: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_facts_deserialize_with_defaults() {
        let json = r#"{ "hostname": "edge-01", "os": "linux" }"#;
        let facts: HostFacts = serde_json::from_str(json).unwrap();
        assert_eq!(facts.hostname, "edge-01");
        assert_eq!(facts.arch, "unknown");
        assert_eq!(facts.cpu_count, 0);
    }

    #[test]
    fn machine_status_uses_lowercase_tags() {
        assert_eq!(
            serde_json::to_string(&MachineStatus::Online).unwrap(),
            "\"online\""
        );
        let status: MachineStatus = serde_json::from_str("\"offline\"").unwrap();
        assert_eq!(status, MachineStatus::Offline);
    }
}
