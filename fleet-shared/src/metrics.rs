use serde::{Deserialize, Serialize};

/// One telemetry sample. Memory and disk figures are bytes; network
/// figures are cumulative bytes since boot.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_used: u64,
    pub memory_total: u64,
    pub disk_percent: f64,
    pub disk_used: u64,
    pub disk_total: u64,
    pub network_sent: u64,
    pub network_recv: u64,
}
