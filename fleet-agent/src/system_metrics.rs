use anyhow::Result;
use sysinfo::{Disks, Networks, System};

use fleet_shared::machine::HostFacts;
use fleet_shared::metrics::MetricsSnapshot;

/// Snapshot of the host identity sent in the registration handshake.
pub async fn collect_host_facts() -> Result<HostFacts> {
    let mut sys = System::new_all();
    sys.refresh_all();

    let (ip_address, mac_address) = primary_interface();

    Ok(HostFacts {
        hostname: System::host_name().unwrap_or_else(|| "unknown".into()),
        os: System::name().unwrap_or_else(|| "Unknown".into()),
        os_version: System::os_version().unwrap_or_default(),
        arch: std::env::consts::ARCH.to_string(),
        cpu_count: sys.cpus().len(),
        total_memory: sys.total_memory(),
        ip_address,
        mac_address,
    })
}

pub async fn collect_metrics() -> Result<MetricsSnapshot> {
    // Create the base system snapshot
    let mut sys = System::new_all();
    sys.refresh_all();

    // ---------- CPU ----------
    let cpu_percent = if sys.cpus().is_empty() {
        0.0
    } else {
        sys.cpus().iter().map(|c| c.cpu_usage() as f64).sum::<f64>() / sys.cpus().len() as f64
    };

    // ---------- Memory ----------
    let memory_total = sys.total_memory();
    let memory_used = sys.used_memory();
    let memory_percent = if memory_total == 0 {
        0.0
    } else {
        (memory_used as f64 / memory_total as f64) * 100.0
    };

    // ---------- Disks ----------
    let disks = Disks::new_with_refreshed_list();
    let mut disk_total = 0u64;
    let mut disk_used = 0u64;
    for disk in &disks {
        disk_total = disk_total.saturating_add(disk.total_space());
        disk_used = disk_used.saturating_add(disk.total_space() - disk.available_space());
    }
    let disk_percent = if disk_total == 0 {
        0.0
    } else {
        (disk_used as f64 / disk_total as f64) * 100.0
    };

    // ---------- Networks ----------
    let networks = Networks::new_with_refreshed_list();
    let mut network_sent = 0u64;
    let mut network_recv = 0u64;
    for (_, data) in &networks {
        network_sent = network_sent.saturating_add(data.total_transmitted());
        network_recv = network_recv.saturating_add(data.total_received());
    }

    Ok(MetricsSnapshot {
        cpu_percent,
        memory_percent,
        memory_used,
        memory_total,
        disk_percent,
        disk_used,
        disk_total,
        network_sent,
        network_recv,
    })
}

/// Address pair of the first non-loopback interface with an IPv4
/// address, falling back to loopback placeholders.
fn primary_interface() -> (String, String) {
    let networks = Networks::new_with_refreshed_list();
    for (_, data) in &networks {
        let ipv4 = data
            .ip_networks()
            .iter()
            .map(|network| network.addr)
            .find(|addr| addr.is_ipv4() && !addr.is_loopback());
        if let Some(addr) = ipv4 {
            return (addr.to_string(), data.mac_address().to_string());
        }
    }
    ("127.0.0.1".to_string(), "00:00:00:00:00:00".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn host_facts_have_an_identity() {
        let facts = collect_host_facts().await.unwrap();
        assert!(!facts.hostname.is_empty());
        assert!(!facts.arch.is_empty());
        assert!(facts.total_memory > 0, "memory total should be nonzero");
    }

    #[tokio::test]
    async fn metrics_percentages_are_sane() {
        let metrics = collect_metrics().await.unwrap();
        assert!(metrics.memory_percent >= 0.0 && metrics.memory_percent <= 100.0);
        assert!(metrics.disk_percent >= 0.0 && metrics.disk_percent <= 100.0);
        assert!(metrics.memory_total >= metrics.memory_used);
    }
}
