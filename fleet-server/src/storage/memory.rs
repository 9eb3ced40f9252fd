use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use fleet_shared::command::{CommandRecord, CommandStatus};
use fleet_shared::logs::LogEntry;
use fleet_shared::machine::{HostFacts, MachineRecord, MachineStatus};
use fleet_shared::metrics::MetricsSnapshot;
use fleet_shared::packages::PackageInfo;

use crate::response::{ServerError, ServerResult};
use crate::storage::Storage;

/// In-process storage backend. Good enough for a single-node control
/// plane and for tests; anything durable replaces this behind the same
/// trait.
#[derive(Default)]
pub struct MemoryStorage {
    machines: RwLock<HashMap<String, MachineRecord>>,
    commands: RwLock<HashMap<String, CommandRecord>>,
    metrics: RwLock<HashMap<String, Vec<MetricsSnapshot>>>,
    logs: RwLock<HashMap<String, Vec<LogEntry>>>,
    packages: RwLock<HashMap<String, Vec<PackageInfo>>>,
}

impl MemoryStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn metrics_count(&self, machine_id: &str) -> usize {
        self.metrics
            .read()
            .await
            .get(machine_id)
            .map(|samples| samples.len())
            .unwrap_or(0)
    }

    pub async fn packages_for(&self, machine_id: &str) -> Vec<PackageInfo> {
        self.packages
            .read()
            .await
            .get(machine_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn register_machine(&self, id: &str, facts: HostFacts) -> ServerResult<MachineRecord> {
        let mut machines = self.machines.write().await;
        let now = Utc::now();
        let record = match machines.get(id) {
            Some(existing) => MachineRecord {
                id: id.to_string(),
                facts,
                group_id: existing.group_id.clone(),
                status: MachineStatus::Online,
                last_seen: now,
                created_at: existing.created_at,
            },
            None => MachineRecord {
                id: id.to_string(),
                facts,
                group_id: None,
                status: MachineStatus::Online,
                last_seen: now,
                created_at: now,
            },
        };
        machines.insert(id.to_string(), record.clone());
        Ok(record)
    }

    async fn update_machine_status(&self, id: &str, status: MachineStatus) -> ServerResult<()> {
        let mut machines = self.machines.write().await;
        if let Some(record) = machines.get_mut(id) {
            record.status = status;
            record.last_seen = Utc::now();
        }
        Ok(())
    }

    async fn get_machine(&self, id: &str) -> ServerResult<Option<MachineRecord>> {
        Ok(self.machines.read().await.get(id).cloned())
    }

    async fn assign_group(&self, machine_id: &str, group_id: Option<String>) -> ServerResult<()> {
        let mut machines = self.machines.write().await;
        let record = machines
            .get_mut(machine_id)
            .ok_or_else(|| ServerError::not_found("machine not found"))?;
        record.group_id = group_id;
        Ok(())
    }

    async fn machines_in_group(&self, group_id: &str) -> ServerResult<Vec<String>> {
        let machines = self.machines.read().await;
        Ok(machines
            .values()
            .filter(|record| record.group_id.as_deref() == Some(group_id))
            .map(|record| record.id.clone())
            .collect())
    }

    async fn save_metrics(&self, machine_id: &str, sample: MetricsSnapshot) -> ServerResult<()> {
        self.metrics
            .write()
            .await
            .entry(machine_id.to_string())
            .or_default()
            .push(sample);
        Ok(())
    }

    async fn save_logs(&self, machine_id: &str, entries: Vec<LogEntry>) -> ServerResult<()> {
        self.logs
            .write()
            .await
            .entry(machine_id.to_string())
            .or_default()
            .extend(entries);
        Ok(())
    }

    async fn replace_packages(
        &self,
        machine_id: &str,
        packages: Vec<PackageInfo>,
    ) -> ServerResult<()> {
        self.packages
            .write()
            .await
            .insert(machine_id.to_string(), packages);
        Ok(())
    }

    async fn create_command(&self, record: CommandRecord) -> ServerResult<()> {
        self.commands
            .write()
            .await
            .insert(record.id.clone(), record);
        Ok(())
    }

    async fn get_command(&self, id: &str) -> ServerResult<Option<CommandRecord>> {
        Ok(self.commands.read().await.get(id).cloned())
    }

    async fn apply_command_result(
        &self,
        id: &str,
        status: CommandStatus,
        output: Option<String>,
        error: Option<String>,
    ) -> ServerResult<Option<CommandRecord>> {
        // read-modify-write under the single write lock so racing
        // results for the same command serialize here
        let mut commands = self.commands.write().await;
        let record = commands
            .get_mut(id)
            .ok_or_else(|| ServerError::not_found("command not found"))?;

        if !record.status.can_advance_to(status) {
            return Ok(None);
        }

        record.status = status;
        if output.is_some() {
            record.output = output;
        }
        if error.is_some() {
            record.error = error;
        }
        let now = Utc::now();
        match status {
            CommandStatus::Executing => record.executed_at = Some(now),
            CommandStatus::Completed | CommandStatus::Failed => record.completed_at = Some(now),
            CommandStatus::Pending => {}
        }
        Ok(Some(record.clone()))
    }
}
