pub mod memory;

use async_trait::async_trait;

use fleet_shared::command::{CommandRecord, CommandStatus};
use fleet_shared::logs::LogEntry;
use fleet_shared::machine::{HostFacts, MachineRecord, MachineStatus};
use fleet_shared::metrics::MetricsSnapshot;
use fleet_shared::packages::PackageInfo;

use crate::response::ServerResult;

/// Persistence port for the control plane. No schema is mandated; a
/// durable backend lives behind this trait exactly like the in-memory
/// implementation the binary ships with.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Upserts the machine record from a `register` handshake, marking
    /// it online and stamping last-seen. An existing group assignment
    /// survives re-registration.
    async fn register_machine(&self, id: &str, facts: HostFacts) -> ServerResult<MachineRecord>;

    /// Updates status and last-seen for a known machine. Unknown ids
    /// are a no-op (the machine simply has not registered yet).
    async fn update_machine_status(&self, id: &str, status: MachineStatus) -> ServerResult<()>;

    async fn get_machine(&self, id: &str) -> ServerResult<Option<MachineRecord>>;

    /// Moves a machine into a group (None clears the assignment).
    async fn assign_group(&self, machine_id: &str, group_id: Option<String>) -> ServerResult<()>;

    /// Resolves current group membership. Dispatch snapshots this set
    /// once; later membership changes never affect an already-issued
    /// command.
    async fn machines_in_group(&self, group_id: &str) -> ServerResult<Vec<String>>;

    async fn save_metrics(&self, machine_id: &str, sample: MetricsSnapshot) -> ServerResult<()>;

    async fn save_logs(&self, machine_id: &str, entries: Vec<LogEntry>) -> ServerResult<()>;

    async fn replace_packages(
        &self,
        machine_id: &str,
        packages: Vec<PackageInfo>,
    ) -> ServerResult<()>;

    async fn create_command(&self, record: CommandRecord) -> ServerResult<()>;

    async fn get_command(&self, id: &str) -> ServerResult<Option<CommandRecord>>;

    /// Applies an agent-reported result under the implementation's own
    /// lock: the update lands only when
    /// [`CommandStatus::can_advance_to`] allows the transition.
    /// `executing` stamps `executed_at`, terminal states stamp
    /// `completed_at`. Returns the updated record, or `None` when the
    /// transition was rejected as duplicate or out of order. Unknown
    /// command ids are a `NotFound` error.
    async fn apply_command_result(
        &self,
        id: &str,
        status: CommandStatus,
        output: Option<String>,
        error: Option<String>,
    ) -> ServerResult<Option<CommandRecord>>;
}
