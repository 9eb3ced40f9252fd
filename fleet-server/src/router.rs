use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use fleet_shared::command::{CommandKind, CommandRecord, CommandStatus, CommandTarget};
use fleet_shared::protocol::{DashboardEvent, ServerMessage};

use crate::broadcast::ObserverBroadcast;
use crate::registry::ConnectionRegistry;
use crate::response::ServerResult;
use crate::storage::Storage;

/// Creates command records, resolves dispatch targets, forwards to
/// reachable agents and ingests their results.
pub struct CommandRouter {
    storage: Arc<dyn Storage>,
    registry: Arc<ConnectionRegistry>,
    observers: Arc<ObserverBroadcast>,
}

impl CommandRouter {
    pub fn new(
        storage: Arc<dyn Storage>,
        registry: Arc<ConnectionRegistry>,
        observers: Arc<ObserverBroadcast>,
    ) -> Arc<Self> {
        Arc::new(Self {
            storage,
            registry,
            observers,
        })
    }

    /// Persists a new pending command and hands the record back for
    /// dispatch.
    pub async fn create(
        &self,
        kind: CommandKind,
        command: &str,
        target: CommandTarget,
    ) -> ServerResult<CommandRecord> {
        let record = CommandRecord::new(
            Uuid::new_v4().to_string(),
            kind,
            command.to_string(),
            target,
        );
        self.storage.create_command(record.clone()).await?;
        Ok(record)
    }

    /// Resolves the target to a concrete machine-id set and forwards an
    /// `execute_command` to every member with a live connection.
    /// Membership is snapshotted here; machines joining the group later
    /// never see this command. Disconnected machines are skipped
    /// silently (no queueing, no retry). Returns how many agents the
    /// message was handed to.
    pub async fn dispatch(&self, command: &CommandRecord) -> ServerResult<usize> {
        let targets = match &command.target {
            CommandTarget::Machine { id } => vec![id.clone()],
            CommandTarget::Group { id } => self.storage.machines_in_group(id).await?,
        };

        let mut delivered = 0;
        for machine_id in targets {
            let message = ServerMessage::ExecuteCommand {
                command_id: command.id.clone(),
                command_type: command.kind,
                command: command.command.clone(),
            };
            if self.registry.send_to_machine(&machine_id, message) {
                delivered += 1;
            } else {
                debug!(%machine_id, command_id = %command.id, "target offline, skipping dispatch");
            }
        }
        Ok(delivered)
    }

    /// Ingests an agent-reported result: persists the status update and
    /// fans it out to observers. Transitions that would regress the
    /// record (duplicate or out-of-order results) are dropped here
    /// rather than trusted to arrive well-ordered.
    pub async fn ingest_result(
        &self,
        machine_id: &str,
        command_id: &str,
        status: CommandStatus,
        output: Option<String>,
        error: Option<String>,
    ) -> ServerResult<()> {
        let updated = self
            .storage
            .apply_command_result(command_id, status, output.clone(), error.clone())
            .await?;

        match updated {
            Some(_) => {
                self.observers.broadcast(DashboardEvent::CommandResult {
                    command_id: command_id.to_string(),
                    machine_id: machine_id.to_string(),
                    status,
                    output,
                    error,
                });
                Ok(())
            }
            None => {
                warn!(
                    %machine_id,
                    %command_id,
                    %status,
                    "dropping out-of-order command result"
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    use fleet_shared::machine::HostFacts;

    use crate::storage::memory::MemoryStorage;

    struct Fixture {
        storage: Arc<MemoryStorage>,
        registry: Arc<ConnectionRegistry>,
        observers: Arc<ObserverBroadcast>,
        router: Arc<CommandRouter>,
    }

    fn fixture() -> Fixture {
        let storage = MemoryStorage::new();
        let registry = ConnectionRegistry::new();
        let observers = ObserverBroadcast::new();
        let router = CommandRouter::new(storage.clone(), registry.clone(), observers.clone());
        Fixture {
            storage,
            registry,
            observers,
            router,
        }
    }

    fn connect(fx: &Fixture, machine_id: &str) -> mpsc::UnboundedReceiver<ServerMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = fx.registry.new_handle(tx);
        fx.registry.register(machine_id, handle);
        rx
    }

    async fn register_in_group(fx: &Fixture, machine_id: &str, group_id: &str) {
        fx.storage
            .register_machine(machine_id, HostFacts::default())
            .await
            .unwrap();
        fx.storage
            .assign_group(machine_id, Some(group_id.to_string()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn create_persists_pending_command() {
        let fx = fixture();
        let record = fx
            .router
            .create(
                CommandKind::Shell,
                "echo hi",
                CommandTarget::Machine { id: "m-1".into() },
            )
            .await
            .unwrap();

        let stored = fx.storage.get_command(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CommandStatus::Pending);
        assert_eq!(stored.command, "echo hi");
    }

    #[tokio::test]
    async fn dispatch_to_connected_machine_delivers() {
        let fx = fixture();
        let mut rx = connect(&fx, "m-1");
        let record = fx
            .router
            .create(
                CommandKind::Shell,
                "uptime",
                CommandTarget::Machine { id: "m-1".into() },
            )
            .await
            .unwrap();

        assert_eq!(fx.router.dispatch(&record).await.unwrap(), 1);
        match rx.recv().await.unwrap() {
            ServerMessage::ExecuteCommand {
                command_id,
                command_type,
                command,
            } => {
                assert_eq!(command_id, record.id);
                assert_eq!(command_type, CommandKind::Shell);
                assert_eq!(command, "uptime");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn dispatch_to_offline_machine_is_silently_skipped() {
        let fx = fixture();
        let record = fx
            .router
            .create(
                CommandKind::Shell,
                "uptime",
                CommandTarget::Machine { id: "offline".into() },
            )
            .await
            .unwrap();
        assert_eq!(fx.router.dispatch(&record).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn group_dispatch_snapshots_membership() {
        let fx = fixture();
        register_in_group(&fx, "m-1", "g-1").await;
        register_in_group(&fx, "m-2", "g-1").await;
        let mut rx1 = connect(&fx, "m-1");
        // m-2 is a member but offline: skipped, no error

        let record = fx
            .router
            .create(
                CommandKind::Shell,
                "uptime",
                CommandTarget::Group { id: "g-1".into() },
            )
            .await
            .unwrap();
        assert_eq!(fx.router.dispatch(&record).await.unwrap(), 1);
        assert!(matches!(
            rx1.recv().await,
            Some(ServerMessage::ExecuteCommand { .. })
        ));

        // a machine joining the group after dispatch never sees it
        register_in_group(&fx, "m-3", "g-1").await;
        let mut rx3 = connect(&fx, "m-3");
        assert!(rx3.try_recv().is_err());
    }

    #[tokio::test]
    async fn member_removed_after_snapshot_still_receives() {
        let fx = fixture();
        register_in_group(&fx, "m-1", "g-1").await;
        let mut rx = connect(&fx, "m-1");

        let record = fx
            .router
            .create(
                CommandKind::Shell,
                "uptime",
                CommandTarget::Group { id: "g-1".into() },
            )
            .await
            .unwrap();

        // membership change between create and dispatch is not the
        // snapshot point; removal after dispatch certainly is not
        assert_eq!(fx.router.dispatch(&record).await.unwrap(), 1);
        fx.storage.assign_group("m-1", None).await.unwrap();
        assert!(matches!(
            rx.recv().await,
            Some(ServerMessage::ExecuteCommand { .. })
        ));
    }

    #[tokio::test]
    async fn ingest_result_broadcasts_and_persists() {
        let fx = fixture();
        let (obs_tx, mut obs_rx) = mpsc::unbounded_channel();
        fx.observers.subscribe(obs_tx);

        let record = fx
            .router
            .create(
                CommandKind::Shell,
                "echo hi",
                CommandTarget::Machine { id: "m-1".into() },
            )
            .await
            .unwrap();

        fx.router
            .ingest_result("m-1", &record.id, CommandStatus::Executing, None, None)
            .await
            .unwrap();
        fx.router
            .ingest_result(
                "m-1",
                &record.id,
                CommandStatus::Completed,
                Some("hi\n".into()),
                None,
            )
            .await
            .unwrap();

        match obs_rx.recv().await.unwrap() {
            DashboardEvent::CommandResult { status, .. } => {
                assert_eq!(status, CommandStatus::Executing)
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match obs_rx.recv().await.unwrap() {
            DashboardEvent::CommandResult { status, output, .. } => {
                assert_eq!(status, CommandStatus::Completed);
                assert_eq!(output.as_deref(), Some("hi\n"));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let stored = fx.storage.get_command(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CommandStatus::Completed);
    }

    #[tokio::test]
    async fn regressing_result_is_dropped_without_broadcast() {
        let fx = fixture();
        let (obs_tx, mut obs_rx) = mpsc::unbounded_channel();
        fx.observers.subscribe(obs_tx);

        let record = fx
            .router
            .create(
                CommandKind::Shell,
                "echo hi",
                CommandTarget::Machine { id: "m-1".into() },
            )
            .await
            .unwrap();

        fx.router
            .ingest_result(
                "m-1",
                &record.id,
                CommandStatus::Completed,
                Some("done".into()),
                None,
            )
            .await
            .unwrap();
        // duplicate terminal report from a confused agent
        fx.router
            .ingest_result(
                "m-1",
                &record.id,
                CommandStatus::Failed,
                None,
                Some("late".into()),
            )
            .await
            .unwrap();

        // only the first result was fanned out
        assert!(matches!(
            obs_rx.recv().await,
            Some(DashboardEvent::CommandResult {
                status: CommandStatus::Completed,
                ..
            })
        ));
        assert!(obs_rx.try_recv().is_err());

        let stored = fx.storage.get_command(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CommandStatus::Completed);
        assert!(stored.error.is_none());
    }
}
