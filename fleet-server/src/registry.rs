use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use fleet_shared::protocol::ServerMessage;

/// Handle to one live agent connection. The `epoch` disambiguates an
/// old connection from a replacement registered under the same machine
/// id, so a stale disconnect can never knock a fresh connection off
/// the books.
#[derive(Clone, Debug)]
pub struct AgentHandle {
    epoch: u64,
    tx: mpsc::UnboundedSender<ServerMessage>,
    cancel: CancellationToken,
}

impl AgentHandle {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Best-effort write into the connection's ordered outbound
    /// channel. Returns false once the connection's writer is gone.
    pub fn send(&self, message: ServerMessage) -> bool {
        self.tx.send(message).is_ok()
    }

    /// Signals the owning connection task to shut down.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Machine id -> live connection. Single source of truth for which
/// agents are currently reachable.
pub struct ConnectionRegistry {
    agents: DashMap<String, AgentHandle>,
    next_epoch: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            agents: DashMap::new(),
            next_epoch: AtomicU64::new(1),
        })
    }

    /// Mints a handle for a freshly accepted connection. The handle is
    /// not reachable until `register` installs it.
    pub fn new_handle(&self, tx: mpsc::UnboundedSender<ServerMessage>) -> AgentHandle {
        AgentHandle {
            epoch: self.next_epoch.fetch_add(1, Ordering::Relaxed),
            tx,
            cancel: CancellationToken::new(),
        }
    }

    /// Installs (or replaces) the mapping for `machine_id`. Returns the
    /// handle that was displaced, still open; the caller decides how to
    /// close it.
    pub fn register(&self, machine_id: &str, handle: AgentHandle) -> Option<AgentHandle> {
        self.agents.insert(machine_id.to_string(), handle)
    }

    /// Removes the mapping only if `epoch` still matches the handle on
    /// file. Returns whether anything was removed; the caller emits the
    /// offline transition only in that case.
    pub fn unregister(&self, machine_id: &str, epoch: u64) -> bool {
        self.agents
            .remove_if(machine_id, |_, handle| handle.epoch == epoch)
            .is_some()
    }

    pub fn lookup(&self, machine_id: &str) -> Option<AgentHandle> {
        self.agents.get(machine_id).map(|entry| entry.value().clone())
    }

    pub fn is_online(&self, machine_id: &str) -> bool {
        self.agents.contains_key(machine_id)
    }

    pub fn online_count(&self) -> usize {
        self.agents.len()
    }

    /// Forwards `message` if a live connection exists. No queueing, no
    /// retry: false means the machine was not reachable and the message
    /// is gone.
    pub fn send_to_machine(&self, machine_id: &str, message: ServerMessage) -> bool {
        match self.lookup(machine_id) {
            Some(handle) => handle.send(message),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle_with_rx(
        registry: &ConnectionRegistry,
    ) -> (AgentHandle, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (registry.new_handle(tx), rx)
    }

    #[tokio::test]
    async fn send_to_unregistered_machine_returns_false() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.send_to_machine("ghost", ServerMessage::RequestMetrics));
    }

    #[tokio::test]
    async fn send_to_registered_machine_is_observable() {
        let registry = ConnectionRegistry::new();
        let (handle, mut rx) = handle_with_rx(&registry);
        registry.register("m-1", handle);

        assert!(registry.send_to_machine("m-1", ServerMessage::RequestMetrics));
        assert_eq!(rx.recv().await, Some(ServerMessage::RequestMetrics));
    }

    #[tokio::test]
    async fn register_replaces_previous_connection() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = handle_with_rx(&registry);
        let (second, mut rx2) = handle_with_rx(&registry);

        assert!(registry.register("m-1", first).is_none());
        let displaced = registry.register("m-1", second).unwrap();
        displaced.close();

        assert!(registry.send_to_machine("m-1", ServerMessage::RequestPackages));
        assert_eq!(rx2.recv().await, Some(ServerMessage::RequestPackages));
    }

    #[tokio::test]
    async fn stale_unregister_does_not_remove_new_connection() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = handle_with_rx(&registry);
        let (second, _rx2) = handle_with_rx(&registry);
        let first_epoch = first.epoch();
        let second_epoch = second.epoch();

        registry.register("m-1", first);
        registry.register("m-1", second);

        // the old connection's teardown races in after the reconnect
        assert!(!registry.unregister("m-1", first_epoch));
        assert!(registry.is_online("m-1"));

        // the current connection can still unregister itself
        assert!(registry.unregister("m-1", second_epoch));
        assert!(!registry.is_online("m-1"));
    }

    #[tokio::test]
    async fn last_call_wins_over_any_interleaving() {
        let registry = ConnectionRegistry::new();
        let (a, _rx_a) = handle_with_rx(&registry);
        let (b, _rx_b) = handle_with_rx(&registry);
        let a_epoch = a.epoch();

        registry.register("m-1", a);
        registry.unregister("m-1", a_epoch);
        registry.register("m-1", b);
        // replaying the already-consumed unregister is a no-op
        assert!(!registry.unregister("m-1", a_epoch));
        assert!(registry.is_online("m-1"));
    }

    #[tokio::test]
    async fn send_fails_after_receiver_dropped() {
        let registry = ConnectionRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register("m-1", registry.new_handle(tx));
        drop(rx);
        assert!(!registry.send_to_machine("m-1", ServerMessage::RequestMetrics));
    }
}
