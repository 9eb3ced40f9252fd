use std::sync::Arc;

use crate::broadcast::ObserverBroadcast;
use crate::config::AppConfig;
use crate::registry::ConnectionRegistry;
use crate::router::CommandRouter;
use crate::storage::Storage;

/// Shared state reachable from every connection handler. All interior
/// structures synchronize themselves; nothing here assumes a
/// single-threaded executor.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub registry: Arc<ConnectionRegistry>,
    pub observers: Arc<ObserverBroadcast>,
    pub router: Arc<CommandRouter>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(storage: Arc<dyn Storage>, config: Arc<AppConfig>) -> Self {
        let registry = ConnectionRegistry::new();
        let observers = ObserverBroadcast::new();
        let router = CommandRouter::new(storage.clone(), registry.clone(), observers.clone());
        Self {
            storage,
            registry,
            observers,
            router,
            config,
        }
    }
}
