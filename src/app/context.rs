//! Services shared by every task, constructed once in `main`.

use std::sync::Arc;

use super::commands::CommandExecutor;
use super::ports::{ClockPort, EventSink, StoragePort};
use super::state::AquariumStore;
use crate::config::DeviceConfig;
use crate::events::EventCoordinator;

/// Cheap to clone; every field is shared.
#[derive(Clone)]
pub struct AppContext {
    pub events: Arc<EventCoordinator>,
    pub store: Arc<AquariumStore>,
    pub storage: Arc<dyn StoragePort>,
    pub clock: Arc<dyn ClockPort>,
    pub sink: Arc<dyn EventSink>,
    pub config: Arc<DeviceConfig>,
}

impl AppContext {
    pub fn new(
        storage: Arc<dyn StoragePort>,
        clock: Arc<dyn ClockPort>,
        sink: Arc<dyn EventSink>,
        config: DeviceConfig,
    ) -> Self {
        let store = Arc::new(AquariumStore::load(Arc::clone(&storage)));
        Self {
            events: Arc::new(EventCoordinator::new()),
            store,
            storage,
            clock,
            sink,
            config: Arc::new(config),
        }
    }

    pub fn executor(&self) -> CommandExecutor {
        CommandExecutor::new(Arc::clone(&self.store), Arc::clone(&self.events))
    }
}
