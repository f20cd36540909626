use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::events::LocalEventBroadcaster;
use crate::lifecycle::ScenarioLifecycleManager;
use crate::registrar::ConnectionRegistrar;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub lifecycle: Arc<ScenarioLifecycleManager>,
    pub registrar: Arc<ConnectionRegistrar>,
    pub events: LocalEventBroadcaster,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);
        let http = reqwest::Client::new();
        let events = LocalEventBroadcaster::new(EVENT_CHANNEL_CAPACITY);
        let registrar = Arc::new(ConnectionRegistrar::new(
            http.clone(),
            Duration::from_secs(config.registration_timeout_secs),
        ));
        let lifecycle = Arc::new(ScenarioLifecycleManager::new(
            config.clone(),
            registrar.clone(),
            events.clone(),
            http,
        ));
        Self {
            config,
            lifecycle,
            registrar,
            events,
        }
    }
}
