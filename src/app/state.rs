//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::presence::PresenceHub;
use crate::store::WorldStore;
use crate::world::{SessionDeps, SessionRegistry, WorldLayout};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub hub: Arc<PresenceHub>,
    pub store: Arc<dyn WorldStore>,
    pub layout: Arc<WorldLayout>,
    /// Sessions simulated inside this process (bots)
    pub sessions: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn WorldStore>, layout: WorldLayout) -> Self {
        Self {
            config: Arc::new(config),
            hub: Arc::new(PresenceHub::new()),
            store,
            layout: Arc::new(layout),
            sessions: Arc::new(SessionRegistry::new()),
        }
    }

    /// Dependencies for a session living in this process
    pub fn session_deps(&self) -> SessionDeps {
        SessionDeps {
            channel: self.hub.clone(),
            store: self.store.clone(),
            layout: self.layout.clone(),
        }
    }
}
