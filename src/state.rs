//! Shared application state passed to every handler via Axum's `State` extractor.

use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::connection::ConnectionManager;
use crate::dispatch::MessageDispatcher;

#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration loaded at startup.
    pub config: Arc<Config>,
    /// Monotonic instant when the server started (for uptime calculation).
    pub start_time: Instant,
    /// The one session this server drives.
    pub manager: ConnectionManager,
    pub dispatcher: MessageDispatcher,
}

impl AppState {
    pub fn new(config: Config, manager: ConnectionManager) -> Self {
        Self {
            config: Arc::new(config),
            start_time: Instant::now(),
            dispatcher: MessageDispatcher::new(manager.clone()),
            manager,
        }
    }
}
