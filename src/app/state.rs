//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::{AllVisible, ServerHandle, VisibilityFilter};
use crate::session::SessionManager;
use crate::util::time::ServerClock;
use crate::ws::codec::JsonCodec;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionManager>,
    pub server: ServerHandle,
    /// Interest management policy applied to every state update
    pub visibility: Arc<dyn VisibilityFilter>,
    pub clock: ServerClock,
    pub codec: JsonCodec,
}

impl AppState {
    pub fn new(config: Arc<Config>, sessions: Arc<SessionManager>, server: ServerHandle, clock: ServerClock) -> Self {
        Self {
            config,
            sessions,
            server,
            visibility: Arc::new(AllVisible),
            clock,
            codec: JsonCodec,
        }
    }

    /// Replace the default everyone-sees-everything policy
    pub fn with_visibility(mut self, filter: impl VisibilityFilter) -> Self {
        self.visibility = Arc::new(filter);
        self
    }
}
