pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod routes;
pub mod store;

use std::sync::Arc;

use config::Config;
use gateway::call::CallCoordinator;
use gateway::fanout::GatewayBroadcast;
use gateway::registry::PresenceRegistry;
use store::DirectoryStore;

/// Shared application state available to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn DirectoryStore>,
    pub presence: Arc<PresenceRegistry>,
    pub broadcast: GatewayBroadcast,
    pub calls: CallCoordinator,
}
