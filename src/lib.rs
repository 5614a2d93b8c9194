pub mod auth;
pub mod config;
pub mod error;
pub mod realtime;
pub mod routes;
pub mod store;

use std::sync::Arc;

use config::Config;
use realtime::router::EventRouter;
use store::Store;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub events: Arc<EventRouter>,
}
