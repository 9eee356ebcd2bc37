pub mod config;
pub mod error;
pub mod hub;
pub mod identity;
pub mod routes;

use std::sync::Arc;

use config::Config;
use hub::Hub;
use identity::IdentityResolver;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub identity: Arc<dyn IdentityResolver>,
    pub hub: Hub,
    pub config: Arc<Config>,
}
