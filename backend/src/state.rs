use std::sync::Arc;

use crate::{config::Config, services::AuthService};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub auth: AuthService,
}

impl AppState {
    pub fn new(config: Config, auth: AuthService) -> Self {
        Self {
            config: Arc::new(config),
            auth,
        }
    }
}
