use std::sync::Arc;

use cityride_core::LifecycleCoordinator;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<LifecycleCoordinator>,
    pub auth: AuthConfig,
    pub environment: String,
}

impl AppState {
    pub fn new(coordinator: Arc<LifecycleCoordinator>, auth: AuthConfig, environment: impl Into<String>) -> Self {
        Self {
            coordinator,
            auth,
            environment: environment.into(),
        }
    }
}
