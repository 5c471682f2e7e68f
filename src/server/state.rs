use std::sync::Arc;

use crate::auth::JwtValidator;
use crate::config::Settings;
use crate::dispatch::Dispatcher;
use crate::hub::RealtimeHub;

/// Shared handles injected into every handler and background task
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub jwt_validator: Arc<JwtValidator>,
    pub hub: Arc<RealtimeHub>,
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let jwt_validator = Arc::new(JwtValidator::new(&settings.jwt));
        let hub = Arc::new(RealtimeHub::new(settings.hub.options()));
        let dispatcher = Arc::new(Dispatcher::new(hub.clone()));

        Self {
            settings: Arc::new(settings),
            jwt_validator,
            hub,
            dispatcher,
        }
    }
}
