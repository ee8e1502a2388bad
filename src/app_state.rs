use std::sync::Arc;

use crate::core::informer::manager::InformerManager;

/// Shared state injected into every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub informers: Arc<InformerManager>,
    pub version: &'static str,
}

pub fn build_app_state(informers: Arc<InformerManager>) -> AppState {
    AppState {
        informers,
        version: env!("CARGO_PKG_VERSION"),
    }
}
