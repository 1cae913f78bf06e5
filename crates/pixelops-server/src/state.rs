use std::sync::Arc;

use pixelops_core::{config::Config, store::PixelStore};

/// Shared application state injected into every Axum handler via
/// [`axum::extract::State`] and handed to the scheduled jobs.
///
/// Both fields are `Arc`s, so cloning the state is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Storage backend. In production this is a `DuckDbBackend`, which
    /// serialises every statement behind its own async mutex.
    pub store: Arc<dyn PixelStore>,

    /// Parsed configuration, loaded once at startup from environment variables.
    pub config: Arc<Config>,
}

impl AppState {
    /// Construct a new `AppState` wrapping the given backend and config.
    pub fn new(store: impl PixelStore, config: Config) -> Self {
        Self {
            store: Arc::new(store),
            config: Arc::new(config),
        }
    }

    pub fn store(&self) -> &dyn PixelStore {
        self.store.as_ref()
    }
}
