//! Application state shared across handlers

use std::sync::Arc;

use gamify::{EngineConfig, GamificationEngine};

/// Shared server state: the engine handle.
pub struct AppState {
    pub engine: GamificationEngine,
}

impl AppState {
    pub fn new(config: EngineConfig) -> Arc<Self> {
        Arc::new(Self {
            engine: GamificationEngine::new(config),
        })
    }
}
