// ABOUTME: Shared state for the webhook listener.
// ABOUTME: Holds the launcher used to run pgwarden subcommands.

use std::sync::Arc;

use crate::launcher::CommandLauncher;

pub struct AppState {
    pub launcher: Arc<dyn CommandLauncher>,
}

/// Type alias for the Arc-wrapped state used with Axum's State extractor.
pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(launcher: Arc<dyn CommandLauncher>) -> Self {
        Self { launcher }
    }
}
