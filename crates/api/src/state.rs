use std::sync::Arc;

use crate::config::ServerConfig;
use crate::engine::Orchestrator;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration (JWT settings are read by the auth extractor).
    pub config: Arc<ServerConfig>,
    /// Submission, execution and polling of generation jobs.
    pub orchestrator: Orchestrator,
}
