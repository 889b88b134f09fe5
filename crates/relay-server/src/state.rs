//! Application State

use std::sync::Arc;

use relay_core::Agent;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// The assembled agent; owns sessions, memory and the AI service
    pub agent: Arc<Agent>,
}
