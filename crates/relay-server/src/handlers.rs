//! HTTP Handlers

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use relay_core::{AiModelDescriptor, ErrorCategory, MonitoredError, ProviderKind, ToolCall};

use crate::state::AppState;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub text: String,
    pub session_id: String,
    pub model: String,
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub tracking_id: Option<String>,
    pub category: ErrorCategory,
    pub retryable: bool,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub provider: ProviderKind,
    pub model: String,
    pub provider_reachable: bool,
    pub sessions: usize,
}

#[derive(Serialize)]
pub struct ModelsResponse {
    pub provider: ProviderKind,
    pub active: String,
    pub models: Vec<AiModelDescriptor>,
}

/// A turn failure as seen by HTTP clients. Only the user-facing message
/// and tracking id leave the server.
pub struct ApiError(pub MonitoredError);

impl ApiError {
    const fn status(&self) -> StatusCode {
        match self.0.category {
            ErrorCategory::Input | ErrorCategory::Governance => StatusCode::BAD_REQUEST,
            ErrorCategory::Context => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorCategory::Llm | ErrorCategory::Network => StatusCode::BAD_GATEWAY,
            ErrorCategory::Memory
            | ErrorCategory::Tool
            | ErrorCategory::System
            | ErrorCategory::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse {
            error: self.0.user_facing_message,
            tracking_id: self.0.tracking_id,
            category: self.0.category,
            retryable: self.0.is_retryable,
        };
        (status, Json(body)).into_response()
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let provider_reachable = match state.agent.health_check().await {
        Ok(reachable) => reachable,
        Err(e) => {
            tracing::warn!(error = %e, "Provider health check failed");
            false
        }
    };

    Json(HealthResponse {
        status: if provider_reachable { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        provider: state.agent.service().kind(),
        model: state.agent.model().to_string(),
        provider_reachable,
        sessions: state.agent.session_count(),
    })
}

/// Catalogue entries of the active provider
pub async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    let service = state.agent.service();
    Json(ModelsResponse {
        provider: service.kind(),
        active: state.agent.model().to_string(),
        models: service.models(),
    })
}

/// Main chat endpoint
pub async fn chat_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let session_id = payload
        .session_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let response = state
        .agent
        .handle_request(&payload.message, &session_id)
        .await
        .map_err(ApiError)?;

    Ok(Json(ChatResponse {
        text: response.text,
        session_id: response.session_id,
        model: response.model,
        tool_calls: response.tool_calls,
    }))
}
