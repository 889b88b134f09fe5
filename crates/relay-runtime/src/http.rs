//! Shared HTTP plumbing for the hosted providers
//!
//! Every failure on this path becomes `AgentError::LlmApi`. A transport
//! timeout carries status 408 so it classifies like an agent-side timeout.

use std::time::Duration;

use relay_core::{AgentError, Result};
use serde::de::DeserializeOwned;

pub(crate) fn client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AgentError::System(format!("failed to create HTTP client: {e}")))
}

/// Send a request and decode a 200 response body
pub(crate) async fn send_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
    provider: &str,
) -> Result<T> {
    let response = request.send().await.map_err(|e| transport_error(&e, provider))?;
    let status = response.status().as_u16();

    if status == 429 {
        return Err(AgentError::llm(Some(status), format!("{provider} rate limit reached")));
    }
    if status == 401 || status == 403 {
        return Err(AgentError::llm(
            Some(status),
            format!("{provider} rejected the API key or permissions"),
        ));
    }
    if status != 200 {
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(provider, status, body = %body, "Provider returned error");
        return Err(AgentError::llm(Some(status), body));
    }

    response
        .json()
        .await
        .map_err(|e| AgentError::llm(Some(200), format!("failed to parse {provider} response: {e}")))
}

/// Reachability probe: `Ok(false)` on an error status, `Network` when unreachable
pub(crate) async fn probe(request: reqwest::RequestBuilder, provider: &str) -> Result<bool> {
    match request.send().await {
        Ok(response) => {
            let healthy = response.status().is_success();
            if !healthy {
                tracing::warn!(provider, status = response.status().as_u16(), "Health check failed");
            }
            Ok(healthy)
        }
        Err(e) => Err(AgentError::Network(format!("{provider} unreachable: {e}"))),
    }
}

fn transport_error(error: &reqwest::Error, provider: &str) -> AgentError {
    let status = if error.is_timeout() { Some(408) } else { None };
    AgentError::llm(status, format!("{provider} request failed: {error}"))
}
