//! OpenAI Chat Completions adapter
//!
//! Also works with any endpoint that speaks the same protocol, via
//! [`OpenAiService::with_base_url`].

use std::time::Duration;

use async_trait::async_trait;
use relay_core::provider::{AiService, GenerationOptions, ProviderKind, ToolCompletion};
use relay_core::tool::{ToolArgs, ToolCall, ToolSchema};
use relay_core::{AgentError, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::http;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiService {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiService {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            model: model.into(),
            client: http::client(timeout)?,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn request_body(prompt: &str, tools: &[ToolSchema], options: &GenerationOptions) -> serde_json::Value {
        let mut messages = Vec::new();
        if let Some(system) = &options.system_prompt {
            messages.push(ApiMessage::new("system", system));
        }
        messages.push(ApiMessage::new("user", prompt));

        let mut body = json!({
            "model": options.model,
            "messages": messages,
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
        });
        if !tools.is_empty() {
            body["tools"] = json!(Self::to_api_tools(tools));
        }
        if !options.stop_sequences.is_empty() {
            body["stop"] = json!(options.stop_sequences);
        }
        body
    }

    fn to_api_tools(tools: &[ToolSchema]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.to_json_schema(),
                },
            })
            .collect()
    }

    fn parse_response(response: ApiResponse) -> Result<ToolCompletion> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::llm(Some(200), "no choices in OpenAI response"))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| {
                let arguments = parse_arguments(&tc.function.name, &tc.function.arguments)?;
                Ok(ToolCall::new(tc.function.name, arguments).with_id(tc.id))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ToolCompletion {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
        })
    }

    async fn complete(&self, prompt: &str, tools: &[ToolSchema], options: &GenerationOptions) -> Result<ToolCompletion> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::request_body(prompt, tools, options);

        tracing::debug!(provider = "openai", model = %options.model, tools = tools.len(), "Sending completion request");

        let request = self.client.post(&url).bearer_auth(&self.api_key).json(&body);
        let response: ApiResponse = http::send_json(request, "OpenAI").await?;
        Self::parse_response(response)
    }
}

/// Function arguments arrive as a JSON-encoded string
fn parse_arguments(tool: &str, raw: &str) -> Result<ToolArgs> {
    if raw.trim().is_empty() {
        return Ok(ToolArgs::new());
    }
    serde_json::from_str(raw)
        .map_err(|e| AgentError::llm(Some(200), format!("malformed arguments for tool '{tool}': {e}")))
}

#[async_trait]
impl AiService for OpenAiService {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn default_options(&self) -> GenerationOptions {
        GenerationOptions::for_model(self.model.as_str())
    }

    async fn generate_completion(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        let completion = self.complete(prompt, &[], options).await?;
        if completion.content.trim().is_empty() {
            return Err(AgentError::llm(Some(200), "OpenAI returned an empty completion"));
        }
        Ok(completion.content)
    }

    async fn generate_with_tools(
        &self,
        prompt: &str,
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> Result<ToolCompletion> {
        let completion = self.complete(prompt, tools, options).await?;
        if completion.content.trim().is_empty() && !completion.has_tool_calls() {
            return Err(AgentError::llm(Some(200), "OpenAI returned neither text nor tool calls"));
        }
        Ok(completion)
    }

    async fn health_check(&self) -> Result<bool> {
        let request = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key);
        http::probe(request, "OpenAI").await
    }
}

// --- OpenAI API types ---

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

impl ApiMessage {
    fn new(role: &'static str, content: &str) -> Self {
        Self {
            role,
            content: content.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ApiToolCall {
    id: String,
    function: ApiFunction,
}

#[derive(Debug, Deserialize)]
struct ApiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}
