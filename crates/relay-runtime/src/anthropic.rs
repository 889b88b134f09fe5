//! Anthropic Messages API adapter
//!
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as a top-level field
//! - Native tool use via `tool_use` content blocks

use std::time::Duration;

use async_trait::async_trait;
use relay_core::provider::{AiService, GenerationOptions, ProviderKind, ToolCompletion};
use relay_core::tool::{ToolCall, ToolSchema};
use relay_core::{AgentError, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::http;

const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

pub struct AnthropicService {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl AnthropicService {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            model: model.into(),
            client: http::client(timeout)?,
        })
    }

    /// Custom base URL (e.g. for proxies)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn request_body(prompt: &str, tools: &[ToolSchema], options: &GenerationOptions) -> serde_json::Value {
        let mut body = json!({
            "model": options.model,
            "max_tokens": options.max_tokens,
            "temperature": options.temperature,
            "messages": [{ "role": "user", "content": prompt }],
        });
        if let Some(system) = &options.system_prompt {
            body["system"] = json!(system);
        }
        if !tools.is_empty() {
            body["tools"] = json!(Self::to_api_tools(tools));
        }
        if !options.stop_sequences.is_empty() {
            body["stop_sequences"] = json!(options.stop_sequences);
        }
        body
    }

    fn to_api_tools(tools: &[ToolSchema]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.to_json_schema(),
            })
            .collect()
    }

    fn parse_response(response: AnthropicResponse) -> Result<ToolCompletion> {
        let mut text = Vec::new();
        let mut tool_calls = Vec::new();

        for block in response.content {
            match block {
                ResponseContentBlock::Text { text: chunk } => text.push(chunk),
                ResponseContentBlock::ToolUse { id, name, input } => {
                    let serde_json::Value::Object(arguments) = input else {
                        return Err(AgentError::llm(
                            Some(200),
                            format!("tool '{name}' input is not a JSON object"),
                        ));
                    };
                    tool_calls.push(ToolCall::new(name, arguments).with_id(id));
                }
                ResponseContentBlock::Other => {}
            }
        }

        if response.stop_reason.as_deref() == Some("max_tokens") {
            tracing::warn!(provider = "anthropic", "Completion stopped at max_tokens");
        }

        Ok(ToolCompletion {
            content: text.join(""),
            tool_calls,
        })
    }

    async fn complete(&self, prompt: &str, tools: &[ToolSchema], options: &GenerationOptions) -> Result<ToolCompletion> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = Self::request_body(prompt, tools, options);

        tracing::debug!(provider = "anthropic", model = %options.model, tools = tools.len(), "Sending completion request");

        let request = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);
        let response: AnthropicResponse = http::send_json(request, "Anthropic").await?;
        Self::parse_response(response)
    }
}

#[async_trait]
impl AiService for AnthropicService {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn default_options(&self) -> GenerationOptions {
        GenerationOptions::for_model(self.model.as_str())
    }

    async fn generate_completion(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        let completion = self.complete(prompt, &[], options).await?;
        if completion.content.trim().is_empty() {
            return Err(AgentError::llm(Some(200), "Anthropic returned an empty completion"));
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
            return Err(AgentError::llm(Some(200), "Anthropic returned neither text nor tool calls"));
        }
        Ok(completion)
    }

    async fn health_check(&self) -> Result<bool> {
        let request = self
            .client
            .get(format!("{}/v1/models", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION);
        http::probe(request, "Anthropic").await
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ResponseContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::tool::ParameterSchema;

    #[test]
    fn test_constructor_with_base_url() {
        let service = AnthropicService::new("sk-ant-test", "claude-3-5-haiku-latest", Duration::from_secs(5))
            .unwrap()
            .with_base_url("https://custom.proxy.com/");
        assert_eq!(service.base_url, "https://custom.proxy.com");
        assert_eq!(service.kind(), ProviderKind::Anthropic);
    }

    #[test]
    fn test_system_prompt_is_top_level() {
        let options = GenerationOptions::for_model("claude-3-5-sonnet-latest").with_system_prompt("Be concise");
        let body = AnthropicService::request_body("Hello", &[], &options);

        assert_eq!(body["system"], "Be concise");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["max_tokens"], 2048);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_tools_use_input_schema() {
        let tool = ToolSchema {
            name: "search".into(),
            description: "Search the docs".into(),
            parameters: vec![
                ParameterSchema::required("query", "string", "Search terms"),
                ParameterSchema::optional("limit", "integer", "Max results"),
            ],
        };
        let body = AnthropicService::request_body("find it", &[tool], &GenerationOptions::default());

        let schema = &body["tools"][0]["input_schema"];
        assert_eq!(body["tools"][0]["name"], "search");
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], json!(["query"]));
        assert_eq!(schema["properties"]["limit"]["type"], "integer");
    }

    #[test]
    fn test_parse_mixed_content() {
        let response: AnthropicResponse = serde_json::from_value(json!({
            "id": "msg_1",
            "model": "claude-3-5-sonnet-latest",
            "stop_reason": "tool_use",
            "content": [
                { "type": "thinking", "thinking": "..." },
                { "type": "text", "text": "Let me look that up." },
                { "type": "tool_use", "id": "toolu_1", "name": "search", "input": { "query": "rust" } }
            ],
            "usage": { "input_tokens": 10, "output_tokens": 5 }
        }))
        .unwrap();

        let completion = AnthropicService::parse_response(response).unwrap();
        assert_eq!(completion.content, "Let me look that up.");
        assert_eq!(completion.tool_calls.len(), 1);
        assert_eq!(completion.tool_calls[0].id.as_deref(), Some("toolu_1"));
        assert_eq!(completion.tool_calls[0].arguments["query"], "rust");
    }

    #[test]
    fn test_non_object_tool_input_is_error() {
        let response: AnthropicResponse = serde_json::from_value(json!({
            "content": [{ "type": "tool_use", "id": "toolu_1", "name": "search", "input": "rust" }]
        }))
        .unwrap();
        assert!(AnthropicService::parse_response(response).is_err());
    }
}
