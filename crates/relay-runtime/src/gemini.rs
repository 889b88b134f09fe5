//! Google Gemini `generateContent` adapter
//!
//! Gemini takes an OpenAPI-subset schema for function declarations: type
//! names are uppercase, `default` is not accepted and arrays must declare
//! their items. [`gemini_schema`] rewrites the shared JSON Schema into it.

use std::time::Duration;

use async_trait::async_trait;
use relay_core::provider::{AiService, GenerationOptions, ProviderKind, ToolCompletion};
use relay_core::tool::{ToolCall, ToolSchema};
use relay_core::{AgentError, Result};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::http;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiService {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl GeminiService {
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

    fn request_body(prompt: &str, tools: &[ToolSchema], options: &GenerationOptions) -> Value {
        let mut generation = json!({
            "temperature": options.temperature,
            "maxOutputTokens": options.max_tokens,
        });
        if !options.stop_sequences.is_empty() {
            generation["stopSequences"] = json!(options.stop_sequences);
        }

        let mut body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": generation,
        });
        if let Some(system) = &options.system_prompt {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }
        if !tools.is_empty() {
            let declarations: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": gemini_schema(t.to_json_schema()),
                    })
                })
                .collect();
            body["tools"] = json!([{ "functionDeclarations": declarations }]);
        }
        body
    }

    fn parse_response(response: GenerateContentResponse) -> Result<ToolCompletion> {
        let candidate = response.candidates.into_iter().next().ok_or_else(|| {
            let reason = response
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .unwrap_or_else(|| "no candidates".into());
            AgentError::llm(Some(200), format!("Gemini returned no candidates: {reason}"))
        })?;

        let mut text = Vec::new();
        let mut tool_calls = Vec::new();
        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if let Some(chunk) = part.text {
                text.push(chunk);
            }
            if let Some(call) = part.function_call {
                let arguments = match call.args {
                    Value::Object(map) => map,
                    Value::Null => serde_json::Map::new(),
                    _ => {
                        return Err(AgentError::llm(
                            Some(200),
                            format!("arguments for tool '{}' are not a JSON object", call.name),
                        ));
                    }
                };
                // Gemini does not issue call ids
                let id = format!("gemini-call-{}", tool_calls.len());
                tool_calls.push(ToolCall::new(call.name, arguments).with_id(id));
            }
        }

        Ok(ToolCompletion {
            content: text.join(""),
            tool_calls,
        })
    }

    async fn complete(&self, prompt: &str, tools: &[ToolSchema], options: &GenerationOptions) -> Result<ToolCompletion> {
        let url = format!("{}/models/{}:generateContent", self.base_url, options.model);
        let body = Self::request_body(prompt, tools, options);

        tracing::debug!(provider = "gemini", model = %options.model, tools = tools.len(), "Sending completion request");

        let request = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body);
        let response: GenerateContentResponse = http::send_json(request, "Gemini").await?;
        Self::parse_response(response)
    }
}

/// Rewrite a JSON Schema into Gemini's dialect. Keywords are rewritten only
/// at schema level; the keys of `properties` are parameter names and are kept
/// as they are.
pub fn gemini_schema(schema: Value) -> Value {
    let Value::Object(map) = schema else {
        return schema;
    };

    let mut out = serde_json::Map::new();
    for (key, value) in map {
        match key.as_str() {
            "default" => {}
            "type" => {
                let upper = value.as_str().map_or_else(|| value.clone(), |t| json!(t.to_uppercase()));
                out.insert(key, upper);
            }
            "properties" => {
                let properties = match value {
                    Value::Object(fields) => Value::Object(
                        fields
                            .into_iter()
                            .map(|(name, field)| (name, gemini_schema(field)))
                            .collect(),
                    ),
                    other => other,
                };
                out.insert(key, properties);
            }
            "items" => {
                out.insert(key, gemini_schema(value));
            }
            _ => {
                out.insert(key, value);
            }
        }
    }
    if out.get("type").and_then(Value::as_str) == Some("ARRAY") && !out.contains_key("items") {
        out.insert("items".into(), json!({ "type": "STRING" }));
    }
    Value::Object(out)
}

#[async_trait]
impl AiService for GeminiService {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn default_options(&self) -> GenerationOptions {
        GenerationOptions::for_model(self.model.as_str())
    }

    async fn generate_completion(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        let completion = self.complete(prompt, &[], options).await?;
        if completion.content.trim().is_empty() {
            return Err(AgentError::llm(Some(200), "Gemini returned an empty completion"));
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
            return Err(AgentError::llm(Some(200), "Gemini returned neither text nor tool calls"));
        }
        Ok(completion)
    }

    async fn health_check(&self) -> Result<bool> {
        let request = self
            .client
            .get(format!("{}/models", self.base_url))
            .header("x-goog-api-key", &self.api_key);
        http::probe(request, "Gemini").await
    }
}

// --- Gemini API types ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::tool::ParameterSchema;

    #[test]
    fn test_schema_types_are_uppercased() {
        let tool = ToolSchema {
            name: "getTime".into(),
            description: "Current time".into(),
            parameters: vec![
                ParameterSchema::optional("format", "string", "Format")
                    .with_default(json!("iso"))
                    .with_enum(vec![json!("iso"), json!("unix")]),
                ParameterSchema::required("tags", "array", "Tags"),
            ],
        };
        let schema = gemini_schema(tool.to_json_schema());

        assert_eq!(schema["type"], "OBJECT");
        assert_eq!(schema["properties"]["format"]["type"], "STRING");
        assert!(schema["properties"]["format"].get("default").is_none());
        assert_eq!(schema["properties"]["format"]["enum"], json!(["iso", "unix"]));
        assert_eq!(schema["properties"]["tags"]["items"]["type"], "STRING");
        assert_eq!(schema["required"], json!(["tags"]));
    }

    #[test]
    fn test_parameters_named_like_keywords_survive() {
        let tool = ToolSchema {
            name: "configure".into(),
            description: "Set options".into(),
            parameters: vec![
                ParameterSchema::required("default", "boolean", "Use defaults"),
                ParameterSchema::required("type", "string", "kind"),
            ],
        };
        let schema = gemini_schema(tool.to_json_schema());

        assert_eq!(schema["properties"]["default"]["type"], "BOOLEAN");
        assert_eq!(schema["properties"]["type"]["type"], "STRING");
        assert_eq!(schema["properties"]["type"]["description"], "kind");
        let required = schema["required"].as_array().unwrap();
        for name in required {
            assert!(schema["properties"].get(name.as_str().unwrap()).is_some());
        }
        assert_eq!(required.len(), 2);
    }

    #[test]
    fn test_request_body_shape() {
        let options = GenerationOptions::for_model("gemini-1.5-flash").with_system_prompt("Be brief.");
        let body = GeminiService::request_body("hello", &[], &options);

        assert_eq!(body["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Be brief.");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 2048);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_parse_text_and_function_call() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        { "text": "Checking." },
                        { "functionCall": { "name": "getTime", "args": { "format": "unix" } } }
                    ]
                },
                "finishReason": "STOP"
            }]
        }))
        .unwrap();

        let completion = GeminiService::parse_response(response).unwrap();
        assert_eq!(completion.content, "Checking.");
        assert_eq!(completion.tool_calls.len(), 1);
        assert_eq!(completion.tool_calls[0].name, "getTime");
        assert_eq!(completion.tool_calls[0].arguments["format"], "unix");
    }

    #[test]
    fn test_blocked_prompt_is_error() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "promptFeedback": { "blockReason": "SAFETY" }
        }))
        .unwrap();

        let err = GeminiService::parse_response(response).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }
}
