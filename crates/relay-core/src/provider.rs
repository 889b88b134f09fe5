//! AI Service Strategy Pattern
//!
//! One interface for every LLM vendor (OpenAI, Anthropic, Gemini, Ollama).
//! Vendor differences that matter to the agent, such as function-calling
//! support and context-window size, are carried as data in
//! [`AiModelDescriptor`] instead of branches in the agent.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relay_core::provider::{AiService, GenerationOptions};
//!
//! let service: Arc<dyn AiService> = Arc::new(OpenAiService::new(api_key));
//! let text = service.generate_completion("Say hi", &GenerationOptions::default()).await?;
//! ```

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::analysis::{self, CodeAnalysis};
use crate::error::{AgentError, Result};
use crate::tool::{ToolCall, ToolSchema};

/// Configuration for LLM generation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model identifier (e.g., "gpt-4o", "claude-3-5-sonnet-latest", "llama3.2")
    pub model: String,

    /// Temperature for sampling (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Stop sequences
    #[serde(default)]
    pub stop_sequences: Vec<String>,

    /// System instructions, sent through the provider's native system slot
    #[serde(default)]
    pub system_prompt: Option<String>,
}

const fn default_temperature() -> f32 {
    0.7
}

const fn default_max_tokens() -> u32 {
    2048
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".into(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            stop_sequences: Vec::new(),
            system_prompt: None,
        }
    }
}

impl GenerationOptions {
    pub fn for_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

/// Common shape of a tool-augmented completion
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ToolCompletion {
    pub content: String,

    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl ToolCompletion {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Supported LLM vendors
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Gemini,
    Ollama,
}

impl ProviderKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::Ollama => "ollama",
        }
    }

    /// Model used when none is configured
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-4o-mini",
            Self::Anthropic => "claude-3-5-sonnet-latest",
            Self::Gemini => "gemini-1.5-flash",
            Self::Ollama => "llama3.2",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "gemini" | "google" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(AgentError::System(format!("unknown provider '{other}'"))),
        }
    }
}

/// Static capability metadata for one backend model
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiModelDescriptor {
    pub id: String,
    pub provider: ProviderKind,
    pub context_window_tokens: usize,
    pub supports_function_calling: bool,
    pub supports_images: bool,
}

/// Known models: (provider, id, context window, function calling, images)
const CATALOG: &[(ProviderKind, &str, usize, bool, bool)] = &[
    (ProviderKind::OpenAi, "gpt-4o", 128_000, true, true),
    (ProviderKind::OpenAi, "gpt-4o-mini", 128_000, true, true),
    (ProviderKind::OpenAi, "gpt-4-turbo", 128_000, true, true),
    (ProviderKind::OpenAi, "gpt-3.5-turbo", 16_385, true, false),
    (ProviderKind::OpenAi, "o1-mini", 128_000, false, false),
    (ProviderKind::Anthropic, "claude-3-5-sonnet-latest", 200_000, true, true),
    (ProviderKind::Anthropic, "claude-3-5-haiku-latest", 200_000, true, false),
    (ProviderKind::Anthropic, "claude-3-opus-latest", 200_000, true, true),
    (ProviderKind::Gemini, "gemini-2.0-flash", 1_048_576, true, true),
    (ProviderKind::Gemini, "gemini-1.5-pro", 2_097_152, true, true),
    (ProviderKind::Gemini, "gemini-1.5-flash", 1_048_576, true, true),
    (ProviderKind::Ollama, "llama3.2", 128_000, false, false),
    (ProviderKind::Ollama, "mistral", 32_768, false, false),
    (ProviderKind::Ollama, "qwen2.5-coder", 32_768, false, false),
];

/// Context window assumed for models missing from the catalogue
pub const FALLBACK_CONTEXT_WINDOW: usize = 8_192;

/// Catalogue entries for one provider
pub fn catalog(provider: ProviderKind) -> Vec<AiModelDescriptor> {
    CATALOG
        .iter()
        .filter(|entry| entry.0 == provider)
        .map(|&(provider, id, context, tools, images)| AiModelDescriptor {
            id: id.into(),
            provider,
            context_window_tokens: context,
            supports_function_calling: tools,
            supports_images: images,
        })
        .collect()
}

/// Look up a model; unknown models get a conservative descriptor
/// (small window, no function calling).
pub fn describe(provider: ProviderKind, model: &str) -> AiModelDescriptor {
    catalog(provider)
        .into_iter()
        .find(|d| d.id == model)
        .unwrap_or_else(|| AiModelDescriptor {
            id: model.into(),
            provider,
            context_window_tokens: FALLBACK_CONTEXT_WINDOW,
            supports_function_calling: false,
            supports_images: false,
        })
}

const ANALYSIS_PROMPT: &str = r#"You are a senior code reviewer. Analyze the code you are given and respond with ONLY a JSON object of this shape:
{"summary": string, "complexity": "Low" | "Medium" | "High", "qualityIssues": [string], "securityIssues": [string], "suggestions": [string], "dependencies": [string]}"#;

/// Strategy trait for LLM backends
///
/// Implement this trait to add support for new LLM vendors.
/// The agent works exclusively through this interface.
#[async_trait]
pub trait AiService: Send + Sync {
    /// Which vendor this adapter talks to
    fn kind(&self) -> ProviderKind;

    /// Options used when a caller does not supply its own
    fn default_options(&self) -> GenerationOptions;

    /// Plain text completion
    async fn generate_completion(&self, prompt: &str, options: &GenerationOptions) -> Result<String>;

    /// Completion that may request tool calls. Adapters whose model cannot
    /// call functions return the text with no tool calls.
    async fn generate_with_tools(
        &self,
        prompt: &str,
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> Result<ToolCompletion>;

    /// Structured review of a code snippet
    async fn analyze_code(&self, code: &str, language: &str) -> Result<CodeAnalysis> {
        let options = GenerationOptions {
            temperature: 0.2,
            ..self.default_options()
        }
        .with_system_prompt(ANALYSIS_PROMPT);
        let prompt = format!("Language: {language}\n\n```{language}\n{code}\n```");

        let raw = self.generate_completion(&prompt, &options).await?;
        analysis::parse_analysis(&raw)
    }

    /// Capability metadata for `model`
    fn describe_model(&self, model: &str) -> AiModelDescriptor {
        describe(self.kind(), model)
    }

    /// Models this adapter knows about
    fn models(&self) -> Vec<AiModelDescriptor> {
        catalog(self.kind())
    }

    /// Check if the backend is reachable and configured correctly
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
