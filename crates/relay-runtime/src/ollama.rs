//! Ollama AI Service
//!
//! Implementation of `AiService` for local Ollama inference. Catalogue
//! models are marked without function calling, so the agent only uses
//! plain completions here.

use async_trait::async_trait;
use ollama_rs::{
    generation::{
        chat::{ChatMessage, ChatMessageResponse, MessageRole, request::ChatMessageRequest},
    },
    models::ModelOptions as OllamaOptions,
    Ollama,
};
use relay_core::provider::{AiService, GenerationOptions, ProviderKind, ToolCompletion};
use relay_core::tool::ToolSchema;
use relay_core::{AgentError, Result};

/// Ollama connection settings
#[derive(Clone, Debug)]
pub struct OllamaConfig {
    /// Ollama host URL
    pub host: String,

    /// Ollama port
    pub port: u16,

    /// Model used when the caller does not pick one
    pub model: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost".into(),
            port: 11434,
            model: ProviderKind::Ollama.default_model().into(),
        }
    }
}

/// Ollama LLM service
pub struct OllamaService {
    client: Ollama,
    config: OllamaConfig,
}

impl OllamaService {
    pub fn new(config: OllamaConfig) -> Self {
        Self {
            client: Ollama::new(&config.host, config.port),
            config,
        }
    }

    /// Create with default localhost settings
    pub fn localhost() -> Self {
        Self::new(OllamaConfig::default())
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    fn build_messages(prompt: &str, options: &GenerationOptions) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &options.system_prompt {
            messages.push(ChatMessage::new(MessageRole::System, system.clone()));
        }
        messages.push(ChatMessage::new(MessageRole::User, prompt.to_string()));
        messages
    }

    fn build_options(options: &GenerationOptions) -> OllamaOptions {
        OllamaOptions::default()
            .temperature(options.temperature)
            .num_predict(i32::try_from(options.max_tokens).unwrap_or(i32::MAX))
    }

    fn completion_text(response: ChatMessageResponse) -> Result<String> {
        let content = response.message.content;
        if content.trim().is_empty() {
            return Err(AgentError::llm(None, "Ollama returned an empty completion"));
        }
        Ok(content)
    }
}

#[async_trait]
impl AiService for OllamaService {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn default_options(&self) -> GenerationOptions {
        GenerationOptions::for_model(self.config.model.as_str())
    }

    async fn generate_completion(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        let request = ChatMessageRequest::new(options.model.clone(), Self::build_messages(prompt, options))
            .options(Self::build_options(options));

        tracing::debug!(provider = "ollama", model = %options.model, "Sending chat request");

        let response = self
            .client
            .send_chat_messages(request)
            .await
            .map_err(|e| AgentError::llm(None, format!("Ollama request failed: {e}")))?;

        Self::completion_text(response)
    }

    /// No native function calling; answers with text only
    async fn generate_with_tools(
        &self,
        prompt: &str,
        _tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> Result<ToolCompletion> {
        self.generate_completion(prompt, options).await.map(ToolCompletion::text)
    }

    async fn health_check(&self) -> Result<bool> {
        match self.client.list_local_models().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!("Ollama health check failed: {}", e);
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = OllamaConfig::default();
        assert_eq!(config.host, "http://localhost");
        assert_eq!(config.port, 11434);
        assert_eq!(config.model, "llama3.2");
    }

    #[test]
    fn test_message_conversion() {
        let options = GenerationOptions::for_model("llama3.2").with_system_prompt("You are helpful.");
        assert_eq!(OllamaService::build_messages("Hello", &options).len(), 2);
        assert_eq!(
            OllamaService::build_messages("Hello", &GenerationOptions::default()).len(),
            1
        );
    }

    #[test]
    fn test_catalogue_models_have_no_function_calling() {
        let service = OllamaService::localhost();
        assert!(!service.models().is_empty());
        assert!(service.models().iter().all(|m| !m.supports_function_calling));
        assert_eq!(service.default_options().model, "llama3.2");
    }
}
