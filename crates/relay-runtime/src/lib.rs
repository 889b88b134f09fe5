//! # relay-runtime
//!
//! Provider adapters and agent assembly for relay.
//!
//! ## Providers
//!
//! - **Anthropic**: Messages API with native tool use
//! - **OpenAI**: Chat Completions with function calling (any compatible endpoint)
//! - **Gemini**: `generateContent` with function declarations
//! - **Ollama** (default feature): local inference, text only
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relay_runtime::{assemble, RuntimeConfig};
//!
//! let agent = assemble(RuntimeConfig::from_env())?;
//! let response = agent.handle_request("Hello", "session-1").await?;
//! ```

pub mod anthropic;
pub mod assembly;
pub mod gemini;
mod http;
pub mod openai;
pub mod select;
pub mod settings;

#[cfg(feature = "ollama")]
pub mod ollama;

pub use anthropic::AnthropicService;
pub use assembly::{assemble, assemble_with_tools, build_service, RuntimeConfig};
pub use gemini::GeminiService;
pub use openai::OpenAiService;
pub use select::select_provider;
pub use settings::ProviderSettings;

#[cfg(feature = "ollama")]
pub use ollama::OllamaService;

// Re-export core types for convenience
pub use relay_core::{Agent, AgentError, AgentResponse, AiService, MonitoredError, ProviderKind, Result};
