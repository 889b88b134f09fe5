//! # relay-core
//!
//! Agent orchestration core: session memory, token-budgeted prompts, tool
//! execution, a provider-agnostic AI service contract and one error
//! taxonomy, coordinated by [`Agent`].
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                              Agent                               │
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────────────┐  │
//! │  │   Memory     │──│   Prompt     │──│   AiService            │  │
//! │  │   Manager    │  │   Manager    │  │   (Strategy)           │  │
//! │  └──────────────┘  └──────────────┘  └────────────────────────┘  │
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────────────┐  │
//! │  │   Tool       │──│   State      │  │   ErrorHandler         │  │
//! │  │   Executor   │  │   Manager    │  │   (MonitoringSink)     │  │
//! │  └──────────────┘  └──────────────┘  └────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `AiService` trait lets the agent run against OpenAI, Anthropic,
//! Gemini or Ollama without changing agent logic. Concrete adapters live in
//! `relay-runtime`.

pub mod agent;
pub mod analysis;
pub mod config;
pub mod error;
pub mod memory;
pub mod monitor;
pub mod prompt;
pub mod provider;
pub mod session;
pub mod state;
pub mod tool;

pub use agent::{Agent, AgentBuilder, AgentConfig, AgentResponse};
pub use config::CoreConfig;
pub use error::{AgentError, Result};
pub use memory::{Interaction, MemoryConfig, MemoryManager};
pub use monitor::{ErrorCategory, ErrorHandler, MonitoredError, MonitoringSink};
pub use provider::{AiModelDescriptor, AiService, GenerationOptions, ProviderKind, ToolCompletion};
pub use state::StateManager;
pub use tool::{Tool, ToolCall, ToolExecutor, ToolSchema};
