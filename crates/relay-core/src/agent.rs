//! Agent Coordinator
//!
//! Runs one turn per request:
//!
//! ```text
//! Received → ContextAssembled → ModelInvoked
//!          → (ToolsPending → ToolsExecuted → ModelReinvoked)*
//!          → MemoryUpdated → Responded | Failed
//! ```
//!
//! Every exit is either an [`AgentResponse`] or a [`MonitoredError`]
//! produced by the [`ErrorHandler`]. Provider and tool errors never reach
//! the caller raw.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::analysis::CodeAnalysis;
use crate::error::{AgentError, Result};
use crate::memory::{Interaction, LlmSummarizer, MemoryConfig, MemoryManager, Summarizer};
use crate::monitor::{ErrorContext, ErrorHandler, MonitoredError};
use crate::prompt::{estimate_token_count, PromptManager, PromptRequest};
use crate::provider::{AiModelDescriptor, AiService, GenerationOptions, ToolCompletion};
use crate::session::{SessionConfig, SessionRegistry};
use crate::state::StateManager;
use crate::tool::{panic_message, ToolCall, ToolContext, ToolExecutor};

/// State key holding the most recent tool outcome of a session
pub const LAST_TOOL_RESULT_KEY: &str = "last_tool_result";

/// Tool output longer than this is cut before it goes back to the model
const MAX_TOOL_OUTPUT_CHARS: usize = 4_000;

const TOOL_RESULT_SEPARATOR: &str = "\n\n";
const TOOL_RESULTS_OMITTED: &str = "[earlier tool results omitted]";
const TRUNCATED_SUFFIX: &str = "… [truncated]";

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant. \
Use the available tools when they help you answer accurately. \
After receiving tool results, synthesize them into a helpful response. \
Be concise and accurate.";

/// Agent configuration
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// System prompt sent with every turn
    pub system_prompt: String,

    /// Tool rounds allowed per turn before it fails
    pub max_tool_iterations: usize,

    /// Deadline for each provider call
    pub provider_timeout: Duration,

    /// Upper bound on prompt size, further limited by the model's window
    pub max_prompt_tokens: usize,

    /// Longest accepted user input, in characters
    pub max_input_chars: usize,

    /// Case-insensitive terms that block a request
    pub blocked_terms: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            max_tool_iterations: 5,
            provider_timeout: Duration::from_secs(60),
            max_prompt_tokens: 16_000,
            max_input_chars: 32_000,
            blocked_terms: Vec::new(),
        }
    }
}

/// Successful result of a turn
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentResponse {
    pub text: String,
    pub session_id: String,
    /// Tool calls executed during the turn, in order
    pub tool_calls: Vec<ToolCall>,
    pub model: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TurnState {
    Received,
    ContextAssembled,
    ModelInvoked,
    ToolsPending,
    ToolsExecuted,
    ModelReinvoked,
    MemoryUpdated,
    Responded,
    Failed,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::ContextAssembled => "context_assembled",
            Self::ModelInvoked => "model_invoked",
            Self::ToolsPending => "tools_pending",
            Self::ToolsExecuted => "tools_executed",
            Self::ModelReinvoked => "model_reinvoked",
            Self::MemoryUpdated => "memory_updated",
            Self::Responded => "responded",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

fn transition(session_id: &str, state: TurnState) {
    tracing::debug!(session = %session_id, state = %state, "Turn state");
}

/// The main Agent struct
pub struct Agent {
    service: Arc<dyn AiService>,
    memory: Arc<MemoryManager>,
    prompts: PromptManager,
    tools: Arc<ToolExecutor>,
    state: Arc<StateManager>,
    errors: Arc<ErrorHandler>,
    sessions: SessionRegistry,
    options: GenerationOptions,
    config: AgentConfig,
}

impl Agent {
    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    /// Process one user turn for `session_id`
    pub async fn handle_request(
        &self,
        user_input: &str,
        session_id: &str,
    ) -> std::result::Result<AgentResponse, MonitoredError> {
        let context = ErrorContext::new()
            .with("session_id", session_id)
            .with("operation", "handle_request")
            .with("model", self.options.model.as_str());

        match AssertUnwindSafe(self.run_turn(user_input, session_id))
            .catch_unwind()
            .await
        {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => {
                transition(session_id, TurnState::Failed);
                Err(self.errors.handle(&e, &context))
            }
            Err(payload) => {
                transition(session_id, TurnState::Failed);
                let description = format!("turn panicked: {}", panic_message(payload.as_ref()));
                Err(self.errors.handle_unknown(&description, &context))
            }
        }
    }

    async fn run_turn(&self, user_input: &str, session_id: &str) -> Result<AgentResponse> {
        self.validate(user_input, session_id)?;

        let _turn = self.sessions.acquire(session_id).await;
        transition(session_id, TurnState::Received);

        let descriptor = self.service.describe_model(&self.options.model);
        let budget = self.prompt_budget(&descriptor);
        let prompt = self
            .prompts
            .build_prompt(session_id, user_input, &self.config.system_prompt, budget)
            .await?;
        transition(session_id, TurnState::ContextAssembled);

        let options = self.options.clone().with_system_prompt(&prompt.system_prompt);
        let (text, tool_calls) = if descriptor.supports_function_calling && !self.tools.is_empty() {
            self.run_with_tools(session_id, &prompt, &options, budget).await?
        } else {
            let text = self
                .with_timeout(self.service.generate_completion(&prompt.body_text(), &options))
                .await?;
            transition(session_id, TurnState::ModelInvoked);
            (text, Vec::new())
        };

        let mut interaction = Interaction::new(user_input, text.as_str()).with_metadata("model", options.model.as_str());
        if !tool_calls.is_empty() {
            let names: Vec<&str> = tool_calls.iter().map(|c| c.name.as_str()).collect();
            interaction = interaction.with_metadata("tool_calls", json!(names));
        }
        self.memory.store_interaction(session_id, interaction).await?;
        transition(session_id, TurnState::MemoryUpdated);

        tracing::info!(
            session = %session_id,
            model = %options.model,
            tools = tool_calls.len(),
            "Turn completed"
        );
        transition(session_id, TurnState::Responded);

        Ok(AgentResponse {
            text,
            session_id: session_id.to_string(),
            tool_calls,
            model: options.model,
        })
    }

    async fn run_with_tools(
        &self,
        session_id: &str,
        prompt: &PromptRequest,
        options: &GenerationOptions,
        budget: usize,
    ) -> Result<(String, Vec<ToolCall>)> {
        let schemas = self.tools.schemas();
        let ctx = ToolContext::new(session_id, self.state.clone());
        let body = prompt.body_text();
        // tokens left for tool results once system prompt, body and separator are counted
        let room = budget.saturating_sub(
            prompt.estimated_tokens() + estimate_token_count(TOOL_RESULT_SEPARATOR),
        );
        let mut results = Vec::new();
        let mut executed = Vec::new();

        let mut completion: ToolCompletion = self
            .with_timeout(self.service.generate_with_tools(&body, &schemas, options))
            .await?;
        transition(session_id, TurnState::ModelInvoked);

        let mut rounds = 0;
        while completion.has_tool_calls() {
            if rounds == self.config.max_tool_iterations {
                return Err(AgentError::System(format!(
                    "model kept requesting tools after {rounds} rounds"
                )));
            }
            rounds += 1;
            transition(session_id, TurnState::ToolsPending);

            for call in completion.tool_calls {
                results.push(self.run_tool(&call, &ctx).await);
                executed.push(call);
            }
            transition(session_id, TurnState::ToolsExecuted);

            let transcript = fit_tool_results(&results, room);
            let followup = if transcript.is_empty() {
                body.clone()
            } else {
                format!("{body}{TOOL_RESULT_SEPARATOR}{transcript}")
            };
            completion = self
                .with_timeout(self.service.generate_with_tools(&followup, &schemas, options))
                .await?;
            transition(session_id, TurnState::ModelReinvoked);
        }

        Ok((completion.content, executed))
    }

    /// Execute one call and render its outcome for the model. Failures are
    /// reported and handed back to the model instead of ending the turn.
    async fn run_tool(&self, call: &ToolCall, ctx: &ToolContext) -> String {
        let outcome = self.tools.execute_call(call, ctx).await;

        let (record, rendered) = match &outcome {
            Ok(value) => (
                json!({ "tool": call.name, "ok": true, "result": value }),
                format!("[Tool '{}' returned]\n{}", call.name, clip(&value.to_string())),
            ),
            Err(e) => {
                let context = ErrorContext::new()
                    .with("session_id", ctx.session_id.as_str())
                    .with("operation", "tool_call")
                    .with("tool", call.name.as_str());
                self.errors.handle(e, &context);
                (
                    json!({ "tool": call.name, "ok": false, "error": e.to_string() }),
                    format!("[Tool '{}' failed]\n{e}", call.name),
                )
            }
        };

        self.state.set(&ctx.session_id, LAST_TOOL_RESULT_KEY, record).await;
        rendered
    }

    fn validate(&self, user_input: &str, session_id: &str) -> Result<()> {
        if session_id.trim().is_empty() {
            return Err(AgentError::InputValidation("session id must not be empty".into()));
        }
        if user_input.trim().is_empty() {
            return Err(AgentError::InputValidation("input must not be empty".into()));
        }
        let chars = user_input.chars().count();
        if chars > self.config.max_input_chars {
            return Err(AgentError::InputValidation(format!(
                "input is {chars} characters, limit is {}",
                self.config.max_input_chars
            )));
        }

        let lowered = user_input.to_lowercase();
        if let Some(term) = self
            .config
            .blocked_terms
            .iter()
            .find(|term| !term.is_empty() && lowered.contains(&term.to_lowercase()))
        {
            return Err(AgentError::Governance {
                category: "blocked_term".into(),
                message: format!("input contains blocked term '{term}'"),
            });
        }
        Ok(())
    }

    fn prompt_budget(&self, descriptor: &AiModelDescriptor) -> usize {
        let window_room = descriptor
            .context_window_tokens
            .saturating_sub(self.options.max_tokens as usize);
        self.config.max_prompt_tokens.min(window_room)
    }

    async fn with_timeout<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        let limit = self.config.provider_timeout;
        tokio::time::timeout(limit, call)
            .await
            .map_err(|_| AgentError::timeout(limit))?
    }

    /// Structured review of a code snippet through the active provider
    pub async fn analyze_code(&self, code: &str, language: &str) -> std::result::Result<CodeAnalysis, MonitoredError> {
        let outcome = self.with_timeout(self.service.analyze_code(code, language)).await;
        outcome.map_err(|e| {
            let context = ErrorContext::new()
                .with("operation", "analyze_code")
                .with("language", language);
            self.errors.handle(&e, &context)
        })
    }

    /// Drop memory, state and lock of idle sessions. Returns how many went.
    ///
    /// Memory and state are removed while the session lock is held and
    /// before the slot is retired, so a request arriving meanwhile queues
    /// on that lock and starts from an empty session.
    pub async fn evict_idle_sessions(&self) -> usize {
        let mut evicted = 0;
        for candidate in self.sessions.eviction_candidates() {
            let Some(_turn) = candidate.try_lock() else {
                continue;
            };
            if !self.sessions.is_current(&candidate) {
                continue;
            }
            self.memory.remove_session(&candidate.session_id).await;
            self.state.remove_session(&candidate.session_id).await;
            if !self.sessions.retire(&candidate) {
                tracing::debug!(session = %candidate.session_id, "Session reused during eviction, slot kept");
            }
            evicted += 1;
        }

        if evicted > 0 {
            tracing::info!(evicted, remaining = self.sessions.len(), "Evicted idle sessions");
        }
        evicted
    }

    pub async fn health_check(&self) -> Result<bool> {
        self.service.health_check().await
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn service(&self) -> &dyn AiService {
        self.service.as_ref()
    }

    pub fn model(&self) -> &str {
        &self.options.model
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    pub fn tools(&self) -> &ToolExecutor {
        &self.tools
    }

    pub fn errors(&self) -> &ErrorHandler {
        &self.errors
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }
}

fn clip(text: &str) -> String {
    clip_chars(text, MAX_TOOL_OUTPUT_CHARS)
}

fn clip_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{TRUNCATED_SUFFIX}", &text[..cut]),
        None => text.to_string(),
    }
}

/// Newest tool results that fit in `budget` tokens, oldest dropped first.
/// When not even the newest fits whole it is cut from the end, so its
/// `[Tool ...]` header survives.
fn fit_tool_results(results: &[String], budget: usize) -> String {
    fn render(newest_first: &[&str], total: usize) -> String {
        let mut parts = Vec::with_capacity(newest_first.len() + 1);
        if newest_first.len() < total {
            parts.push(TOOL_RESULTS_OMITTED);
        }
        parts.extend(newest_first.iter().rev().copied());
        parts.join(TOOL_RESULT_SEPARATOR)
    }

    let mut kept: Vec<&str> = Vec::new();
    for result in results.iter().rev() {
        kept.push(result);
        if estimate_token_count(&render(&kept, results.len())) > budget {
            kept.pop();
            break;
        }
    }
    if !kept.is_empty() {
        return render(&kept, results.len());
    }

    let Some(newest) = results.last() else {
        return String::new();
    };
    let overhead = estimate_token_count(&render(&[], results.len()))
        + estimate_token_count(TOOL_RESULT_SEPARATOR)
        + estimate_token_count(TRUNCATED_SUFFIX);
    if budget <= overhead {
        return String::new();
    }
    let clipped = clip_chars(newest, (budget - overhead) * 4);
    render(&[clipped.as_str()], results.len())
}

/// Builder for Agent configuration
#[derive(Default)]
pub struct AgentBuilder {
    service: Option<Arc<dyn AiService>>,
    summarizer: Option<Arc<dyn Summarizer>>,
    tools: ToolExecutor,
    state: Option<Arc<StateManager>>,
    errors: Option<Arc<ErrorHandler>>,
    options: Option<GenerationOptions>,
    memory: MemoryConfig,
    sessions: SessionConfig,
    config: AgentConfig,
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn service(mut self, service: Arc<dyn AiService>) -> Self {
        self.service = Some(service);
        self
    }

    /// Compaction summarizer; defaults to one backed by the service
    pub fn summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn tools(mut self, tools: ToolExecutor) -> Self {
        self.tools = tools;
        self
    }

    pub fn state(mut self, state: Arc<StateManager>) -> Self {
        self.state = Some(state);
        self
    }

    pub fn error_handler(mut self, errors: Arc<ErrorHandler>) -> Self {
        self.errors = Some(errors);
        self
    }

    /// Generation options; defaults to the service's own
    pub fn generation(mut self, options: GenerationOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn memory_config(mut self, config: MemoryConfig) -> Self {
        self.memory = config;
        self
    }

    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.sessions = config;
        self
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = prompt.into();
        self
    }

    pub fn max_tool_iterations(mut self, max: usize) -> Self {
        self.config.max_tool_iterations = max;
        self
    }

    pub fn build(self) -> Result<Agent> {
        let service = self
            .service
            .ok_or_else(|| AgentError::System("an AI service is required".into()))?;

        let summarizer: Arc<dyn Summarizer> = match self.summarizer {
            Some(summarizer) => summarizer,
            None => Arc::new(LlmSummarizer::new(service.clone(), self.config.provider_timeout)),
        };
        let memory = Arc::new(MemoryManager::new(summarizer, self.memory));
        let options = self.options.unwrap_or_else(|| service.default_options());

        Ok(Agent {
            prompts: PromptManager::new(memory.clone()),
            memory,
            tools: Arc::new(self.tools),
            state: self.state.unwrap_or_default(),
            errors: self.errors.unwrap_or_default(),
            sessions: SessionRegistry::new(self.sessions),
            options,
            config: self.config,
            service,
        })
    }
}
