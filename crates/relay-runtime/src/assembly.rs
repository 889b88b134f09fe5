//! Agent assembly
//!
//! Builds the whole object graph explicitly, in dependency order:
//! Error Handler → AI Service → Memory / Prompt / Tool managers → Agent.

use std::sync::Arc;
use std::time::Duration;

use relay_core::monitor::{MonitoringSink, TracingSink};
use relay_core::{Agent, AgentError, AiService, CoreConfig, ErrorHandler, ProviderKind, Result, ToolExecutor};

use crate::anthropic::AnthropicService;
use crate::gemini::GeminiService;
use crate::openai::OpenAiService;
use crate::select::select_provider;
use crate::settings::ProviderSettings;

/// Everything needed to build an [`Agent`]
#[derive(Clone)]
pub struct RuntimeConfig {
    pub core: CoreConfig,
    pub providers: ProviderSettings,
    pub sink: Arc<dyn MonitoringSink>,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self {
            core: CoreConfig::from_env(),
            providers: ProviderSettings::from_env(),
            sink: Arc::new(TracingSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn MonitoringSink>) -> Self {
        self.sink = sink;
        self
    }
}

/// Build an agent with the built-in tools
pub fn assemble(config: RuntimeConfig) -> Result<Agent> {
    assemble_with_tools(config, ToolExecutor::with_builtins())
}

pub fn assemble_with_tools(config: RuntimeConfig, tools: ToolExecutor) -> Result<Agent> {
    let errors = Arc::new(ErrorHandler::new(config.sink, config.core.monitor));

    let kind = select_provider(&config.providers)?;
    let service = build_service(kind, &config.providers, config.core.agent.provider_timeout)?;
    tracing::info!(
        provider = %kind,
        model = %service.default_options().model,
        tools = tools.len(),
        "AI service selected"
    );

    Agent::builder()
        .service(service)
        .error_handler(errors)
        .tools(tools)
        .memory_config(config.core.memory)
        .session_config(config.core.sessions)
        .config(config.core.agent)
        .build()
}

/// Construct the adapter for `kind` from its settings
pub fn build_service(kind: ProviderKind, settings: &ProviderSettings, timeout: Duration) -> Result<Arc<dyn AiService>> {
    let model = settings.model_for(kind);
    let missing = || AgentError::System(format!("no credentials configured for {kind}"));

    let service: Arc<dyn AiService> = match kind {
        ProviderKind::OpenAi => {
            let key = settings.openai_api_key.clone().ok_or_else(missing)?;
            let service = OpenAiService::new(key, model, timeout)?;
            match &settings.openai_base_url {
                Some(url) => Arc::new(service.with_base_url(url.as_str())),
                None => Arc::new(service),
            }
        }
        ProviderKind::Anthropic => {
            let key = settings.anthropic_api_key.clone().ok_or_else(missing)?;
            Arc::new(AnthropicService::new(key, model, timeout)?)
        }
        ProviderKind::Gemini => {
            let key = settings.gemini_api_key.clone().ok_or_else(missing)?;
            Arc::new(GeminiService::new(key, model, timeout)?)
        }
        ProviderKind::Ollama => build_ollama(settings, model)?,
    };
    Ok(service)
}

#[cfg(feature = "ollama")]
fn build_ollama(settings: &ProviderSettings, model: String) -> Result<Arc<dyn AiService>> {
    use crate::ollama::{OllamaConfig, OllamaService};

    let defaults = OllamaConfig::default();
    let config = OllamaConfig {
        host: settings.ollama_host.clone().unwrap_or(defaults.host),
        port: settings.ollama_port.unwrap_or(defaults.port),
        model,
    };
    Ok(Arc::new(OllamaService::new(config)))
}

#[cfg(not(feature = "ollama"))]
fn build_ollama(_settings: &ProviderSettings, _model: String) -> Result<Arc<dyn AiService>> {
    Err(AgentError::System("built without the `ollama` feature".into()))
}
