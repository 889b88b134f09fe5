//! Core configuration from environment variables
//!
//! Every setting has a default. A variable that is set but cannot be parsed
//! is reported with a warning and the default is kept.

use std::str::FromStr;
use std::time::Duration;

use crate::agent::AgentConfig;
use crate::memory::MemoryConfig;
use crate::monitor::MonitorConfig;
use crate::session::SessionConfig;

#[derive(Clone, Debug, Default)]
pub struct CoreConfig {
    pub memory: MemoryConfig,
    pub agent: AgentConfig,
    pub monitor: MonitorConfig,
    pub sessions: SessionConfig,
}

impl CoreConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let env = Lookup(&lookup);
        let mut config = Self::default();

        let memory = &mut config.memory;
        memory.max_conversation_length =
            env.positive("RELAY_MAX_CONVERSATION_LENGTH", memory.max_conversation_length);
        memory.context_window = env.positive("RELAY_CONTEXT_WINDOW", memory.context_window);

        let agent = &mut config.agent;
        agent.max_tool_iterations = env.parse("RELAY_MAX_TOOL_ITERATIONS", agent.max_tool_iterations);
        agent.provider_timeout = env.seconds("RELAY_PROVIDER_TIMEOUT_SECS", agent.provider_timeout);
        agent.max_prompt_tokens = env.positive("RELAY_MAX_PROMPT_TOKENS", agent.max_prompt_tokens);
        if let Some(prompt) = env.text("RELAY_SYSTEM_PROMPT") {
            agent.system_prompt = prompt;
        }
        if let Some(terms) = env.text("RELAY_BLOCKED_TERMS") {
            agent.blocked_terms = terms
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect();
        }

        config.sessions.idle_ttl = env.seconds("RELAY_SESSION_TTL_SECS", config.sessions.idle_ttl);
        config.sessions.max_sessions = env.positive("RELAY_MAX_SESSIONS", config.sessions.max_sessions);

        config.monitor.threshold = env.positive("RELAY_ERROR_RATE_THRESHOLD", config.monitor.threshold);
        config.monitor.window = env.seconds("RELAY_ERROR_RATE_WINDOW_SECS", config.monitor.window);

        config
    }
}

struct Lookup<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Lookup<'_, F> {
    fn text(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse<T: FromStr + Copy>(&self, key: &str, default: T) -> T {
        let Some(raw) = self.text(key) else {
            return default;
        };
        raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Ignoring invalid setting, using default");
            default
        })
    }

    fn positive(&self, key: &str, default: usize) -> usize {
        match self.parse(key, default) {
            0 => {
                tracing::warn!(key, "Setting must be positive, using default");
                default
            }
            n => n,
        }
    }

    fn seconds(&self, key: &str, default: Duration) -> Duration {
        Duration::from_secs(self.parse(key, default.as_secs()))
    }
}
