//! Provider credentials and endpoints from environment variables

use relay_core::ProviderKind;

#[derive(Clone, Debug, Default)]
pub struct ProviderSettings {
    /// Explicit choice from `RELAY_PROVIDER`
    pub preferred: Option<ProviderKind>,
    /// Model override from `RELAY_MODEL`
    pub model: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub ollama_host: Option<String>,
    pub ollama_port: Option<u16>,
}

impl ProviderSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let preferred = get("RELAY_PROVIDER").and_then(|raw| match raw.parse() {
            Ok(kind) => Some(kind),
            Err(e) => {
                tracing::warn!(value = %raw, error = %e, "Ignoring RELAY_PROVIDER");
                None
            }
        });
        let ollama_port = get("OLLAMA_PORT").and_then(|raw| match raw.parse() {
            Ok(port) => Some(port),
            Err(_) => {
                tracing::warn!(value = %raw, "Ignoring invalid OLLAMA_PORT");
                None
            }
        });

        Self {
            preferred,
            model: get("RELAY_MODEL"),
            openai_api_key: get("OPENAI_API_KEY"),
            openai_base_url: get("OPENAI_BASE_URL"),
            anthropic_api_key: get("ANTHROPIC_API_KEY"),
            gemini_api_key: get("GEMINI_API_KEY").or_else(|| get("GOOGLE_GENERATIVE_AI_API_KEY")),
            ollama_host: get("OLLAMA_HOST"),
            ollama_port,
        }
    }

    /// Whether enough is configured to talk to `kind`
    pub const fn has_credentials(&self, kind: ProviderKind) -> bool {
        match kind {
            ProviderKind::OpenAi => self.openai_api_key.is_some(),
            ProviderKind::Anthropic => self.anthropic_api_key.is_some(),
            ProviderKind::Gemini => self.gemini_api_key.is_some(),
            ProviderKind::Ollama => self.ollama_host.is_some(),
        }
    }

    /// Configured model, or the provider's default. `RELAY_MODEL` names a
    /// model of the preferred provider, so a fallback provider ignores it.
    pub fn model_for(&self, kind: ProviderKind) -> String {
        let applies = self.preferred.is_none_or(|preferred| preferred == kind);
        match &self.model {
            Some(model) if applies => model.clone(),
            _ => kind.default_model().to_string(),
        }
    }
}
