//! Provider selection
//!
//! A pure function of the configured credentials: an explicit preference
//! wins when it is usable, otherwise the first provider with credentials in
//! [`FALLBACK_ORDER`] is chosen.

use relay_core::{AgentError, ProviderKind, Result};

use crate::settings::ProviderSettings;

/// Order tried when no usable preference is set. Ollama only counts when a
/// host is configured explicitly.
pub const FALLBACK_ORDER: [ProviderKind; 4] = [
    ProviderKind::Anthropic,
    ProviderKind::OpenAi,
    ProviderKind::Gemini,
    ProviderKind::Ollama,
];

pub fn select_provider(settings: &ProviderSettings) -> Result<ProviderKind> {
    if let Some(preferred) = settings.preferred {
        if settings.has_credentials(preferred) {
            return Ok(preferred);
        }
        tracing::warn!(provider = %preferred, "Preferred provider has no credentials, falling back");
    }

    FALLBACK_ORDER
        .into_iter()
        .find(|kind| settings.has_credentials(*kind))
        .ok_or_else(|| {
            AgentError::System(
                "no AI provider configured: set ANTHROPIC_API_KEY, OPENAI_API_KEY, GEMINI_API_KEY or OLLAMA_HOST"
                    .into(),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_keys(openai: bool, anthropic: bool, gemini: bool, ollama: bool) -> ProviderSettings {
        let key = |set: bool| set.then(|| "key".to_string());
        ProviderSettings {
            openai_api_key: key(openai),
            anthropic_api_key: key(anthropic),
            gemini_api_key: key(gemini),
            ollama_host: key(ollama),
            ..Default::default()
        }
    }

    #[test]
    fn test_fallback_order() {
        assert_eq!(select_provider(&with_keys(true, true, true, true)).unwrap(), ProviderKind::Anthropic);
        assert_eq!(select_provider(&with_keys(true, false, true, true)).unwrap(), ProviderKind::OpenAi);
        assert_eq!(select_provider(&with_keys(false, false, true, true)).unwrap(), ProviderKind::Gemini);
        assert_eq!(select_provider(&with_keys(false, false, false, true)).unwrap(), ProviderKind::Ollama);
    }

    #[test]
    fn test_preference_wins_when_usable() {
        let mut settings = with_keys(true, true, false, false);
        settings.preferred = Some(ProviderKind::OpenAi);
        assert_eq!(select_provider(&settings).unwrap(), ProviderKind::OpenAi);
    }

    #[test]
    fn test_unusable_preference_falls_back() {
        let mut settings = with_keys(false, false, true, false);
        settings.preferred = Some(ProviderKind::Anthropic);
        assert_eq!(select_provider(&settings).unwrap(), ProviderKind::Gemini);
    }

    #[test]
    fn test_nothing_configured_is_system_error() {
        let err = select_provider(&ProviderSettings::default()).unwrap_err();
        assert!(matches!(err, AgentError::System(_)));
    }
}
