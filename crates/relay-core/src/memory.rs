//! Conversation Memory
//!
//! Short-term buffer of turns per session, compacted into a summary once it
//! grows past `max_conversation_length`:
//!
//! ```text
//!   store_interaction ──▶ messages.len() > max && >= min_compaction_length ?
//!                                 │ yes
//!                                 ▼
//!                     summarizer(all messages) ──err──▶ keep everything, retry next store
//!                                 │ ok
//!                                 ▼
//!                 metadata.summary = summary; keep last N messages
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{AgentError, Result};
use crate::provider::{AiService, GenerationOptions};

/// Marker returned for a session with no history
pub const NEW_CONVERSATION_MARKER: &str = "This is the start of a new conversation.";

/// One stored turn. Immutable once appended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub input: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContextMetadata {
    /// Summary of turns dropped by compaction; replaced, never appended
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// Everything remembered about one session's conversation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationContext {
    pub messages: Vec<MemoryEntry>,
    pub metadata: ContextMetadata,
}

impl ConversationContext {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            messages: Vec::new(),
            metadata: ContextMetadata {
                summary: None,
                created_at: now,
                last_updated: now,
            },
        }
    }

    fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.metadata.summary.is_none()
    }
}

/// A turn to be stored
#[derive(Clone, Debug, Default)]
pub struct Interaction {
    pub input: String,
    pub response: String,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl Interaction {
    pub fn new(input: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            response: response.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }
}

#[derive(Clone, Debug)]
pub struct MemoryConfig {
    /// Compaction runs once the buffer holds more than this many turns
    pub max_conversation_length: usize,

    /// Never summarize a buffer shorter than this
    pub min_compaction_length: usize,

    /// Turns kept verbatim after compaction
    pub retained_after_compaction: usize,

    /// Turns rendered into the context block
    pub context_window: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_conversation_length: 20,
            min_compaction_length: 10,
            retained_after_compaction: 5,
            context_window: 5,
        }
    }
}

/// Produces the compaction summary
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, entries: &[MemoryEntry]) -> Result<String>;
}

const SUMMARY_PROMPT: &str = "Summarize the following conversation in a short paragraph. \
Keep names, decisions, open questions and any facts the user shared. Do not add commentary.";

/// Summarizer backed by the configured AI service
pub struct LlmSummarizer {
    service: Arc<dyn AiService>,
    options: GenerationOptions,
    timeout: Duration,
}

impl LlmSummarizer {
    pub fn new(service: Arc<dyn AiService>, timeout: Duration) -> Self {
        let options = GenerationOptions {
            temperature: 0.3,
            max_tokens: 512,
            ..service.default_options()
        }
        .with_system_prompt(SUMMARY_PROMPT);

        Self {
            service,
            options,
            timeout,
        }
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, entries: &[MemoryEntry]) -> Result<String> {
        let transcript = render_turns(entries);
        let summary = tokio::time::timeout(
            self.timeout,
            self.service.generate_completion(&transcript, &self.options),
        )
        .await
        .map_err(|_| AgentError::timeout(self.timeout))??;

        let summary = summary.trim();
        if summary.is_empty() {
            return Err(AgentError::llm(None, "summarizer returned an empty summary"));
        }
        Ok(summary.to_string())
    }
}

/// Session-keyed conversation store
pub struct MemoryManager {
    sessions: RwLock<HashMap<String, ConversationContext>>,
    summarizer: Arc<dyn Summarizer>,
    config: MemoryConfig,
}

impl MemoryManager {
    pub fn new(summarizer: Arc<dyn Summarizer>, config: MemoryConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            summarizer,
            config,
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Context block for a prompt: summary, recent turns, then the current input
    pub async fn get_context(&self, session_id: &str, current_input: &str) -> String {
        match self.history_block(session_id).await {
            None => format!("{NEW_CONVERSATION_MARKER}\n\nCurrent input: {current_input}"),
            Some(history) => format!("{history}\n\nCurrent input: {current_input}"),
        }
    }

    /// Summary and recent turns, or `None` for a session with no history
    pub async fn history_block(&self, session_id: &str) -> Option<String> {
        let sessions = self.sessions.read().await;
        let context = sessions.get(session_id).filter(|c| !c.is_empty())?;

        let mut sections = Vec::new();
        if let Some(summary) = &context.metadata.summary {
            sections.push(format!("Summary of earlier conversation:\n{summary}"));
        }
        if !context.messages.is_empty() {
            let start = context.messages.len().saturating_sub(self.config.context_window);
            sections.push(format!(
                "Recent conversation:\n{}",
                render_turns(&context.messages[start..])
            ));
        }
        Some(sections.join("\n\n"))
    }

    /// Append a turn; compacts the buffer when it is over the limit
    pub async fn store_interaction(&self, session_id: &str, interaction: Interaction) -> Result<()> {
        if session_id.is_empty() {
            return Err(AgentError::MemoryStorage("session id must not be empty".into()));
        }

        let entry = MemoryEntry {
            input: interaction.input,
            response: interaction.response,
            timestamp: Utc::now(),
            metadata: interaction.metadata,
        };

        let pending = {
            let mut sessions = self.sessions.write().await;
            let context = sessions
                .entry(session_id.to_string())
                .or_insert_with(ConversationContext::new);
            context.messages.push(entry);
            context.metadata.last_updated = Utc::now();

            self.needs_compaction(context.messages.len())
                .then(|| context.messages.clone())
        };

        if let Some(snapshot) = pending {
            self.compact(session_id, &snapshot).await;
        }
        Ok(())
    }

    const fn needs_compaction(&self, len: usize) -> bool {
        len > self.config.max_conversation_length && len >= self.config.min_compaction_length
    }

    /// Summarize outside the lock, then apply. A failed summary leaves the
    /// messages untouched so the next qualifying store tries again.
    async fn compact(&self, session_id: &str, snapshot: &[MemoryEntry]) {
        let summary = match self.summarizer.summarize(snapshot).await {
            Ok(summary) => summary,
            Err(e) => {
                tracing::warn!(session = %session_id, error = %e, "Summarization failed, keeping full history");
                return;
            }
        };

        let mut sessions = self.sessions.write().await;
        let Some(context) = sessions.get_mut(session_id) else {
            return;
        };
        let keep_from = context
            .messages
            .len()
            .saturating_sub(self.config.retained_after_compaction);
        context.messages.drain(..keep_from);
        context.metadata.summary = Some(summary);
        context.metadata.last_updated = Utc::now();

        tracing::debug!(
            session = %session_id,
            summarized = snapshot.len(),
            retained = context.messages.len(),
            "Compacted conversation"
        );
    }

    /// Copy of a session's conversation
    pub async fn conversation(&self, session_id: &str) -> Option<ConversationContext> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Forget all turns and the summary but keep the session
    pub async fn clear(&self, session_id: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(context) = sessions.get_mut(session_id) {
            context.messages.clear();
            context.metadata.summary = None;
            context.metadata.last_updated = Utc::now();
        }
    }

    pub async fn remove_session(&self, session_id: &str) -> bool {
        self.sessions.write().await.remove(session_id).is_some()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

fn render_turns(entries: &[MemoryEntry]) -> String {
    entries
        .iter()
        .map(|e| format!("User: {}\nAssistant: {}", e.input, e.response))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct CountingSummarizer {
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    impl CountingSummarizer {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(fail),
            })
        }
    }

    #[async_trait]
    impl Summarizer for CountingSummarizer {
        async fn summarize(&self, entries: &[MemoryEntry]) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail.load(Ordering::SeqCst) {
                return Err(AgentError::llm(Some(503), "summarizer down"));
            }
            Ok(format!("summary #{n} of {} turns", entries.len()))
        }
    }

    async fn store_n(memory: &MemoryManager, session: &str, n: usize) {
        for i in 0..n {
            memory
                .store_interaction(session, Interaction::new(format!("q{i}"), format!("a{i}")))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_new_session_returns_marker() {
        let memory = MemoryManager::new(CountingSummarizer::new(false), MemoryConfig::default());
        let context = memory.get_context("s1", "hello").await;
        assert!(context.starts_with(NEW_CONVERSATION_MARKER));
        assert!(!context.contains("User:"));
        assert!(context.ends_with("Current input: hello"));
        assert!(memory.history_block("s1").await.is_none());
    }

    #[tokio::test]
    async fn test_context_shows_recent_window() {
        let memory = MemoryManager::new(CountingSummarizer::new(false), MemoryConfig::default());
        store_n(&memory, "s1", 8).await;

        let context = memory.get_context("s1", "next").await;
        assert!(!context.contains("User: q2\n"));
        assert!(context.contains("User: q3\nAssistant: a3"));
        assert!(context.contains("User: q7\nAssistant: a7"));
        assert!(context.ends_with("Current input: next"));
    }

    #[tokio::test]
    async fn test_compaction_after_25_turns() {
        let summarizer = CountingSummarizer::new(false);
        let memory = MemoryManager::new(summarizer.clone(), MemoryConfig::default());

        store_n(&memory, "s1", 21).await;
        let conversation = memory.conversation("s1").await.unwrap();
        assert_eq!(conversation.messages.len(), 5);
        assert_eq!(conversation.messages.first().unwrap().input, "q16");

        // the 21st turn compacts, the next four refill the buffer
        store_n(&memory, "s1", 4).await;
        let conversation = memory.conversation("s1").await.unwrap();
        assert_eq!(conversation.messages.len(), 9);
        assert!(!conversation.metadata.summary.unwrap_or_default().is_empty());
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_length_bounded_after_many_turns() {
        let memory = MemoryManager::new(CountingSummarizer::new(false), MemoryConfig::default());
        for i in 0..100 {
            memory
                .store_interaction("s1", Interaction::new(format!("q{i}"), "a"))
                .await
                .unwrap();
            let len = memory.conversation("s1").await.unwrap().messages.len();
            assert!(len <= 20, "length {len} after turn {i}");
        }
    }

    #[tokio::test]
    async fn test_summary_is_replaced_not_accumulated() {
        let memory = MemoryManager::new(CountingSummarizer::new(false), MemoryConfig::default());
        store_n(&memory, "s1", 21).await;
        store_n(&memory, "s1", 16).await;

        let summary = memory.conversation("s1").await.unwrap().metadata.summary.unwrap();
        assert_eq!(summary, "summary #2 of 21 turns");

        let context = memory.get_context("s1", "x").await;
        assert!(context.contains("Summary of earlier conversation:\nsummary #2"));
        assert!(!context.contains("summary #1"));
    }

    #[tokio::test]
    async fn test_summarizer_failure_keeps_messages() {
        let summarizer = CountingSummarizer::new(true);
        let memory = MemoryManager::new(summarizer.clone(), MemoryConfig::default());
        store_n(&memory, "s1", 20).await;
        let before = memory.conversation("s1").await.unwrap().messages;

        memory
            .store_interaction("s1", Interaction::new("q20", "a20"))
            .await
            .unwrap();
        let after = memory.conversation("s1").await.unwrap();
        assert_eq!(after.messages.len(), 21);
        assert_eq!(&after.messages[..20], &before[..]);
        assert!(after.metadata.summary.is_none());

        // recovers on the next qualifying store
        summarizer.fail.store(false, Ordering::SeqCst);
        memory
            .store_interaction("s1", Interaction::new("q21", "a21"))
            .await
            .unwrap();
        let after = memory.conversation("s1").await.unwrap();
        assert_eq!(after.messages.len(), 5);
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_min_size_guard() {
        let config = MemoryConfig {
            max_conversation_length: 3,
            ..MemoryConfig::default()
        };
        let summarizer = CountingSummarizer::new(false);
        let memory = MemoryManager::new(summarizer.clone(), config);
        store_n(&memory, "s1", 9).await;
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 0);

        store_n(&memory, "s1", 1).await;
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(memory.conversation("s1").await.unwrap().messages.len(), 5);
    }

    #[tokio::test]
    async fn test_metadata_and_timestamps() {
        let memory = MemoryManager::new(CountingSummarizer::new(false), MemoryConfig::default());
        memory
            .store_interaction("s1", Interaction::new("hi", "hello").with_metadata("tool_calls", 2))
            .await
            .unwrap();

        let conversation = memory.conversation("s1").await.unwrap();
        let entry = &conversation.messages[0];
        assert_eq!(entry.metadata.as_ref().unwrap()["tool_calls"], serde_json::json!(2));
        assert!(conversation.metadata.last_updated >= conversation.metadata.created_at);

        let json = serde_json::to_value(entry).unwrap();
        assert!(json["timestamp"].as_str().unwrap().contains('T'));
    }

    #[tokio::test]
    async fn test_clear_and_remove() {
        let memory = MemoryManager::new(CountingSummarizer::new(false), MemoryConfig::default());
        store_n(&memory, "s1", 3).await;
        store_n(&memory, "s2", 1).await;

        memory.clear("s1").await;
        assert!(memory.get_context("s1", "x").await.starts_with(NEW_CONVERSATION_MARKER));
        assert_eq!(memory.session_count().await, 2);

        assert!(memory.remove_session("s2").await);
        assert_eq!(memory.session_count().await, 1);
    }
}
