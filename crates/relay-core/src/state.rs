//! Per-session application state
//!
//! Free-form key/value data that must survive between turns (active file,
//! last tool result, user preferences). Conversation text lives in
//! [`MemoryManager`](crate::memory::MemoryManager), not here.

use std::collections::HashMap;

use tokio::sync::RwLock;

/// State of one session
pub type ApplicationState = HashMap<String, serde_json::Value>;

/// Session-keyed state store. Sessions never see each other's entries.
#[derive(Default)]
pub struct StateManager {
    sessions: RwLock<HashMap<String, ApplicationState>>,
}

impl StateManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, session_id: &str, key: &str) -> Option<serde_json::Value> {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).and_then(|state| state.get(key)).cloned()
    }

    /// Set a value, returning the previous one
    pub async fn set(
        &self,
        session_id: &str,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Option<serde_json::Value> {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id.to_string())
            .or_default()
            .insert(key.into(), value)
    }

    pub async fn remove(&self, session_id: &str, key: &str) -> Option<serde_json::Value> {
        let mut sessions = self.sessions.write().await;
        sessions.get_mut(session_id).and_then(|state| state.remove(key))
    }

    /// Copy of the whole state for a session (empty if unseen)
    pub async fn snapshot(&self, session_id: &str) -> ApplicationState {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).cloned().unwrap_or_default()
    }

    /// Drop every key of a session but keep the session known
    pub async fn clear(&self, session_id: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(state) = sessions.get_mut(session_id) {
            state.clear();
        }
    }

    pub async fn remove_session(&self, session_id: &str) -> bool {
        self.sessions.write().await.remove(session_id).is_some()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_get_and_previous_value() {
        let state = StateManager::new();
        assert_eq!(state.set("s1", "active_file", json!("main.rs")).await, None);
        assert_eq!(
            state.set("s1", "active_file", json!("lib.rs")).await,
            Some(json!("main.rs"))
        );
        assert_eq!(state.get("s1", "active_file").await, Some(json!("lib.rs")));
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let state = StateManager::new();
        state.set("s1", "k", json!(1)).await;
        state.set("s2", "k", json!(2)).await;

        assert_eq!(state.get("s1", "k").await, Some(json!(1)));
        assert_eq!(state.get("s2", "k").await, Some(json!(2)));
        assert!(state.snapshot("s3").await.is_empty());

        state.clear("s1").await;
        assert!(state.get("s1", "k").await.is_none());
        assert_eq!(state.get("s2", "k").await, Some(json!(2)));
    }

    #[tokio::test]
    async fn test_remove_session() {
        let state = StateManager::new();
        state.set("s1", "k", json!(true)).await;
        assert_eq!(state.session_count().await, 1);
        assert!(state.remove_session("s1").await);
        assert!(!state.remove_session("s1").await);
        assert_eq!(state.session_count().await, 0);
    }
}
