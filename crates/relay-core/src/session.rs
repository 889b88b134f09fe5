//! Session Management
//!
//! Serializes turns per session and decides which sessions to evict.
//! A session is created lazily on its first request. Each one owns an
//! async mutex that is held for a whole turn, so turn N has stored its
//! memory before turn N+1 reads it. Different sessions never contend.
//!
//! Eviction policy: a session idle for longer than `idle_ttl` is evicted,
//! and when more than `max_sessions` are known the least recently active
//! ones go first. Sessions with a turn running or queued are never evicted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::OwnedMutexGuard;

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub idle_ttl: Duration,
    pub max_sessions: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_ttl: Duration::from_secs(30 * 60),
            max_sessions: 1000,
        }
    }
}

struct SessionSlot {
    lock: Arc<tokio::sync::Mutex<()>>,
    last_active: Instant,
}

/// Exclusive access to one session for the duration of a turn
pub struct SessionGuard {
    _guard: OwnedMutexGuard<()>,
}

/// A session selected for eviction
pub struct EvictionCandidate {
    pub session_id: String,
    lock: Arc<tokio::sync::Mutex<()>>,
    last_active: Instant,
}

impl EvictionCandidate {
    /// Lock the session if no turn has started since selection
    pub fn try_lock(&self) -> Option<SessionGuard> {
        self.lock
            .clone()
            .try_lock_owned()
            .ok()
            .map(|guard| SessionGuard { _guard: guard })
    }
}

pub struct SessionRegistry {
    slots: Mutex<HashMap<String, SessionSlot>>,
    config: SessionConfig,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl SessionRegistry {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Wait for exclusive access to `session_id`, creating it if unseen
    pub async fn acquire(&self, session_id: &str) -> SessionGuard {
        let lock = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            let slot = slots
                .entry(session_id.to_string())
                .or_insert_with(|| SessionSlot {
                    lock: Arc::new(tokio::sync::Mutex::new(())),
                    last_active: Instant::now(),
                });
            slot.last_active = Instant::now();
            slot.lock.clone()
        };

        SessionGuard {
            _guard: lock.lock_owned().await,
        }
    }

    /// Sessions past the idle TTL plus the least recently active ones over
    /// the cap, skipping any with a turn running or queued.
    pub fn eviction_candidates(&self) -> Vec<EvictionCandidate> {
        self.candidates_at(Instant::now())
    }

    fn candidates_at(&self, now: Instant) -> Vec<EvictionCandidate> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);

        let mut idle: Vec<(&String, &SessionSlot)> = slots
            .iter()
            .filter(|(_, slot)| Arc::strong_count(&slot.lock) == 1)
            .collect();
        idle.sort_by_key(|(_, slot)| slot.last_active);

        let over_cap = slots.len().saturating_sub(self.config.max_sessions);
        idle.into_iter()
            .enumerate()
            .filter(|(rank, (_, slot))| {
                *rank < over_cap || now.saturating_duration_since(slot.last_active) >= self.config.idle_ttl
            })
            .map(|(_, (id, slot))| EvictionCandidate {
                session_id: id.clone(),
                lock: slot.lock.clone(),
                last_active: slot.last_active,
            })
            .collect()
    }

    /// Whether the candidate's slot is untouched since selection
    pub fn is_current(&self, candidate: &EvictionCandidate) -> bool {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Self::unchanged(&slots, candidate)
    }

    /// Drop a candidate's slot unless it was used after selection
    pub fn retire(&self, candidate: &EvictionCandidate) -> bool {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let unchanged = Self::unchanged(&slots, candidate);
        if unchanged {
            slots.remove(&candidate.session_id);
        }
        unchanged
    }

    fn unchanged(slots: &HashMap<String, SessionSlot>, candidate: &EvictionCandidate) -> bool {
        slots.get(&candidate.session_id).is_some_and(|slot| {
            Arc::ptr_eq(&slot.lock, &candidate.lock) && slot.last_active == candidate.last_active
        })
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_same_session_is_serialized() {
        let registry = Arc::new(SessionRegistry::default());
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let active = active.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = registry.acquire("s1").await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_different_sessions_do_not_block() {
        let registry = SessionRegistry::default();
        let _a = registry.acquire("a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), registry.acquire("b")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_idle_sessions_are_candidates() {
        let registry = SessionRegistry::new(SessionConfig {
            idle_ttl: Duration::from_secs(60),
            max_sessions: 100,
        });
        drop(registry.acquire("old").await);

        assert!(registry.eviction_candidates().is_empty());

        let later = Instant::now() + Duration::from_secs(61);
        let candidates = registry.candidates_at(later);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].session_id, "old");
        assert!(registry.retire(&candidates[0]));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_busy_sessions_are_skipped() {
        let registry = SessionRegistry::new(SessionConfig {
            idle_ttl: Duration::ZERO,
            max_sessions: 100,
        });
        let _busy = registry.acquire("busy").await;
        drop(registry.acquire("idle").await);

        let ids: Vec<_> = registry
            .eviction_candidates()
            .into_iter()
            .map(|c| c.session_id)
            .collect();
        assert_eq!(ids, vec!["idle".to_string()]);
    }

    #[tokio::test]
    async fn test_cap_evicts_least_recent() {
        let registry = SessionRegistry::new(SessionConfig {
            idle_ttl: Duration::from_secs(3600),
            max_sessions: 2,
        });
        for id in ["first", "second", "third"] {
            drop(registry.acquire(id).await);
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        let candidates = registry.eviction_candidates();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].session_id, "first");
    }

    #[tokio::test]
    async fn test_retire_refused_after_reuse() {
        let registry = SessionRegistry::new(SessionConfig {
            idle_ttl: Duration::ZERO,
            max_sessions: 100,
        });
        drop(registry.acquire("s1").await);
        let candidates = registry.eviction_candidates();
        assert_eq!(candidates.len(), 1);

        tokio::time::sleep(Duration::from_millis(2)).await;
        drop(registry.acquire("s1").await);
        assert!(!registry.is_current(&candidates[0]));
        assert!(!registry.retire(&candidates[0]));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_request_during_eviction_waits_for_evictor() {
        let registry = Arc::new(SessionRegistry::new(SessionConfig {
            idle_ttl: Duration::ZERO,
            max_sessions: 100,
        }));
        drop(registry.acquire("s1").await);
        let candidates = registry.eviction_candidates();
        let evicting = candidates[0].try_lock().unwrap();
        assert!(registry.is_current(&candidates[0]));

        tokio::time::sleep(Duration::from_millis(2)).await;
        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move {
                let _turn = registry.acquire("s1").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        // the queued request keeps the slot alive
        assert!(!registry.retire(&candidates[0]));
        drop(evicting);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(registry.len(), 1);
    }
}
