//! In-memory session store with TTL eviction
//!
//! Sessions are keyed `medisync:session:<uuid>`; each entry owns its
//! `Mutex<Session>` so per-session mutation is serialized while the store
//! itself stays lock-free for readers. A background sweep task evicts
//! expired entries.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::models::{Locale, Session};

pub fn session_key(session_id: Uuid) -> String {
    format!("medisync:session:{}", session_id)
}

pub struct SessionStore {
    sessions: DashMap<String, Arc<Mutex<Session>>>,
    cfg: SessionConfig,
}

impl SessionStore {
    pub fn new(cfg: SessionConfig) -> Self {
        Self { sessions: DashMap::new(), cfg }
    }

    /// Resolve an existing live session or create a fresh one. A session id
    /// belonging to a different user is never resumed; the caller gets a new
    /// session instead.
    pub async fn resolve_or_create(
        &self,
        requested: Option<Uuid>,
        user_id: &str,
        locale: Locale,
    ) -> (Uuid, Arc<Mutex<Session>>) {
        if let Some(session_id) = requested
            && let Some(existing) = self.sessions.get(&session_key(session_id))
        {
            let entry = existing.value().clone();
            drop(existing);
            let mut session = entry.lock().await;
            if !session.is_expired(Utc::now()) && session.user_id == user_id {
                session.touch(self.cfg.default_ttl_seconds, self.cfg.max_ttl_seconds);
                drop(session);
                return (session_id, entry);
            }
        }

        let session_id = requested
            .filter(|id| !self.sessions.contains_key(&session_key(*id)))
            .unwrap_or_else(Uuid::new_v4);
        let session = Arc::new(Mutex::new(Session::new(
            session_id,
            user_id,
            locale,
            self.cfg.default_ttl_seconds,
        )));
        self.sessions.insert(session_key(session_id), session.clone());
        tracing::debug!("Created session {} for user {}", session_id, user_id);
        (session_id, session)
    }

    pub fn get(&self, session_id: Uuid) -> Option<Arc<Mutex<Session>>> {
        self.sessions
            .get(&session_key(session_id))
            .map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop every expired session. Entries locked by an in-flight request are
    /// skipped and picked up on the next sweep.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut evicted = 0usize;
        self.sessions.retain(|_, entry| match entry.try_lock() {
            Ok(session) => {
                let keep = !session.is_expired(now);
                if !keep {
                    evicted += 1;
                }
                keep
            },
            Err(_) => true,
        });
        if evicted > 0 {
            tracing::debug!("Session sweep evicted {} expired sessions", evicted);
        }
        evicted
    }
}

// ============================================================================
// Background sweep task
// ============================================================================

/// Spawn the periodic TTL sweep for a session store.
///
/// # Returns
/// Shutdown handle for stopping the task; set it to `true` and the loop ends
/// after its current tick.
pub fn start_session_sweep_task(store: Arc<SessionStore>, interval_secs: u64) -> Arc<AtomicBool> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_handle = shutdown.clone();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if shutdown.load(Ordering::Relaxed) {
                tracing::info!("Session sweep task is shutting down");
                break;
            }

            let evicted = store.sweep_expired();
            tracing::debug!(
                "Session sweep tick: {} evicted, {} sessions live",
                evicted,
                store.len()
            );
        }
    });

    tracing::info!("Session sweep task started with interval: {}s", interval_secs);
    shutdown_handle
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(ttl: i64) -> SessionStore {
        SessionStore::new(SessionConfig {
            default_ttl_seconds: ttl,
            max_ttl_seconds: ttl.max(1) * 2,
            sweep_interval_secs: 60,
        })
    }

    #[tokio::test]
    async fn resumes_a_live_session_for_the_same_user() {
        let store = store(3600);
        let (id, _) = store.resolve_or_create(None, "u-1", Locale::En).await;
        let (resumed, _) = store.resolve_or_create(Some(id), "u-1", Locale::En).await;
        assert_eq!(id, resumed);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn never_resumes_another_users_session() {
        let store = store(3600);
        let (id, _) = store.resolve_or_create(None, "u-1", Locale::En).await;
        let (other, _) = store.resolve_or_create(Some(id), "u-2", Locale::En).await;
        assert_ne!(id, other);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn sweep_evicts_expired_sessions() {
        let store = store(3600);
        let (id, entry) = store.resolve_or_create(None, "u-1", Locale::En).await;
        entry.lock().await.expires_at = Utc::now() - chrono::Duration::seconds(1);
        assert_eq!(store.sweep_expired(), 1);
        assert!(store.get(id).is_none());
    }

    #[tokio::test]
    async fn sweep_task_evicts_expired_sessions_in_the_background() {
        let store = Arc::new(store(3600));
        let (id, entry) = store.resolve_or_create(None, "u-1", Locale::En).await;
        entry.lock().await.expires_at = Utc::now() - chrono::Duration::seconds(1);

        // the first interval tick fires immediately
        let shutdown = start_session_sweep_task(Arc::clone(&store), 60);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(store.get(id).is_none(), "expired session must be swept");
        shutdown.store(true, Ordering::Relaxed);
    }

    #[tokio::test]
    async fn expired_session_id_gets_a_fresh_session() {
        let store = store(3600);
        let (id, entry) = store.resolve_or_create(None, "u-1", Locale::En).await;
        entry.lock().await.expires_at = Utc::now() - chrono::Duration::seconds(1);
        let (new_id, fresh) = store.resolve_or_create(Some(id), "u-1", Locale::En).await;
        // the stale id is reused only through a brand-new session record
        assert_ne!(new_id, id);
        assert!(fresh.lock().await.conversation_turns.is_empty());
    }
}
