//! Session store: keyed storage of session records with expiry.
//!
//! The [`SessionStore`] trait abstracts over storage backends so a shared
//! cache can replace the in-process map in multi-instance deployments. The
//! only current implementation is [`InMemorySessionStore`], backed by a
//! `DashMap`, with lazy eviction on read and a background sweeper.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::debug;

use super::{Session, SessionLocks, now_secs, short_id};

/// Trait abstracting the session storage backend.
///
/// Implementations must be `Send + Sync` because the store is shared across
/// request tasks.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Look up a session by id.
    ///
    /// Returns `None` if the session does not exist or is past its eviction
    /// time.
    async fn get(&self, id: &str) -> Option<Session>;

    /// Insert or overwrite a session.
    async fn put(&self, session: Session);

    /// Delete a session. Returns `true` if it existed.
    async fn delete(&self, id: &str) -> bool;

    /// Remove every record past its eviction time. Returns the count removed.
    async fn sweep_expired(&self) -> usize;

    /// Number of stored records (expired ones included until swept).
    async fn count(&self) -> usize;
}

/// In-memory session store
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, Session>,
}

impl InMemorySessionStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove `id` only if the record currently stored is past eviction.
    ///
    /// A record written by a concurrent `put` after the caller's read survives.
    fn evict_if_expired(&self, id: &str, now: u64) -> bool {
        self.sessions
            .remove_if(id, |_, s| s.is_evictable_at(now))
            .is_some()
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, id: &str) -> Option<Session> {
        let entry = self.sessions.get(id)?;
        let session = entry.clone();
        drop(entry);

        let now = now_secs();
        if session.is_evictable_at(now) {
            if self.evict_if_expired(id, now) {
                debug!(session = %short_id(id), "Lazy-evicted expired session");
            }
            return None;
        }

        Some(session)
    }

    async fn put(&self, session: Session) {
        self.sessions.insert(session.id.clone(), session);
    }

    async fn delete(&self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    async fn sweep_expired(&self) -> usize {
        let now = now_secs();
        let before = self.sessions.len();
        self.sessions.retain(|_, s| !s.is_evictable_at(now));
        before.saturating_sub(self.sessions.len())
    }

    async fn count(&self) -> usize {
        self.sessions.len()
    }
}

/// Spawn a background task that sweeps expired sessions every `interval`
/// and drops idle per-session locks.
///
/// The task exits when the `shutdown` receiver fires.
pub fn spawn_sweeper(
    store: Arc<dyn SessionStore>,
    locks: Arc<SessionLocks>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let swept = store.sweep_expired().await;
                    let pruned = locks.prune();
                    if swept > 0 || pruned > 0 {
                        debug!(sessions = swept, locks = pruned, "Swept expired sessions");
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Session sweeper shutting down");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::TokenSet;

    fn pending(id: &str, ttl_secs: u64) -> Session {
        Session::pending(
            id.to_string(),
            "verifier".to_string(),
            "state".to_string(),
            Duration::from_secs(ttl_secs),
        )
    }

    fn evicted(id: &str) -> Session {
        let mut s = pending(id, 0);
        s.evict_at = now_secs() - 1;
        s
    }

    #[tokio::test]
    async fn put_and_get() {
        // GIVEN: a store with one pending session
        let store = InMemorySessionStore::new();
        store.put(pending("sid-1", 600)).await;

        // WHEN: we look it up
        let found = store.get("sid-1").await;

        // THEN: it is returned intact
        assert_eq!(found.unwrap().state(), Some("state"));
    }

    #[tokio::test]
    async fn get_unknown_is_none() {
        let store = InMemorySessionStore::new();
        assert!(store.get("nope").await.is_none());
    }

    #[tokio::test]
    async fn get_lazy_evicts_expired() {
        // GIVEN: a record already past its eviction time
        let store = InMemorySessionStore::new();
        store.put(evicted("old")).await;

        // WHEN: it is read
        let found = store.get("old").await;

        // THEN: it is gone from the map as well
        assert!(found.is_none());
        assert_eq!(store.count().await, 0);
    }

    #[tokio::test]
    async fn lazy_eviction_spares_record_rewritten_after_read() {
        // GIVEN: a reader saw an expired record, then a refresh stored a fresh one
        let store = InMemorySessionStore::new();
        store.put(evicted("sid")).await;
        let stale = store.sessions.get("sid").unwrap().clone();
        assert!(stale.is_evictable_at(now_secs()));
        store.put(pending("sid", 600)).await;

        // WHEN: the reader's eviction runs
        let removed = store.evict_if_expired("sid", now_secs());

        // THEN: the fresh record survives
        assert!(!removed);
        assert_eq!(store.get("sid").await.unwrap().state(), Some("state"));
    }

    #[tokio::test]
    async fn put_overwrites() {
        let store = InMemorySessionStore::new();
        let mut s = pending("sid", 600);
        store.put(s.clone()).await;

        s.authenticate(
            TokenSet {
                access_token: "at".into(),
                refresh_token: None,
                expires_at: now_secs() + 60,
            },
            None,
            Duration::ZERO,
        );
        store.put(s).await;

        let found = store.get("sid").await.unwrap();
        assert_eq!(found.access_token(), Some("at"));
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn delete_removes() {
        let store = InMemorySessionStore::new();
        store.put(pending("sid", 600)).await;

        assert!(store.delete("sid").await);
        assert!(!store.delete("sid").await);
        assert!(store.get("sid").await.is_none());
    }

    #[tokio::test]
    async fn sweep_removes_only_expired() {
        // GIVEN: one live and two expired records
        let store = InMemorySessionStore::new();
        store.put(pending("live", 600)).await;
        store.put(evicted("dead-1")).await;
        store.put(evicted("dead-2")).await;

        // WHEN: swept
        let swept = store.sweep_expired().await;

        // THEN: two removed, one remains
        assert_eq!(swept, 2);
        assert_eq!(store.count().await, 1);
        assert!(store.get("live").await.is_some());
    }

    #[tokio::test]
    async fn sweeper_runs_until_shutdown() {
        let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        store.put(evicted("dead")).await;

        let (tx, rx) = tokio::sync::broadcast::channel(1);
        let handle = spawn_sweeper(
            Arc::clone(&store),
            Arc::new(SessionLocks::new()),
            Duration::from_millis(10),
            rx,
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.count().await, 0);

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should stop")
            .unwrap();
    }
}
