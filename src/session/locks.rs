//! Per-session-id serialization

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Hands out one async mutex per session id.
///
/// Read-modify-write sequences on a session record (callback, refresh) hold
/// the guard for their whole duration. Entries nobody holds are dropped by
/// [`SessionLocks::prune`].
#[derive(Debug, Default)]
pub struct SessionLocks {
    inner: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionLocks {
    /// Create an empty lock table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `session_id`.
    pub async fn lock(&self, session_id: &str) -> OwnedMutexGuard<()> {
        // Clone the Arc out so the shard guard is released before awaiting.
        let mutex = Arc::clone(self.inner.entry(session_id.to_string()).or_default().value());
        mutex.lock_owned().await
    }

    /// Drop entries that no task holds or waits on. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let before = self.inner.len();
        self.inner.retain(|_, m| Arc::strong_count(m) > 1);
        before.saturating_sub(self.inner.len())
    }

    /// Number of tracked ids
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether no ids are tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
