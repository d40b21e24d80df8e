//! In-process lock provider for single-instance deployments.
//!
//! Locks live in an arena keyed by name. Each entry is either free, held
//! exclusively, or held shared by N readers, and every lease carries a TTL
//! so a forgotten unlock heals itself. An exclusive entry records the token
//! of the lease holding it; release and refresh with any other lease are
//! no-ops. Entries are created on first use;
//! [`LocalLockProvider::sweep`] drops the ones that have sat unheld for
//! longer than the retention window.
//!
//! This provider offers no cross-process exclusion.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ports::{acquire_with_retry, LockError, LockLease, LockProvider, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockMode {
    Free,
    Exclusive,
    Shared(u32),
}

#[derive(Debug)]
struct LockEntry {
    mode: LockMode,
    owner: Option<String>,
    expires_at: Instant,
    last_used: Instant,
}

impl LockEntry {
    fn new(now: Instant) -> Self {
        Self {
            mode: LockMode::Free,
            owner: None,
            expires_at: now,
            last_used: now,
        }
    }

    /// Current mode with expired leases treated as released.
    fn effective_mode(&self, now: Instant) -> LockMode {
        if self.mode != LockMode::Free && now >= self.expires_at {
            LockMode::Free
        } else {
            self.mode
        }
    }

    fn held_by(&self, lease: &LockLease) -> bool {
        self.mode == LockMode::Exclusive && self.owner.as_deref() == Some(lease.token())
    }
}

/// Lock arena for a single process.
#[derive(Debug, Default)]
pub struct LocalLockProvider {
    entries: Mutex<HashMap<String, LockEntry>>,
}

impl LocalLockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single attempt at a shared (read) lease.
    ///
    /// Succeeds while the key is free or already held shared.
    pub fn try_rlock(&self, key: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        let mut entries = self.entries();
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| LockEntry::new(now));

        let readers = match entry.effective_mode(now) {
            LockMode::Free => 1,
            LockMode::Shared(n) => n + 1,
            LockMode::Exclusive => return false,
        };

        entry.mode = LockMode::Shared(readers);
        entry.owner = None;
        entry.expires_at = entry.expires_at.max(now + ttl);
        entry.last_used = now;
        true
    }

    /// Shared lease with retries; exclusive holders block it.
    pub async fn rlock(
        &self,
        key: &str,
        ttl: Duration,
        policy: RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<(), LockError> {
        acquire_with_retry(key, policy, cancel, || async { Ok(self.try_rlock(key, ttl).then_some(())) }).await
    }

    /// Releases one shared lease. Unmatched calls are ignored.
    pub fn runlock(&self, key: &str) {
        let now = Instant::now();
        let mut entries = self.entries();
        if let Some(entry) = entries.get_mut(key) {
            entry.mode = match entry.effective_mode(now) {
                LockMode::Shared(n) if n > 1 => LockMode::Shared(n - 1),
                LockMode::Shared(_) => LockMode::Free,
                other => other,
            };
            entry.last_used = now;
        }
    }

    /// Removes unheld entries idle for at least `retention`.
    ///
    /// Returns the number of entries dropped.
    pub fn sweep(&self, retention: Duration) -> usize {
        let now = Instant::now();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| {
            entry.effective_mode(now) != LockMode::Free
                || now.saturating_duration_since(entry.last_used) < retention
        });
        before - entries.len()
    }

    /// Runs [`sweep`](Self::sweep) every `interval` until `shutdown` fires.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        retention: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = self.sweep(retention);
                        if removed > 0 {
                            tracing::debug!(removed, remaining = self.len(), "Swept idle local locks");
                        }
                    }
                }
            }
        })
    }

    /// Number of entries in the arena (held or not).
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, LockEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl LockProvider for LocalLockProvider {
    async fn try_lock(&self, key: &str, ttl: Duration) -> Result<Option<LockLease>, LockError> {
        let now = Instant::now();
        let mut entries = self.entries();
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| LockEntry::new(now));

        if entry.effective_mode(now) != LockMode::Free {
            return Ok(None);
        }

        let lease = LockLease::new(key);
        entry.mode = LockMode::Exclusive;
        entry.owner = Some(lease.token().to_string());
        entry.expires_at = now + ttl;
        entry.last_used = now;
        Ok(Some(lease))
    }

    async fn unlock(&self, lease: &LockLease) -> Result<(), LockError> {
        let now = Instant::now();
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(lease.key()) else {
            return Ok(());
        };

        if entry.held_by(lease) {
            entry.mode = LockMode::Free;
            entry.owner = None;
        } else {
            tracing::debug!(key = lease.key(), "Release of a lease that no longer holds the key");
        }
        entry.last_used = now;
        Ok(())
    }

    async fn refresh(&self, lease: &LockLease, ttl: Duration) -> Result<bool, LockError> {
        let now = Instant::now();
        let mut entries = self.entries();
        match entries.get_mut(lease.key()) {
            Some(entry) if entry.held_by(lease) && entry.effective_mode(now) == LockMode::Exclusive => {
                entry.expires_at = now + ttl;
                entry.last_used = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
