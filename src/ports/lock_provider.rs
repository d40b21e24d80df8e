//! LockProvider port - Named mutual exclusion for shared room/game state.
//!
//! Two implementations sit behind this port:
//!
//! - `LocalLockProvider` - per-key locks inside this process (single instance)
//! - `RedisLockProvider` - `SET NX PX` locks shared by every instance
//!
//! Both hand out leases with a TTL so a crashed holder can never wedge a key.
//! Every acquisition returns a [`LockLease`] carrying a fresh token; release
//! and refresh take that lease back, so a holder whose lease expired can
//! never release or extend the lease of whoever took the key next, in this
//! process or another. The lock only gates access; the guarded state itself
//! lives in the database or cache and is touched by the caller.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::foundation::{DomainError, ErrorCode};

/// Errors that can occur in lock operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LockError {
    /// All attempts failed because someone else holds the key.
    #[error("timed out acquiring lock '{key}' after {attempts} attempts")]
    Timeout { key: String, attempts: u32 },

    /// The caller gave up while we were waiting.
    #[error("acquiring lock '{key}' was cancelled")]
    Cancelled { key: String },

    /// The backing store failed.
    #[error("lock backend error: {0}")]
    Backend(String),

    /// No backing store is available for the selected provider.
    #[error("lock provider not configured: {0}")]
    NotConfigured(String),
}

impl LockError {
    /// True for contention outcomes the caller should surface as "try again".
    pub fn is_retryable(&self) -> bool {
        matches!(self, LockError::Timeout { .. } | LockError::Cancelled { .. })
    }
}

impl From<LockError> for DomainError {
    fn from(err: LockError) -> Self {
        let code = if err.is_retryable() {
            ErrorCode::LockTimeout
        } else {
            ErrorCode::InternalError
        };
        DomainError::new(code, err.to_string())
    }
}

/// How hard `lock` tries before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of `try_lock` attempts (at least one is always made).
    pub max_retries: u32,
    /// Fixed pause between attempts.
    pub retry_interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_interval: Duration) -> Self {
        Self {
            max_retries,
            retry_interval,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_interval: Duration::from_millis(100),
        }
    }
}

/// Builds the namespaced key for a lock in some domain, e.g. `game:R1`.
pub fn lock_key(domain: &str, id: impl std::fmt::Display) -> String {
    format!("{}:{}", domain, id)
}

/// One holder's claim on a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    key: String,
    token: String,
}

impl LockLease {
    /// A lease on `key` with a token no other lease shares.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            token: Uuid::new_v4().to_string(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Port for acquiring and releasing named locks.
///
/// `try_lock` must be atomic: two concurrent callers can never both get a
/// lease for the same key while the first one is live.
#[async_trait]
pub trait LockProvider: Send + Sync {
    /// Single non-blocking attempt. `None` when someone else holds the key.
    async fn try_lock(&self, key: &str, ttl: Duration) -> Result<Option<LockLease>, LockError>;

    /// Retries `try_lock` according to `policy`, aborting early when
    /// `cancel` fires.
    async fn lock(
        &self,
        key: &str,
        ttl: Duration,
        policy: RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<LockLease, LockError> {
        acquire_with_retry(key, policy, cancel, || self.try_lock(key, ttl)).await
    }

    /// Best-effort release. A lease that already expired, or whose key now
    /// belongs to a newer lease, releases nothing and is not an error.
    async fn unlock(&self, lease: &LockLease) -> Result<(), LockError>;

    /// Extends a held lease. Returns false when the lease is no longer live.
    async fn refresh(&self, lease: &LockLease, ttl: Duration) -> Result<bool, LockError>;

    /// Provider name for logs and metrics labels.
    fn name(&self) -> &'static str;
}

/// Shared retry loop used by every provider's blocking acquisition.
pub async fn acquire_with_retry<T, F, Fut>(
    key: &str,
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut attempt: F,
) -> Result<T, LockError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<Option<T>, LockError>>,
{
    let attempts = policy.max_retries.max(1);

    for n in 1..=attempts {
        if cancel.is_cancelled() {
            return Err(LockError::Cancelled { key: key.to_string() });
        }
        if let Some(acquired) = attempt().await? {
            return Ok(acquired);
        }
        if n == attempts {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(LockError::Cancelled { key: key.to_string() });
            }
            _ = tokio::time::sleep(policy.retry_interval) => {}
        }
    }

    Err(LockError::Timeout {
        key: key.to_string(),
        attempts,
    })
}
