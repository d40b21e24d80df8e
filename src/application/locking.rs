//! Critical sections guarded by a [`LockProvider`].
//!
//! [`with_lock`] is the only way application code takes a business lock:
//! it acquires, runs the guarded future, and releases on every exit path
//! including a panic inside the future. Wait and hold times are recorded
//! whatever the outcome.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures::FutureExt;
use metrics::histogram;
use tokio_util::sync::CancellationToken;

use crate::domain::foundation::DomainError;
use crate::ports::{LockError, LockLease, LockProvider, RetryPolicy};

/// Runs `f` while holding `key`, with the default retry policy.
///
/// # Errors
///
/// A `LockTimeout` [`DomainError`] if the lock could not be acquired,
/// otherwise whatever `f` returns.
pub async fn with_lock<P, F, Fut, T>(
    locks: &P,
    key: &str,
    ttl: Duration,
    f: F,
) -> Result<T, DomainError>
where
    P: LockProvider + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, DomainError>>,
{
    with_lock_policy(locks, key, ttl, RetryPolicy::default(), &CancellationToken::new(), f).await
}

/// [`with_lock`] with an explicit retry policy and cancellation.
pub async fn with_lock_policy<P, F, Fut, T>(
    locks: &P,
    key: &str,
    ttl: Duration,
    policy: RetryPolicy,
    cancel: &CancellationToken,
    f: F,
) -> Result<T, DomainError>
where
    P: LockProvider + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, DomainError>>,
{
    let provider = locks.name();
    let started = Instant::now();
    let acquired = locks.lock(key, ttl, policy, cancel).await;

    histogram!(
        "lock_wait_seconds",
        "provider" => provider,
        "outcome" => wait_outcome(&acquired)
    )
    .record(started.elapsed().as_secs_f64());

    let lease = match acquired {
        Ok(lease) => lease,
        Err(e) => {
            tracing::warn!(key, provider, error = %e, "Lock acquisition failed");
            return Err(e.into());
        }
    };

    let held_since = Instant::now();
    let result = AssertUnwindSafe(f()).catch_unwind().await;
    let held = held_since.elapsed();

    histogram!("lock_hold_seconds", "provider" => provider).record(held.as_secs_f64());
    if held > ttl {
        tracing::warn!(key, provider, held_ms = held.as_millis() as u64, "Critical section outlived its lock TTL");
    }

    if let Err(e) = locks.unlock(&lease).await {
        tracing::warn!(key, provider, error = %e, "Lock release failed; lease will expire on its own");
    }

    match result {
        Ok(value) => value,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

fn wait_outcome(result: &Result<LockLease, LockError>) -> &'static str {
    match result {
        Ok(_) => "acquired",
        Err(LockError::Timeout { .. }) => "timeout",
        Err(LockError::Cancelled { .. }) => "cancelled",
        Err(_) => "error",
    }
}
