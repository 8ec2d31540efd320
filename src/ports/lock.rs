//! Distributed lock port (C4): named leases with TTL, auto-renew, and
//! fair-ish wait. See spec.md §6 "Distributed lock port" and §9's guidance
//! on implementing auto-renew as a cancel-on-completion background ticker.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Opaque proof of lock ownership. Adapter-specific; the core never
/// inspects its contents.
#[derive(Debug, Clone)]
pub struct LockToken(pub String);

/// Named leases with TTL and fair-ish FIFO wait.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Blocks up to `wait_timeout` trying to acquire `key`, failing with a
    /// retryable [`StorageError::LockContended`] on timeout.
    async fn acquire(&self, key: &str, ttl: Duration, wait_timeout: Duration) -> Result<LockToken>;

    /// Extends the TTL of a held lock. Fails if the lease already expired
    /// (another holder may now own it).
    async fn renew(&self, key: &str, token: &LockToken, ttl: Duration) -> Result<()>;

    async fn release(&self, key: &str, token: LockToken) -> Result<()>;
}

/// Options for [`with_lock`], mirroring spec.md §6's
/// `withLock(key, fn, {ttl, waitTimeout, autoRenew, renewIntervalMs})`.
#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    pub ttl: Duration,
    pub wait_timeout: Duration,
    pub auto_renew: bool,
    pub renew_interval: Duration,
}

/// Acquires `key`, runs `f`, and releases the lock on every exit path
/// (success, error, or panic-unwind through `f`). When `opts.auto_renew`
/// is set, a background ticker refreshes the lease every
/// `renew_interval` for as long as `f` is running, and is aborted the
/// instant `f` resolves -- the renewer must never outlive the handler
/// (spec.md §9).
pub async fn with_lock<F, Fut, T>(
    lock: &Arc<dyn DistributedLock>,
    key: &str,
    opts: LockOptions,
    f: F,
) -> Result<T>
where
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = Result<T>> + Send,
    T: Send,
{
    let token = lock.acquire(key, opts.ttl, opts.wait_timeout).await?;

    let renewer = if opts.auto_renew {
        let lock = lock.clone();
        let key = key.to_string();
        let token = token.clone();
        let ttl = opts.ttl;
        let interval = opts.renew_interval;
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; discard it
            loop {
                ticker.tick().await;
                if lock.renew(&key, &token, ttl).await.is_err() {
                    break;
                }
            }
        }))
    } else {
        None
    };

    let result = f().await;

    if let Some(handle) = renewer {
        handle.abort();
    }

    let release_result = lock.release(key, token).await;
    match (result, release_result) {
        (Ok(v), _) => Ok(v),
        (Err(e), _) => Err(e),
    }
}

impl LockToken {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}
