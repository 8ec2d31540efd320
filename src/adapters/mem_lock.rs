//! In-process [`DistributedLock`] reference adapter. Fairness and TTL
//! expiry are modeled with a `tokio::sync::Mutex`-guarded map plus
//! `Notify`, good enough for tests and a single-process deployment; a
//! real deployment swaps this for a Redis/etcd-backed lock (spec.md §6).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use crate::error::{Result, StorageError};
use crate::ports::lock::{DistributedLock, LockToken};

struct Held {
    token: String,
    expires_at: Instant,
}

#[derive(Default)]
pub struct InMemoryLock {
    held: Mutex<HashMap<String, Held>>,
    notify: Notify,
}

impl InMemoryLock {
    pub fn new() -> Self {
        Self { held: Mutex::new(HashMap::new()), notify: Notify::new() }
    }

    fn is_expired(held: &Held) -> bool {
        Instant::now() >= held.expires_at
    }
}

#[async_trait]
impl DistributedLock for InMemoryLock {
    async fn acquire(&self, key: &str, ttl: Duration, wait_timeout: Duration) -> Result<LockToken> {
        let deadline = Instant::now() + wait_timeout;
        loop {
            {
                let mut held = self.held.lock().await;
                let free = match held.get(key) {
                    None => true,
                    Some(h) => Self::is_expired(h),
                };
                if free {
                    let token = Uuid::new_v4().to_string();
                    held.insert(key.to_string(), Held { token: token.clone(), expires_at: Instant::now() + ttl });
                    return Ok(LockToken::new(token));
                }
            }
            if Instant::now() >= deadline {
                return Err(StorageError::LockContended(key.to_string()));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(remaining.min(Duration::from_millis(50))) => {}
            }
        }
    }

    async fn renew(&self, key: &str, token: &LockToken, ttl: Duration) -> Result<()> {
        let mut held = self.held.lock().await;
        match held.get_mut(key) {
            Some(h) if h.token == token.0 && !Self::is_expired(h) => {
                h.expires_at = Instant::now() + ttl;
                Ok(())
            }
            _ => Err(StorageError::LockContended(key.to_string())),
        }
    }

    async fn release(&self, key: &str, token: LockToken) -> Result<()> {
        let mut held = self.held.lock().await;
        if matches!(held.get(key), Some(h) if h.token == token.0) {
            held.remove(key);
        }
        drop(held);
        self.notify.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn second_acquire_blocks_until_release() {
        let lock = Arc::new(InMemoryLock::new());
        let token = lock.acquire("file-sync:f1", Duration::from_secs(30), Duration::from_secs(1)).await.unwrap();

        let lock2 = lock.clone();
        let waiter = tokio::spawn(async move {
            lock2.acquire("file-sync:f1", Duration::from_secs(30), Duration::from_secs(1)).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        lock.release("file-sync:f1", token).await.unwrap();

        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn acquire_times_out_when_contended() {
        let lock = InMemoryLock::new();
        let _token = lock.acquire("k", Duration::from_secs(30), Duration::from_millis(50)).await.unwrap();
        let err = lock.acquire("k", Duration::from_secs(30), Duration::from_millis(30)).await.unwrap_err();
        assert_eq!(err.code(), "LOCK_CONTENDED");
    }
}
