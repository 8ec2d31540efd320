//! Progress storage port (C5): a TTL-bounded ephemeral KV for
//! [`ProgressRecord`] snapshots. See spec.md §6 and §3 ("ProgressRecord").

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::model::ProgressRecord;

#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn set(&self, key: &str, record: ProgressRecord, ttl: Duration) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<ProgressRecord>>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Read-modify-write convenience built on the three primitive ops above
/// (kept as a free function so the port stays trait-object safe).
pub async fn update<F>(store: &dyn ProgressStore, key: &str, ttl: Duration, f: F) -> Result<()>
where
    F: FnOnce(Option<ProgressRecord>) -> ProgressRecord + Send,
{
    let current = store.get(key).await?;
    let next = f(current);
    store.set(key, next, ttl).await
}
