//! Lease acquire/release against the metadata store, per spec.md §4.1.
//! Leases are advisory: they block destructive ops and worker mutations,
//! never readers.

use std::sync::Arc;

use crate::error::{Result, StorageError};
use crate::model::{FileId, Tier};
use crate::ports::metadata::MetadataStore;

/// A held lease; releases on drop via a detached best-effort task if the
/// caller never calls [`release`] explicitly (e.g. stream abort).
pub struct LeaseGuard {
    metadata: Arc<dyn MetadataStore>,
    file_id: FileId,
    tier: Tier,
    released: bool,
}

impl LeaseGuard {
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        release_lease(&self.metadata, &self.file_id, self.tier).await
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let metadata = self.metadata.clone();
        let file_id = self.file_id.clone();
        let tier = self.tier;
        tokio::spawn(async move {
            let _ = release_lease(&metadata, &file_id, tier).await;
        });
    }
}

/// Acquires a read lease on `(file_id, tier)`'s storage object, failing
/// with [`StorageError::FileNotFoundInStorage`] if the row doesn't exist.
pub async fn acquire_lease(metadata: &Arc<dyn MetadataStore>, file_id: &FileId, tier: Tier) -> Result<LeaseGuard> {
    let mut obj = metadata
        .get_storage_object(file_id, tier)
        .await?
        .ok_or_else(|| StorageError::FileNotFoundInStorage(file_id.clone()))?;
    obj.acquire_lease();
    metadata.upsert_storage_object(obj).await?;
    Ok(LeaseGuard { metadata: metadata.clone(), file_id: file_id.clone(), tier, released: false })
}

/// Releases a lease directly. Never propagates errors to callers that
/// can't act on them, per spec.md §4.1 -- failures are logged and
/// swallowed, matching `StorageObject::release_lease`'s own contract.
pub async fn release_lease(metadata: &Arc<dyn MetadataStore>, file_id: &FileId, tier: Tier) -> Result<()> {
    if let Some(mut obj) = metadata.get_storage_object(file_id, tier).await? {
        obj.release_lease();
        metadata.upsert_storage_object(obj).await?;
    }
    Ok(())
}

/// Whether `(file_id, tier)` currently has any reader and is therefore
/// unsafe to mutate destructively (spec.md §4.1 "FILE_IN_USE").
pub async fn is_in_use(metadata: &Arc<dyn MetadataStore>, file_id: &FileId, tier: Tier) -> Result<bool> {
    Ok(metadata
        .get_storage_object(file_id, tier)
        .await?
        .map(|o| o.lease_count > 0)
        .unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mem_metadata::InMemoryMetadata;
    use crate::model::{AvailabilityStatus, StorageObject};

    #[tokio::test]
    async fn acquire_then_release_clears_in_use() {
        let metadata: Arc<dyn MetadataStore> = Arc::new(InMemoryMetadata::new());
        let obj = StorageObject::new("f1".into(), Tier::Nas, "k".into(), AvailabilityStatus::Available);
        metadata.upsert_storage_object(obj).await.unwrap();

        let guard = acquire_lease(&metadata, &"f1".to_string(), Tier::Nas).await.unwrap();
        assert!(is_in_use(&metadata, &"f1".to_string(), Tier::Nas).await.unwrap());
        guard.release().await.unwrap();
        assert!(!is_in_use(&metadata, &"f1".to_string(), Tier::Nas).await.unwrap());
    }
}
