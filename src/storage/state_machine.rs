//! StorageObject availability state machine and `reconcileCache`, per
//! spec.md §4.1. Every branch is idempotent: running the same (DB, disk)
//! pair through it twice yields the same final row.

use std::sync::Arc;

use tracing::warn;

use crate::error::Result;
use crate::model::{AvailabilityStatus, FileId, StorageObject, Tier};
use crate::ports::cache_store::CacheStore;
use crate::ports::metadata::MetadataStore;

/// Outcome of [`reconcile_cache`]: whether the cache tier can currently
/// serve this file.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CacheUsability {
    Usable,
    NotUsable,
}

/// Aligns the metadata store's belief about `fileId`'s cache object with
/// actual disk presence, per spec.md §4.1's four-branch contract.
pub async fn reconcile_cache(
    metadata: &Arc<dyn MetadataStore>,
    cache: &Arc<dyn CacheStore>,
    file_id: &FileId,
) -> Result<CacheUsability> {
    let row = metadata.get_storage_object(file_id, Tier::Cache).await?;
    let present = cache.exists(&object_key_for(file_id, row.as_ref())).await?;

    match row {
        Some(mut r) if r.availability == AvailabilityStatus::Available && !present => {
            r.availability = AvailabilityStatus::Missing;
            metadata.upsert_storage_object(r).await?;
            warn!(file_id = %file_id, "cache row AVAILABLE but blob absent, marking MISSING");
            Ok(CacheUsability::NotUsable)
        }
        Some(mut r) if r.availability != AvailabilityStatus::Available && present => {
            r.availability = AvailabilityStatus::Available;
            metadata.upsert_storage_object(r).await?;
            Ok(CacheUsability::Usable)
        }
        Some(r) => {
            let usable = r.availability == AvailabilityStatus::Available && present;
            Ok(if usable { CacheUsability::Usable } else { CacheUsability::NotUsable })
        }
        None if present => {
            let obj = StorageObject::new(file_id.clone(), Tier::Cache, file_id.clone(), AvailabilityStatus::Available);
            metadata.upsert_storage_object(obj).await?;
            Ok(CacheUsability::Usable)
        }
        None => Ok(CacheUsability::NotUsable),
    }
}

fn object_key_for(file_id: &FileId, row: Option<&StorageObject>) -> String {
    row.map(|r| r.object_key.clone()).unwrap_or_else(|| file_id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mem_cache::InMemoryCache;
    use crate::adapters::mem_metadata::InMemoryMetadata;
    use bytes::Bytes;

    fn harness() -> (Arc<dyn MetadataStore>, Arc<dyn CacheStore>) {
        (Arc::new(InMemoryMetadata::new()), Arc::new(InMemoryCache::new()))
    }

    #[tokio::test]
    async fn missing_row_and_disk_stays_not_usable() {
        let (metadata, cache) = harness();
        let usable = reconcile_cache(&metadata, &cache, &"f1".to_string()).await.unwrap();
        assert_eq!(usable, CacheUsability::NotUsable);
    }

    #[tokio::test]
    async fn disk_present_without_row_creates_available_row() {
        let (metadata, cache) = harness();
        cache.write("f1", Bytes::from_static(b"x")).await.unwrap();
        let usable = reconcile_cache(&metadata, &cache, &"f1".to_string()).await.unwrap();
        assert_eq!(usable, CacheUsability::Usable);
        let row = metadata.get_storage_object(&"f1".to_string(), Tier::Cache).await.unwrap().unwrap();
        assert_eq!(row.availability, AvailabilityStatus::Available);
    }

    #[tokio::test]
    async fn available_row_without_disk_flips_to_missing() {
        let (metadata, cache) = harness();
        let obj = StorageObject::new("f1".into(), Tier::Cache, "f1".into(), AvailabilityStatus::Available);
        metadata.upsert_storage_object(obj).await.unwrap();
        let usable = reconcile_cache(&metadata, &cache, &"f1".to_string()).await.unwrap();
        assert_eq!(usable, CacheUsability::NotUsable);
        let row = metadata.get_storage_object(&"f1".to_string(), Tier::Cache).await.unwrap().unwrap();
        assert_eq!(row.availability, AvailabilityStatus::Missing);
    }

    #[tokio::test]
    async fn reconcile_is_idempotent() {
        let (metadata, cache) = harness();
        cache.write("f1", Bytes::from_static(b"x")).await.unwrap();
        let first = reconcile_cache(&metadata, &cache, &"f1".to_string()).await.unwrap();
        let second = reconcile_cache(&metadata, &cache, &"f1".to_string()).await.unwrap();
        assert_eq!(first, second);
    }
}
