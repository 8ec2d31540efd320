//! `CACHE_RESTORE` queue consumer: repopulates the cache tier from NAS
//! for a file that was evicted or never consolidated. See spec.md §4.6.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::{Result, StorageError};
use crate::model::{AvailabilityStatus, StorageObject, Tier};
use crate::ports::job_queue::{Job, JobHandler, JobPayload};
use crate::service::StorageService;

pub struct CacheRestoreWorker {
    service: StorageService,
}

impl CacheRestoreWorker {
    pub fn new(service: StorageService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl JobHandler for CacheRestoreWorker {
    async fn handle(&self, job: Job) -> Result<()> {
        let restore_job = match job.payload {
            JobPayload::CacheRestore(j) => j,
            _ => return Err(StorageError::Io("unexpected payload delivered to CACHE_RESTORE worker".into())),
        };
        restore(&self.service, &restore_job.file_id).await
    }
}

async fn restore(service: &StorageService, file_id: &str) -> Result<()> {
    let cache_row = service.metadata.get_storage_object(&file_id.to_string(), Tier::Cache).await?;
    let already_present = service.cache.exists(file_id).await?;

    if let Some(row) = &cache_row {
        if row.availability == AvailabilityStatus::Available && already_present {
            return Ok(()); // already restored by a previous attempt
        }
    }
    if already_present && cache_row.as_ref().map(|r| r.availability) != Some(AvailabilityStatus::Available) {
        // Blob exists but the row disagrees; repair the row in place
        // rather than re-fetching from NAS.
        let mut row = cache_row.unwrap_or_else(|| {
            StorageObject::new(file_id.to_string(), Tier::Cache, file_id.to_string(), AvailabilityStatus::Available)
        });
        row.availability = AvailabilityStatus::Available;
        service.metadata.upsert_storage_object(row).await?;
        return Ok(());
    }

    let nas_obj = service
        .metadata
        .get_storage_object(&file_id.to_string(), Tier::Nas)
        .await?
        .ok_or_else(|| StorageError::FileNotFoundInStorage(file_id.to_string()))?;

    if nas_obj.availability != AvailabilityStatus::Available {
        warn!(file_id = %file_id, availability = ?nas_obj.availability, "NAS row not AVAILABLE, skipping cache restore");
        return Ok(());
    }

    let nas_size = service.nas.size(&nas_obj.object_key).await?.unwrap_or(0);

    let result: Result<u64> = async {
        let stream = service.nas.stream_read(&nas_obj.object_key).await?;
        let written = service.cache.stream_write(file_id, stream).await?;
        Ok(written)
    }
    .await;

    let written = match result {
        Ok(n) => n,
        Err(e) => {
            warn!(file_id = %file_id, error = %e, "cache restore failed, cleaning up partial blob");
            let _ = service.cache.delete(file_id).await;
            mark_missing(service, file_id).await?;
            return Err(e);
        }
    };

    if written != nas_size {
        warn!(file_id = %file_id, written, nas_size, "cache restore size mismatch, discarding");
        let _ = service.cache.delete(file_id).await;
        mark_missing(service, file_id).await?;
        return Err(StorageError::CacheReadFailed(format!("restored {written} bytes, expected {nas_size}")));
    }

    let mut row = cache_row
        .unwrap_or_else(|| StorageObject::new(file_id.to_string(), Tier::Cache, file_id.to_string(), AvailabilityStatus::Available));
    row.availability = AvailabilityStatus::Available;
    row.checksum = nas_obj.checksum.clone();
    service.metadata.upsert_storage_object(row).await?;

    info!(file_id = %file_id, bytes = written, "cache restored from NAS");
    Ok(())
}

async fn mark_missing(service: &StorageService, file_id: &str) -> Result<()> {
    if let Some(mut row) = service.metadata.get_storage_object(&file_id.to_string(), Tier::Cache).await? {
        row.availability = AvailabilityStatus::Missing;
        service.metadata.upsert_storage_object(row).await?;
    }
    Ok(())
}
