//! Small (one-shot) upload, per spec.md §4.3.
//!
//! Folder hierarchy maintenance is an explicit out-of-scope collaborator
//! (spec.md §1); callers resolve and pass in a [`FolderContext`] snapshot
//! rather than this crate owning a folder store.

use bytes::Bytes;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::{Result, StorageError};
use crate::model::{
    new_file_id, AvailabilityStatus, File, FileState, StorageObject, SyncAction, SyncEvent, Tier,
};
use crate::ports::job_queue::{JobOptions, JobPayload, NasSyncJob, QueueName};
use crate::ports::metadata::FileCreationTxn;
use crate::range::nas_object_key;
use crate::service::StorageService;

/// External folder state, resolved by the caller (spec.md §1's
/// "folder hierarchy maintenance" is out of scope for this crate).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderNasStatus {
    Idle,
    Syncing,
    Moving,
    Error,
}

#[derive(Debug, Clone)]
pub struct FolderContext {
    pub id: String,
    pub is_active: bool,
    pub nas_status: FolderNasStatus,
}

/// Resolves `"root" | "" | "/"` to the canonical root folder id.
pub fn resolve_folder_id(raw: &str) -> String {
    match raw {
        "root" | "" | "/" => "root".to_string(),
        other => other.to_string(),
    }
}

fn validate_folder(folder: &FolderContext) -> Result<()> {
    if !folder.is_active {
        return Err(StorageError::FolderNotFound(folder.id.clone()));
    }
    match folder.nas_status {
        FolderNasStatus::Idle => Ok(()),
        FolderNasStatus::Syncing | FolderNasStatus::Moving => {
            Err(StorageError::FolderSyncInProgress(folder.id.clone()))
        }
        FolderNasStatus::Error => Err(StorageError::FolderSyncFailed(folder.id.clone())),
    }
}

/// Normalizes a client-supplied filename: trims whitespace. Unicode
/// normalization is delegated to the HTTP glue layer's decoding step;
/// this crate only trims, matching what's actually needed for the
/// duplicate-detection key in step 3.
fn normalize_name(name: &str) -> String {
    name.trim().to_string()
}

/// spec.md §4.3 small-upload algorithm. Returns the newly created
/// [`File`] on success.
pub async fn upload(
    service: &StorageService,
    folder: &FolderContext,
    raw_file_name: &str,
    mime_type: &str,
    created_by: &str,
    data: Bytes,
) -> Result<File> {
    if data.len() as u64 > service.config.max_file_size_bytes {
        return Err(StorageError::FileTooLarge { size: data.len() as u64, max: service.config.max_file_size_bytes });
    }
    validate_folder(folder)?;

    let name = normalize_name(raw_file_name);
    let now = Utc::now();

    if let Some(existing) = service
        .metadata
        .find_duplicate_file(&folder.id, &name, mime_type, now)
        .await?
    {
        return Err(StorageError::DuplicateFileExists(existing.id));
    }

    let checksum = hex::encode(Sha256::digest(&data));
    let file_id = new_file_id();

    if let Err(e) = service.cache.write(&file_id, data.clone()).await {
        warn!(file_id = %file_id, error = %e, "cache write failed during small upload");
        return Err(e);
    }

    let file = File {
        id: file_id.clone(),
        name: name.clone(),
        folder_id: folder.id.clone(),
        size_bytes: data.len() as u64,
        mime_type: mime_type.to_string(),
        state: FileState::Active,
        created_by: created_by.to_string(),
        created_at: now,
        updated_at: now,
    };

    let mut cache_object = StorageObject::new(file_id.clone(), Tier::Cache, file_id.clone(), AvailabilityStatus::Available);
    cache_object.checksum = Some(checksum);

    let nas_object = StorageObject::new(
        file_id.clone(),
        Tier::Nas,
        nas_object_key(&folder.id, &name, now),
        AvailabilityStatus::Syncing,
    );

    let sync_event = SyncEvent::new(file_id.clone(), SyncAction::Upload);

    let txn = FileCreationTxn {
        file: file.clone(),
        cache_object,
        nas_object,
        sync_event: sync_event.clone(),
    };

    if let Err(e) = service.metadata.commit_file_creation(txn).await {
        warn!(file_id = %file_id, error = %e, "metadata commit failed, rolling back cache blob");
        let _ = service.cache.delete(&file_id).await;
        return Err(e);
    }

    let job_payload = JobPayload::NasSync(NasSyncJob {
        file_id: file_id.clone(),
        action: SyncAction::Upload,
        sync_event_id: sync_event.id.clone(),
        multipart_session_id: None,
    });
    service.queue.add_job(QueueName::NasFileSync, job_payload, JobOptions::default()).await?;

    let mut event = sync_event;
    event.status = crate::model::SyncStatus::Queued;
    event.updated_at = Utc::now();
    service.metadata.update_sync_event(event).await?;

    info!(file_id = %file_id, "small upload committed, NAS sync queued");
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mem_cache::InMemoryCache;
    use crate::adapters::mem_lock::InMemoryLock;
    use crate::adapters::mem_metadata::InMemoryMetadata;
    use crate::adapters::mem_queue::InMemoryQueue;
    use crate::adapters::moka_progress::MokaProgress;
    use crate::config::Config;
    use std::sync::Arc;

    fn harness() -> StorageService {
        StorageService::new(
            Arc::new(InMemoryCache::new()),
            Arc::new(crate::adapters::local_nas::LocalNas::new(std::env::temp_dir())),
            Arc::new(InMemoryQueue::new()),
            Arc::new(InMemoryLock::new()),
            Arc::new(MokaProgress::new(1000)),
            Arc::new(InMemoryMetadata::new()),
            Config::default(),
        )
        .unwrap()
    }

    fn active_folder() -> FolderContext {
        FolderContext { id: "root".into(), is_active: true, nas_status: FolderNasStatus::Idle }
    }

    #[tokio::test]
    async fn small_upload_commits_file_and_queues_sync() {
        let service = harness();
        let file = upload(&service, &active_folder(), "111.txt", "text/plain", "u1", Bytes::from_static(b"aaaaaaaaaaaaaaaaaaaa"))
            .await
            .unwrap();

        assert_eq!(file.name, "111.txt");
        assert_eq!(file.size_bytes, 20);
        assert_eq!(file.state, FileState::Active);

        let cache_obj = service.metadata.get_storage_object(&file.id, Tier::Cache).await.unwrap().unwrap();
        assert_eq!(cache_obj.availability, AvailabilityStatus::Available);
        let nas_obj = service.metadata.get_storage_object(&file.id, Tier::Nas).await.unwrap().unwrap();
        assert_eq!(nas_obj.availability, AvailabilityStatus::Syncing);
    }

    #[tokio::test]
    async fn duplicate_by_folder_name_mime_and_created_at_is_detected() {
        let service = harness();
        let folder = active_folder();
        let first = upload(&service, &folder, "a.txt", "text/plain", "u1", Bytes::from_static(b"x")).await.unwrap();

        let found = service
            .metadata
            .find_duplicate_file(&first.folder_id, &first.name, &first.mime_type, first.created_at)
            .await
            .unwrap();
        assert_eq!(found.unwrap().id, first.id);
    }

    #[tokio::test]
    async fn folder_sync_in_progress_is_rejected() {
        let service = harness();
        let folder = FolderContext { id: "root".into(), is_active: true, nas_status: FolderNasStatus::Syncing };
        let err = upload(&service, &folder, "a.txt", "text/plain", "u1", Bytes::from_static(b"x")).await.unwrap_err();
        assert_eq!(err.code(), "FOLDER_SYNC_IN_PROGRESS");
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected() {
        let mut config = Config::default();
        config.max_file_size_bytes = 5;
        let service = StorageService::new(
            Arc::new(InMemoryCache::new()),
            Arc::new(crate::adapters::local_nas::LocalNas::new(std::env::temp_dir())),
            Arc::new(InMemoryQueue::new()),
            Arc::new(InMemoryLock::new()),
            Arc::new(MokaProgress::new(1000)),
            Arc::new(InMemoryMetadata::new()),
            config,
        )
        .unwrap();
        let err = upload(&service, &active_folder(), "a.txt", "text/plain", "u1", Bytes::from_static(b"too big"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FILE_TOO_LARGE");
    }
}
