//! Multipart (resumable) upload engine, per spec.md §4.3:
//! `initiate`/`uploadPart`/`complete`/`status`/`abort`.

use std::collections::BTreeSet;

use bytes::Bytes;
use chrono::{Duration as ChronoDuration, Utc};
use md5::{Digest, Md5};
use tracing::{info, warn};

use crate::error::{Result, StorageError};
use crate::model::{
    new_file_id, AvailabilityStatus, ConflictStrategy, File, FileState, SessionStatus, StorageObject,
    SyncAction, SyncEvent, Tier, UploadPart, UploadSession,
};
use crate::ports::job_queue::{JobOptions, JobPayload, NasSyncJob, QueueName};
use crate::ports::metadata::FileCreationTxn;
use crate::range::{nas_object_key, part_object_key};
use crate::service::StorageService;
use crate::upload::small::{FolderContext, FolderNasStatus};

/// Default lifetime of a freshly-initiated session, extended on each
/// part arrival up to [`max_session_lifetime`].
fn initial_session_lifetime() -> ChronoDuration {
    ChronoDuration::hours(2)
}

fn max_session_lifetime() -> ChronoDuration {
    ChronoDuration::hours(24)
}

pub struct InitiateRequest {
    pub file_name: String,
    pub folder_id: String,
    pub total_size: u64,
    pub mime_type: String,
    pub conflict_strategy: ConflictStrategy,
}

/// spec.md §4.3 `initiate`.
pub async fn initiate(service: &StorageService, folder: &FolderContext, req: InitiateRequest) -> Result<UploadSession> {
    if req.total_size < service.config.multipart_min_file_size {
        return Err(StorageError::FileTooSmallForMultipart {
            size: req.total_size,
            min: service.config.multipart_min_file_size,
        });
    }
    if req.total_size > service.config.max_file_size_bytes {
        return Err(StorageError::FileTooLarge { size: req.total_size, max: service.config.max_file_size_bytes });
    }
    if !folder.is_active {
        return Err(StorageError::FolderNotFound(folder.id.clone()));
    }
    match folder.nas_status {
        FolderNasStatus::Idle => {}
        FolderNasStatus::Syncing | FolderNasStatus::Moving => {
            return Err(StorageError::FolderSyncInProgress(folder.id.clone()));
        }
        FolderNasStatus::Error => return Err(StorageError::FolderSyncFailed(folder.id.clone())),
    }

    let folder_id = folder.id.clone();
    let part_size = service.config.default_part_size;
    let total_parts = crate::config::total_parts_for(req.total_size, part_size);
    let now = Utc::now();

    let session = UploadSession {
        id: uuid::Uuid::new_v4().to_string(),
        file_name: req.file_name,
        folder_id,
        total_size: req.total_size,
        mime_type: req.mime_type,
        part_size,
        total_parts,
        completed_parts: BTreeSet::new(),
        uploaded_bytes: 0,
        status: SessionStatus::Active,
        conflict_strategy: req.conflict_strategy,
        expires_at: now + initial_session_lifetime(),
        file_id: None,
        created_at: now,
        updated_at: now,
    };

    service.metadata.insert_session(session.clone()).await?;
    info!(session_id = %session.id, total_parts, "multipart session initiated");
    Ok(session)
}

/// Progress snapshot returned after a part upload, and by `status`.
#[derive(Debug, Clone)]
pub struct SessionProgress {
    pub session_id: String,
    pub status: SessionStatus,
    pub completed_parts: usize,
    pub total_parts: u32,
    pub uploaded_bytes: u64,
    pub total_size: u64,
    pub file_id: Option<String>,
}

impl From<&UploadSession> for SessionProgress {
    fn from(s: &UploadSession) -> Self {
        Self {
            session_id: s.id.clone(),
            status: s.status,
            completed_parts: s.completed_parts.len(),
            total_parts: s.total_parts,
            uploaded_bytes: s.uploaded_bytes,
            total_size: s.total_size,
            file_id: s.file_id.clone(),
        }
    }
}

/// spec.md §4.3 `uploadPart`. Idempotent: re-uploading the same
/// `(session_id, part_number)` with identical bytes returns the cached
/// etag without advancing counters twice.
pub async fn upload_part(
    service: &StorageService,
    session_id: &str,
    part_number: u32,
    bytes: Bytes,
) -> Result<SessionProgress> {
    let mut session = service
        .metadata
        .get_session(session_id)
        .await?
        .ok_or_else(|| StorageError::SessionNotFound(session_id.to_string()))?;

    if session.status != SessionStatus::Active {
        return Err(StorageError::SessionAborted(session_id.to_string()));
    }
    if Utc::now() > session.expires_at {
        session.status = SessionStatus::Expired;
        service.metadata.update_session(session.clone()).await?;
        return Err(StorageError::SessionExpired(session_id.to_string()));
    }
    if part_number < 1 || part_number > session.total_parts {
        return Err(StorageError::InvalidPartNumber { part_number, total_parts: session.total_parts });
    }

    let etag = hex::encode(Md5::digest(&bytes));

    if let Some(existing) = service.metadata.get_part(session_id, part_number).await? {
        if existing.etag == etag {
            return Ok(SessionProgress::from(&session));
        }
    }

    let object_key = part_object_key(session_id, part_number);
    let size = bytes.len() as u64;
    service.cache.write(&object_key, bytes).await?;

    let was_new = !session.completed_parts.contains(&part_number);
    let part = UploadPart { session_id: session_id.to_string(), part_number, size, object_key, etag, completed_at: Utc::now() };
    service.metadata.upsert_part(part).await?;

    session.completed_parts.insert(part_number);
    if was_new {
        session.uploaded_bytes += size;
    }
    session.updated_at = Utc::now();
    session.expires_at = (session.expires_at + ChronoDuration::minutes(30)).min(session.created_at + max_session_lifetime());
    service.metadata.update_session(session.clone()).await?;

    Ok(SessionProgress::from(&session))
}

/// spec.md §4.3 `complete`. Idempotent on COMPLETING/COMPLETED replay.
pub async fn complete(service: &StorageService, session_id: &str) -> Result<File> {
    let mut session = service
        .metadata
        .get_session(session_id)
        .await?
        .ok_or_else(|| StorageError::SessionNotFound(session_id.to_string()))?;

    match session.status {
        SessionStatus::Completed | SessionStatus::Completing => {
            let file_id = session
                .file_id
                .clone()
                .ok_or_else(|| StorageError::SessionNotFound(session_id.to_string()))?;
            return service
                .metadata
                .get_file(&file_id)
                .await?
                .ok_or_else(|| StorageError::FileNotFound(file_id));
        }
        SessionStatus::Aborted => return Err(StorageError::SessionAborted(session_id.to_string())),
        SessionStatus::Expired => return Err(StorageError::SessionExpired(session_id.to_string())),
        SessionStatus::Active => {}
    }

    if !session.is_complete() {
        return Err(StorageError::IncompleteParts { missing: session.missing_parts() });
    }

    let now = Utc::now();
    let resolved_name = match resolve_name_conflict(service, &session.folder_id, &session.file_name, session.conflict_strategy).await? {
        NameResolution::Proceed(name) => name,
        NameResolution::UseExisting(existing) => {
            session.status = SessionStatus::Completed;
            session.file_id = Some(existing.id.clone());
            session.updated_at = now;
            service.metadata.update_session(session).await?;
            discard_session_parts(service, session_id);
            info!(session_id = %session_id, file_id = %existing.id, "multipart session skipped: resolved to existing file");
            return Ok(existing);
        }
    };

    let file_id = new_file_id();
    let file = File {
        id: file_id.clone(),
        name: resolved_name.clone(),
        folder_id: session.folder_id.clone(),
        size_bytes: session.total_size,
        mime_type: session.mime_type.clone(),
        state: FileState::Active,
        created_by: String::new(),
        created_at: now,
        updated_at: now,
    };

    let cache_object = StorageObject::new(file_id.clone(), Tier::Cache, file_id.clone(), AvailabilityStatus::Syncing);
    let nas_object = StorageObject::new(
        file_id.clone(),
        Tier::Nas,
        nas_object_key(&session.folder_id, &resolved_name, now),
        AvailabilityStatus::Syncing,
    );
    let mut sync_event = SyncEvent::new(file_id.clone(), SyncAction::Upload);
    sync_event.multipart_session_id = Some(session_id.to_string());

    let txn = FileCreationTxn { file: file.clone(), cache_object, nas_object, sync_event: sync_event.clone() };

    if let Err(e) = service.metadata.commit_multipart_completion(txn, session_id).await {
        warn!(session_id = %session_id, error = %e, "multipart completion commit failed");
        return Err(e);
    }

    session.status = SessionStatus::Completing;
    session.file_id = Some(file_id.clone());
    session.updated_at = now;

    let payload = JobPayload::NasSync(NasSyncJob {
        file_id: file_id.clone(),
        action: SyncAction::Upload,
        sync_event_id: sync_event.id.clone(),
        multipart_session_id: Some(session_id.to_string()),
    });
    service.queue.add_job(QueueName::NasFileSync, payload, JobOptions::default()).await?;

    let mut event = sync_event;
    event.status = crate::model::SyncStatus::Queued;
    event.updated_at = Utc::now();
    service.metadata.update_sync_event(event).await?;

    info!(session_id = %session_id, file_id = %file_id, "multipart session completing");
    Ok(file)
}

/// Outcome of resolving a filename collision against `conflict_strategy`.
enum NameResolution {
    /// No collision, or the strategy picked a free name to proceed with.
    Proceed(String),
    /// `SKIP` resolved to the file already occupying that name; no new
    /// file should be created.
    UseExisting(File),
}

async fn resolve_name_conflict(service: &StorageService, folder_id: &str, name: &str, strategy: ConflictStrategy) -> Result<NameResolution> {
    let collision = service.metadata.find_active_file_by_name(folder_id, name).await?;
    let Some(existing) = collision else { return Ok(NameResolution::Proceed(name.to_string())) };

    match strategy {
        ConflictStrategy::Error => Err(StorageError::DuplicateFileExists(existing.id)),
        // OVERWRITE is deferred per spec.md §4.3; treated as ERROR until implemented.
        ConflictStrategy::Overwrite => Err(StorageError::DuplicateFileExists(existing.id)),
        ConflictStrategy::Skip => Ok(NameResolution::UseExisting(existing)),
        ConflictStrategy::Rename => {
            let (stem, ext) = split_stem_ext(name);
            for n in 1.. {
                let candidate = if ext.is_empty() { format!("{stem} ({n})") } else { format!("{stem} ({n}).{ext}") };
                if service.metadata.find_active_file_by_name(folder_id, &candidate).await?.is_none() {
                    return Ok(NameResolution::Proceed(candidate));
                }
            }
            unreachable!()
        }
    }
}

/// Background-reclaims a completed or skipped session's part blobs/rows,
/// same as [`abort`]'s cleanup.
fn discard_session_parts(service: &StorageService, session_id: &str) {
    let cache = service.cache.clone();
    let metadata = service.metadata.clone();
    let session_id = session_id.to_string();
    tokio::spawn(async move {
        if let Err(e) = cache.rmdir(&format!("multipart/{session_id}/")).await {
            warn!(session_id = %session_id, error = %e, "background part cleanup failed");
        }
        let _ = metadata.delete_parts(&session_id).await;
    });
}

fn split_stem_ext(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx + 1..]),
        _ => (name, ""),
    }
}

/// spec.md §4.3 `abort`.
pub async fn abort(service: &StorageService, session_id: &str) -> Result<()> {
    let mut session = service
        .metadata
        .get_session(session_id)
        .await?
        .ok_or_else(|| StorageError::SessionNotFound(session_id.to_string()))?;

    if session.status.is_terminal() {
        return Ok(());
    }
    if !session.status.can_transition_to(SessionStatus::Aborted) {
        return Err(StorageError::SessionAlreadyCompleted(session_id.to_string()));
    }

    session.status = SessionStatus::Aborted;
    session.updated_at = Utc::now();
    service.metadata.update_session(session).await?;

    discard_session_parts(service, session_id);
    Ok(())
}

/// spec.md §4.3 `status`.
pub async fn status(service: &StorageService, session_id: &str) -> Result<SessionProgress> {
    let session = service
        .metadata
        .get_session(session_id)
        .await?
        .ok_or_else(|| StorageError::SessionNotFound(session_id.to_string()))?;
    Ok(SessionProgress::from(&session))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::local_nas::LocalNas;
    use crate::adapters::mem_cache::InMemoryCache;
    use crate::adapters::mem_lock::InMemoryLock;
    use crate::adapters::mem_metadata::InMemoryMetadata;
    use crate::adapters::mem_queue::InMemoryQueue;
    use crate::adapters::moka_progress::MokaProgress;
    use crate::config::Config;
    use crate::upload::small::FolderNasStatus;
    use std::sync::Arc;

    fn harness() -> StorageService {
        let mut config = Config::default();
        config.multipart_min_file_size = 20;
        config.default_part_size = 10;
        StorageService::new(
            Arc::new(InMemoryCache::new()),
            Arc::new(LocalNas::new(std::env::temp_dir())),
            Arc::new(InMemoryQueue::new()),
            Arc::new(InMemoryLock::new()),
            Arc::new(MokaProgress::new(1000)),
            Arc::new(InMemoryMetadata::new()),
            config,
        )
        .unwrap()
    }

    fn active_folder() -> FolderContext {
        FolderContext { id: "root".into(), is_active: true, nas_status: FolderNasStatus::Idle }
    }

    #[tokio::test]
    async fn full_multipart_lifecycle_completes() {
        let service = harness();
        let session = initiate(
            &service,
            &active_folder(),
            InitiateRequest {
                file_name: "big.bin".into(),
                folder_id: "root".into(),
                total_size: 25,
                mime_type: "application/octet-stream".into(),
                conflict_strategy: ConflictStrategy::Error,
            },
        )
        .await
        .unwrap();
        assert_eq!(session.total_parts, 3);

        upload_part(&service, &session.id, 1, Bytes::from_static(b"0123456789")).await.unwrap();
        upload_part(&service, &session.id, 2, Bytes::from_static(b"0123456789")).await.unwrap();
        let progress = upload_part(&service, &session.id, 3, Bytes::from_static(b"01234")).await.unwrap();
        assert_eq!(progress.completed_parts, 3);

        let file = complete(&service, &session.id).await.unwrap();
        assert_eq!(file.name, "big.bin");
        assert_eq!(file.size_bytes, 25);

        // Replaying complete() on a COMPLETING session is idempotent.
        let replay = complete(&service, &session.id).await.unwrap();
        assert_eq!(replay.id, file.id);
    }

    #[tokio::test]
    async fn complete_rejects_incomplete_parts() {
        let service = harness();
        let session = initiate(
            &service,
            &active_folder(),
            InitiateRequest {
                file_name: "big.bin".into(),
                folder_id: "root".into(),
                total_size: 25,
                mime_type: "application/octet-stream".into(),
                conflict_strategy: ConflictStrategy::Error,
            },
        )
        .await
        .unwrap();
        upload_part(&service, &session.id, 1, Bytes::from_static(b"0123456789")).await.unwrap();
        let err = complete(&service, &session.id).await.unwrap_err();
        assert_eq!(err.code(), "INCOMPLETE_PARTS");
    }

    #[tokio::test]
    async fn replaying_upload_part_with_same_bytes_does_not_double_count() {
        let service = harness();
        let session = initiate(
            &service,
            &active_folder(),
            InitiateRequest {
                file_name: "big.bin".into(),
                folder_id: "root".into(),
                total_size: 25,
                mime_type: "application/octet-stream".into(),
                conflict_strategy: ConflictStrategy::Error,
            },
        )
        .await
        .unwrap();

        upload_part(&service, &session.id, 1, Bytes::from_static(b"0123456789")).await.unwrap();
        let progress = upload_part(&service, &session.id, 1, Bytes::from_static(b"0123456789")).await.unwrap();
        assert_eq!(progress.uploaded_bytes, 10);
    }

    #[tokio::test]
    async fn below_threshold_rejected() {
        let service = harness();
        let err = initiate(
            &service,
            &active_folder(),
            InitiateRequest {
                file_name: "small.bin".into(),
                folder_id: "root".into(),
                total_size: 5,
                mime_type: "application/octet-stream".into(),
                conflict_strategy: ConflictStrategy::Error,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "FILE_TOO_SMALL_FOR_MULTIPART");
    }
}
