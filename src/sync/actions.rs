//! Per-action NAS mutation handlers dispatched by [`super::worker`].
//! Every handler is idempotent: it first checks whether the mutation it's
//! about to perform already landed (replayed delivery, crash-and-retry)
//! and returns early if so, per spec.md §4.5/§7/§9.

use bytes::{Bytes, BytesMut};
use futures::future::try_join_all;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::{Result, StorageError};
use crate::model::{AvailabilityStatus, FileState, StorageObject, SyncEvent, Tier};
use crate::ports::nas_store::is_already_applied;
use crate::service::StorageService;

/// Dispatches `event` to its action-specific handler.
pub async fn apply(service: &StorageService, event: &SyncEvent) -> Result<()> {
    use crate::model::SyncAction::*;
    match event.event_type {
        Upload => upload(service, event).await,
        Rename => rename(service, event).await,
        Move => move_action(service, event).await,
        Trash => trash(service, event).await,
        Restore => restore(service, event).await,
        Purge => purge(service, event).await,
    }
}

/// Result of loading the current NAS [`StorageObject`] for an action, per
/// spec.md §4.5 step 2: a missing row means the file was deleted out from
/// under the sync pipeline, and the caller should mark the event DONE
/// without treating that as a failure.
enum NasLookup {
    Found(StorageObject),
    MissingDone,
}

async fn nas_object(service: &StorageService, file_id: &str) -> Result<NasLookup> {
    match service.metadata.get_storage_object(&file_id.to_string(), Tier::Nas).await? {
        Some(obj) => Ok(NasLookup::Found(obj)),
        None => Ok(NasLookup::MissingDone),
    }
}

async fn upload(service: &StorageService, event: &SyncEvent) -> Result<()> {
    let mut nas_obj = match nas_object(service, &event.file_id).await? {
        NasLookup::Found(obj) => obj,
        NasLookup::MissingDone => {
            info!(file_id = %event.file_id, "NAS row missing, file deleted out from under sync; marking event done");
            return Ok(());
        }
    };
    if nas_obj.availability == AvailabilityStatus::Available {
        return Ok(()); // already landed, replayed delivery
    }

    let (bytes, checksum) = match &event.multipart_session_id {
        Some(session_id) => assemble_from_parts(service, session_id).await?,
        None => {
            let data = service.cache.read(&event.file_id).await?;
            let checksum = hex::encode(Sha256::digest(&data));
            (data, checksum)
        }
    };

    write_to_nas(service, &nas_obj.object_key, bytes.clone()).await?;

    if event.multipart_session_id.is_some() {
        // The multipart cache blob lives under per-part keys; consolidate
        // into the single file_id-keyed object small uploads already use,
        // so downloads can leave the parts branch once this lands.
        service.cache.write(&event.file_id, bytes).await?;
        let mut cache_obj = service
            .metadata
            .get_storage_object(&event.file_id, Tier::Cache)
            .await?
            .ok_or_else(|| StorageError::FileNotFoundInStorage(event.file_id.clone()))?;
        cache_obj.availability = AvailabilityStatus::Available;
        cache_obj.object_key = event.file_id.clone();
        cache_obj.checksum = Some(checksum.clone());
        service.metadata.upsert_storage_object(cache_obj).await?;

        let session_id = event.multipart_session_id.as_ref().unwrap();
        service.cache.rmdir(&format!("multipart/{session_id}/")).await?;
        service.metadata.delete_parts(session_id).await?;
        if let Some(mut session) = service.metadata.get_session(session_id).await? {
            session.status = crate::model::SessionStatus::Completed;
            session.updated_at = chrono::Utc::now();
            service.metadata.update_session(session).await?;
        }
    }

    nas_obj.availability = AvailabilityStatus::Available;
    nas_obj.checksum = Some(checksum);
    service.metadata.upsert_storage_object(nas_obj).await?;
    info!(file_id = %event.file_id, "upload sync landed");
    Ok(())
}

/// Writes `data` to NAS, splitting into parallel positional chunks above
/// `nas_parallel_upload_threshold_bytes` (spec.md §4.5).
async fn write_to_nas(service: &StorageService, key: &str, data: Bytes) -> Result<()> {
    let cfg = &service.config;
    if data.len() as u64 <= cfg.nas_parallel_upload_threshold_bytes {
        return service.nas.write(key, data).await;
    }

    service.nas.preallocate(key, data.len() as u64).await?;
    let chunk_size = cfg.nas_parallel_upload_chunk_size.max(1) as usize;
    let chunks: Vec<(u64, Bytes)> = data
        .chunks(chunk_size)
        .enumerate()
        .map(|(i, c)| ((i * chunk_size) as u64, Bytes::copy_from_slice(c)))
        .collect();

    let writes = chunks.into_iter().map(|(offset, chunk)| {
        let nas = service.nas.clone();
        let key = key.to_string();
        async move { nas.chunk_write(&key, chunk, offset).await }
    });
    try_join_all(writes).await?;
    Ok(())
}

async fn assemble_from_parts(service: &StorageService, session_id: &str) -> Result<(Bytes, String)> {
    let parts = service.metadata.list_parts(session_id).await?;
    let total: usize = parts.iter().map(|p| p.size as usize).sum();
    let mut buf = BytesMut::with_capacity(total);
    let mut hasher = Sha256::new();
    for part in parts {
        let data = service.cache.read(&part.object_key).await?;
        hasher.update(&data);
        buf.extend_from_slice(&data);
    }
    Ok((buf.freeze(), hex::encode(hasher.finalize())))
}

async fn rename(service: &StorageService, event: &SyncEvent) -> Result<()> {
    let mut nas_obj = match nas_object(service, &event.file_id).await? {
        NasLookup::Found(obj) => obj,
        NasLookup::MissingDone => {
            info!(file_id = %event.file_id, "NAS row missing, file deleted out from under sync; marking event done");
            return Ok(());
        }
    };
    let (from, to) = (event.source_path.as_deref().unwrap_or_default(), event.target_path.as_deref().unwrap_or_default());

    if nas_obj.object_key == to {
        nas_obj.availability = AvailabilityStatus::Available;
        service.metadata.upsert_storage_object(nas_obj).await?;
        return Ok(());
    }

    match service.nas.rename(from, to).await {
        Ok(()) => {}
        Err(e) if is_already_applied(&e) => {}
        Err(e) => return Err(e),
    }

    nas_obj.object_key = to.to_string();
    nas_obj.availability = AvailabilityStatus::Available;
    service.metadata.upsert_storage_object(nas_obj).await?;
    Ok(())
}

/// Issues the physical NAS rename for a move, guarded against the
/// destination folder having been deleted between request and
/// processing: `lifecycle::move_file` calls `nas.folder_create` on the
/// destination before enqueuing, so a missing destination directory here
/// means it was torn down afterward, not that it was simply never used.
/// In that case the File's folderId reverts to where the object still
/// physically lives and the object is marked AVAILABLE without moving,
/// per spec.md §4.5's move guard.
async fn move_action(service: &StorageService, event: &SyncEvent) -> Result<()> {
    let mut nas_obj = match nas_object(service, &event.file_id).await? {
        NasLookup::Found(obj) => obj,
        NasLookup::MissingDone => {
            info!(file_id = %event.file_id, "NAS row missing, file deleted out from under sync; marking event done");
            return Ok(());
        }
    };
    let (from, to) = (event.source_path.as_deref().unwrap_or_default(), event.target_path.as_deref().unwrap_or_default());

    if nas_obj.object_key == to {
        nas_obj.availability = AvailabilityStatus::Available;
        service.metadata.upsert_storage_object(nas_obj).await?;
        return Ok(());
    }

    let dest_folder = crate::range::folder_id_from_object_key(to).unwrap_or_default();
    if !service.nas.exists(dest_folder).await.unwrap_or(false) {
        if let Some(origin_folder) = crate::range::folder_id_from_object_key(from) {
            if let Some(mut file) = service.metadata.get_file(&event.file_id).await? {
                file.folder_id = origin_folder.to_string();
                file.updated_at = chrono::Utc::now();
                service.metadata.update_file(file).await?;
            }
        }
        warn!(file_id = %event.file_id, dest_folder, "destination folder vanished before move landed, reverting");
        nas_obj.availability = AvailabilityStatus::Available;
        service.metadata.upsert_storage_object(nas_obj).await?;
        return Ok(());
    }

    match service.nas.rename(from, to).await {
        Ok(()) => {}
        Err(e) if is_already_applied(&e) => {}
        Err(e) => return Err(e),
    }

    nas_obj.object_key = to.to_string();
    nas_obj.availability = AvailabilityStatus::Available;
    service.metadata.upsert_storage_object(nas_obj).await?;
    Ok(())
}

async fn trash(service: &StorageService, event: &SyncEvent) -> Result<()> {
    let mut nas_obj = match nas_object(service, &event.file_id).await? {
        NasLookup::Found(obj) => obj,
        NasLookup::MissingDone => {
            info!(file_id = %event.file_id, "NAS row missing, file deleted out from under sync; marking event done");
            return Ok(());
        }
    };
    let (from, to) = (event.source_path.as_deref().unwrap_or_default(), event.target_path.as_deref().unwrap_or_default());

    if nas_obj.object_key == to {
        nas_obj.availability = AvailabilityStatus::Available;
        service.metadata.upsert_storage_object(nas_obj).await?;
        return Ok(());
    }

    match service.nas.rename(from, to).await {
        Ok(()) => {}
        Err(e) if is_already_applied(&e) => {}
        Err(e) => return Err(e),
    }

    nas_obj.object_key = to.to_string();
    nas_obj.availability = AvailabilityStatus::Available;
    service.metadata.upsert_storage_object(nas_obj).await?;
    Ok(())
}

async fn restore(service: &StorageService, event: &SyncEvent) -> Result<()> {
    // Same shape as trash: rename trashed path back to its original key.
    rename(service, event).await
}

async fn purge(service: &StorageService, event: &SyncEvent) -> Result<()> {
    let nas_obj = match nas_object(service, &event.file_id).await? {
        NasLookup::Found(obj) => obj,
        NasLookup::MissingDone => {
            info!(file_id = %event.file_id, "NAS row already gone for purge, nothing left to remove");
            return Ok(());
        }
    };

    // Cache failure is logged and not fatal; NAS failure is fatal for this
    // job, per spec.md §4.5/§7.
    if let Err(e) = service.cache.delete(&event.file_id).await {
        warn!(file_id = %event.file_id, error = %e, "cache blob delete failed during purge, continuing");
    }
    service.metadata.delete_storage_object(&event.file_id, Tier::Cache).await?;

    service.nas.delete(&nas_obj.object_key).await?;
    service.metadata.delete_storage_object(&event.file_id, Tier::Nas).await?;

    if let Some(mut file) = service.metadata.get_file(&event.file_id).await? {
        file.state = FileState::Deleted;
        file.updated_at = chrono::Utc::now();
        service.metadata.update_file(file).await?;
    }
    Ok(())
}
