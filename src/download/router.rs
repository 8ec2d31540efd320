//! Download router (C8): state-driven fan-in across cache/NAS/parts, range
//! negotiation, ETag/If-Range. See spec.md §4.2.

use chrono::{DateTime, Utc};

use crate::download::byte_counter::ByteCounterStream;
use crate::download::parts_branch;
use crate::error::{Result, StorageError};
use crate::model::{AvailabilityStatus, FileState, Tier};
use crate::ports::job_queue::{CacheRestoreJob, JobOptions, JobPayload, QueueName};
use crate::ports::ByteStream;
use crate::range::{parse_range, ByteRange};
use crate::service::StorageService;
use crate::storage::lease::{acquire_lease, LeaseGuard};
use crate::storage::state_machine::{reconcile_cache, CacheUsability};

pub struct DownloadRequest {
    pub file_id: String,
    pub range_header: Option<String>,
    pub if_range_header: Option<String>,
}

/// Released exactly once by the caller at stream end (success, error, or
/// abort), per spec.md §4.2's release discipline.
pub enum ReleaseToken {
    Lease(LeaseGuard),
    None,
}

impl ReleaseToken {
    pub async fn release(self) {
        if let ReleaseToken::Lease(guard) = self {
            let _ = guard.release().await;
        }
    }
}

pub struct DownloadResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub stream: ByteStream,
    pub release: ReleaseToken,
}

/// Outcome of [`download`]: either a servable response, or an
/// unsatisfiable-range 416 (not modeled as an error since it isn't one of
/// spec.md §7's fatal conditions).
pub enum DownloadOutcome {
    Response(DownloadResponse),
    RangeNotSatisfiable { content_range: String },
}

impl std::fmt::Debug for DownloadOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DownloadOutcome::Response(r) => f.debug_struct("Response").field("status", &r.status).finish(),
            DownloadOutcome::RangeNotSatisfiable { content_range } => {
                f.debug_struct("RangeNotSatisfiable").field("content_range", content_range).finish()
            }
        }
    }
}

/// spec.md §4.2 `download(fileId, rangeHdr?, ifRangeHdr?)`.
pub async fn download(service: &StorageService, req: DownloadRequest) -> Result<DownloadOutcome> {
    let file = service
        .metadata
        .get_file(&req.file_id)
        .await?
        .ok_or_else(|| StorageError::FileNotFound(req.file_id.clone()))?;

    match file.state {
        FileState::Trashed => return Err(StorageError::FileInTrash(file.id)),
        FileState::Deleted => return Err(StorageError::FileDeleted(file.id)),
        FileState::Active => {}
    }

    let range = match &req.range_header {
        Some(header) => match parse_range(header, file.size_bytes) {
            Ok(r) => Some(r),
            Err(_) => {
                return Ok(DownloadOutcome::RangeNotSatisfiable {
                    content_range: format!("bytes */{}", file.size_bytes),
                })
            }
        },
        None => None,
    };

    let nas_obj = service.metadata.get_storage_object(&file.id, Tier::Nas).await?;

    let parts_session = if matches!(nas_obj.as_ref().map(|o| o.availability), Some(AvailabilityStatus::Syncing)) {
        let session = service.metadata.get_completing_session_for_file(&file.id).await?;
        if session.is_none() {
            return Err(StorageError::FileSyncing(file.id.clone()));
        }
        session
    } else {
        None
    };

    if let Some(session) = parts_session {
        return serve_parts_branch(service, &file, &session, range).await;
    }

    serve_tiered(service, &file, nas_obj, range, req.if_range_header.as_deref()).await
}

async fn serve_parts_branch(
    service: &StorageService,
    file: &crate::model::File,
    session: &crate::model::UploadSession,
    range: Option<ByteRange>,
) -> Result<DownloadOutcome> {
    let parts = service.metadata.list_parts(&session.id).await?;
    let cache = service.cache.clone();

    let (status, headers_range, stream) = match range {
        Some(r) => {
            let stream = parts_branch::stream_range(cache, &session.id, &parts, session.part_size, r)?;
            (206u16, Some((r.start, r.end, file.size_bytes)), stream)
        }
        None => {
            let stream = parts_branch::stream_full(cache, &session.id, &parts);
            (200u16, None, stream)
        }
    };

    let mut headers = base_headers(file, None);
    if let Some((start, end, total)) = headers_range {
        headers.push(("Content-Range".into(), format!("bytes {start}-{end}/{total}")));
        headers.push(("Content-Length".into(), (end - start + 1).to_string()));
    } else {
        headers.push(("Content-Length".into(), file.size_bytes.to_string()));
    }

    let counted = ByteCounterStream::new(stream, file.id.clone(), headers_range.map(|(s, e, _)| e - s + 1).unwrap_or(file.size_bytes));

    Ok(DownloadOutcome::Response(DownloadResponse {
        status,
        headers,
        stream: counted.into_stream(),
        release: ReleaseToken::None,
    }))
}

async fn serve_tiered(
    service: &StorageService,
    file: &crate::model::File,
    nas_obj: Option<crate::model::StorageObject>,
    range: Option<ByteRange>,
    if_range: Option<&str>,
) -> Result<DownloadOutcome> {
    let usable = reconcile_cache(&service.metadata, &service.cache, &file.id).await?;

    let (tier, checksum) = if usable == CacheUsability::Usable {
        let obj = service.metadata.get_storage_object(&file.id, Tier::Cache).await?;
        (Tier::Cache, obj.and_then(|o| o.checksum))
    } else {
        match &nas_obj {
            Some(obj) if obj.availability == AvailabilityStatus::Available => (Tier::Nas, obj.checksum.clone()),
            Some(_) => return Err(StorageError::FileStorageUnavailable(file.id.clone())),
            None => return Err(StorageError::FileNotFoundInStorage(file.id.clone())),
        }
    };

    if let (Some(checksum), Some(if_range_value)) = (&checksum, if_range) {
        let etag = format!("\"{checksum}\"");
        if if_range_value != etag {
            return open_and_respond(service, file, tier, checksum.clone(), None).await;
        }
    }

    open_and_respond(service, file, tier, checksum.unwrap_or_default(), range).await
}

async fn open_and_respond(
    service: &StorageService,
    file: &crate::model::File,
    tier: Tier,
    checksum: String,
    range: Option<ByteRange>,
) -> Result<DownloadOutcome> {
    let guard = acquire_lease(&service.metadata, &file.id, tier).await?;

    let open_result = match tier {
        Tier::Cache => match range {
            Some(r) => service.cache.range_stream_read(&file.id, r.start, r.end).await,
            None => service.cache.stream_read(&file.id).await,
        },
        Tier::Nas => {
            let object_key = service
                .metadata
                .get_storage_object(&file.id, Tier::Nas)
                .await?
                .map(|o| o.object_key)
                .unwrap_or_else(|| file.id.clone());
            match range {
                Some(r) => service.nas.range_stream_read(&object_key, r.start, r.end).await,
                None => service.nas.stream_read(&object_key).await,
            }
        }
    };

    let stream = match open_result {
        Ok(s) => s,
        Err(e) => {
            let _ = guard.release().await;
            return Err(e);
        }
    };

    if tier == Tier::Nas {
        let payload = JobPayload::CacheRestore(CacheRestoreJob { file_id: file.id.clone() });
        let opts = JobOptions { job_id: Some(format!("cache-restore:{}", file.id)), ..JobOptions::default() };
        let _ = service.queue.add_job(QueueName::CacheRestore, payload, opts).await;
    }

    let etag = (!checksum.is_empty()).then(|| format!("\"{checksum}\""));
    let mut headers = base_headers(file, etag.clone());
    let (status, expected_len) = match range {
        Some(r) => {
            headers.push(("Content-Range".into(), format!("bytes {}-{}/{}", r.start, r.end, file.size_bytes)));
            headers.push(("Content-Length".into(), r.len().to_string()));
            (206u16, r.len())
        }
        None => {
            headers.push(("Content-Length".into(), file.size_bytes.to_string()));
            if !checksum.is_empty() {
                headers.push(("X-Checksum-SHA256".into(), checksum));
            }
            (200u16, file.size_bytes)
        }
    };

    let counted = ByteCounterStream::new(stream, file.id.clone(), expected_len);

    Ok(DownloadOutcome::Response(DownloadResponse {
        status,
        headers,
        stream: counted.into_stream(),
        release: ReleaseToken::Lease(guard),
    }))
}

fn base_headers(file: &crate::model::File, etag: Option<String>) -> Vec<(String, String)> {
    let disposition_kind = if is_previewable(&file.mime_type) { "inline" } else { "attachment" };
    let encoded_name = urlencode(&file.name);
    let mut headers = vec![
        ("Content-Type".into(), file.mime_type.clone()),
        ("Accept-Ranges".into(), "bytes".into()),
        ("Content-Disposition".into(), format!("{disposition_kind}; filename*=UTF-8''{encoded_name}")),
        ("Last-Modified".into(), http_date(file.updated_at)),
    ];
    if let Some(etag) = etag {
        headers.push(("ETag".into(), etag));
    }
    headers
}

fn is_previewable(mime_type: &str) -> bool {
    matches!(mime_type, "application/pdf") || mime_type.starts_with("image/") || mime_type.starts_with("text/")
}

fn http_date(ts: DateTime<Utc>) -> String {
    ts.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn urlencode(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
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
    use crate::upload::small::{upload, FolderContext, FolderNasStatus};
    use bytes::Bytes;
    use futures::StreamExt;
    use std::sync::Arc;

    fn harness() -> StorageService {
        StorageService::new(
            Arc::new(InMemoryCache::new()),
            Arc::new(LocalNas::new(std::env::temp_dir())),
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

    async fn drain(stream: ByteStream) -> Vec<u8> {
        let mut out = Vec::new();
        let mut stream = stream;
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn full_download_serves_from_cache_while_nas_is_syncing() {
        let service = harness();
        let file = upload(&service, &active_folder(), "a.txt", "text/plain", "u1", Bytes::from_static(b"hello world"))
            .await
            .unwrap();

        let outcome = download(&service, DownloadRequest { file_id: file.id.clone(), range_header: None, if_range_header: None })
            .await
            .unwrap();
        match outcome {
            DownloadOutcome::Response(resp) => {
                assert_eq!(resp.status, 200);
                assert_eq!(drain(resp.stream).await, b"hello world");
                resp.release.release().await;
            }
            _ => panic!("expected a response"),
        }
    }

    #[tokio::test]
    async fn ranged_download_returns_206_with_slice() {
        let service = harness();
        let file = upload(&service, &active_folder(), "a.txt", "text/plain", "u1", Bytes::from_static(b"0123456789"))
            .await
            .unwrap();

        let outcome = download(
            &service,
            DownloadRequest { file_id: file.id.clone(), range_header: Some("bytes=0-3".into()), if_range_header: None },
        )
        .await
        .unwrap();
        match outcome {
            DownloadOutcome::Response(resp) => {
                assert_eq!(resp.status, 206);
                assert!(resp.headers.iter().any(|(k, v)| k == "Content-Range" && v == "bytes 0-3/10"));
                assert_eq!(drain(resp.stream).await, b"0123");
                resp.release.release().await;
            }
            _ => panic!("expected a response"),
        }
    }

    #[tokio::test]
    async fn unsatisfiable_range_returns_416_outcome() {
        let service = harness();
        let file = upload(&service, &active_folder(), "a.txt", "text/plain", "u1", Bytes::from_static(b"12345"))
            .await
            .unwrap();

        let outcome = download(
            &service,
            DownloadRequest { file_id: file.id.clone(), range_header: Some("bytes=99-".into()), if_range_header: None },
        )
        .await
        .unwrap();
        match outcome {
            DownloadOutcome::RangeNotSatisfiable { content_range } => assert_eq!(content_range, "bytes */5"),
            _ => panic!("expected 416"),
        }
    }

    #[tokio::test]
    async fn unknown_file_is_not_found() {
        let service = harness();
        let err = download(&service, DownloadRequest { file_id: "missing".into(), range_header: None, if_range_header: None })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FILE_NOT_FOUND");
    }
}
