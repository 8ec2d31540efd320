//! HTTP Range header parsing and NAS object-key path building. Pure
//! helpers (C14), per spec.md §4.8 / §6.

use chrono::{DateTime, Utc};

use crate::error::{Result, StorageError};

/// An inclusive byte range, always valid against the size it was parsed
/// against (`start <= end < size`).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Parses a `Range: bytes=...` header against `size`. Accepts only
/// `bytes=a-b`, `bytes=a-`, `bytes=-N`; rejects multi-range and malformed
/// syntax. `start >= size` is unsatisfiable; `end >= size` clamps.
pub fn parse_range(header: &str, size: u64) -> Result<ByteRange> {
    let spec = header.strip_prefix("bytes=").ok_or_else(|| invalid(header))?;
    if spec.contains(',') {
        return Err(invalid(header));
    }
    let (start_str, end_str) = spec.split_once('-').ok_or_else(|| invalid(header))?;

    let range = if start_str.is_empty() {
        // suffix range: bytes=-N -> last N bytes
        let n: u64 = end_str.parse().map_err(|_| invalid(header))?;
        if n == 0 || size == 0 {
            return Err(invalid(header));
        }
        let start = size.saturating_sub(n);
        ByteRange { start, end: size - 1 }
    } else {
        let start: u64 = start_str.parse().map_err(|_| invalid(header))?;
        let end = if end_str.is_empty() {
            size.saturating_sub(1)
        } else {
            end_str.parse().map_err(|_| invalid(header))?
        };
        if start >= size || start > end {
            return Err(invalid(header));
        }
        ByteRange { start, end: end.min(size.saturating_sub(1)) }
    };

    if range.start >= size {
        return Err(invalid(header));
    }
    Ok(range)
}

fn invalid(header: &str) -> StorageError {
    StorageError::InvalidRange(header.to_string())
}

/// NAS object key for a freshly uploaded file: `<folderId>/YYYYMMDDhhmmss__<name>`
/// (UTC), per spec.md §6 -- object keys live at the folder's path, not in a
/// flat namespace.
pub fn nas_object_key(folder_id: &str, name: &str, created_at: DateTime<Utc>) -> String {
    format!("{folder_id}/{}__{}", created_at.format("%Y%m%d%H%M%S"), name)
}

/// Rewrites the folder segment of an existing folder-qualified NAS
/// objectKey, keeping its `TS__name` suffix intact. Used by the move
/// handler (spec.md §4.5).
pub fn move_to_folder(object_key: &str, new_folder_id: &str) -> String {
    match object_key.rsplit_once('/') {
        Some((_, rest)) => format!("{new_folder_id}/{rest}"),
        None => format!("{new_folder_id}/{object_key}"),
    }
}

/// The folder segment of a folder-qualified NAS objectKey, or `None` for
/// keys with no folder prefix (trash paths, legacy flat keys).
pub fn folder_id_from_object_key(object_key: &str) -> Option<&str> {
    if object_key.starts_with(".trash/") {
        return None;
    }
    object_key.rsplit_once('/').map(|(folder, _)| folder)
}

/// Trash path for a NAS object: `.trash/<trashMetadataId>__<basename>`.
pub fn trash_path(trash_metadata_id: &str, basename: &str) -> String {
    format!(".trash/{trash_metadata_id}__{basename}")
}

/// Reverses [`trash_path`]: strips the `.trash/` prefix and the
/// `<trashMetadataId>__` marker, returning the original basename.
pub fn basename_from_trash_path(trash_path: &str) -> Option<&str> {
    let stripped = trash_path.strip_prefix(".trash/")?;
    stripped.split_once("__").map(|(_, rest)| rest)
}

/// Cache/multipart part object key: `multipart/<sessionId>/part_<00001>`.
pub fn part_object_key(session_id: &str, part_number: u32) -> String {
    format!("multipart/{session_id}/part_{part_number:05}")
}

/// Replaces the filename component of an existing NAS objectKey while
/// preserving its leading `YYYYMMDDhhmmss` timestamp prefix, per spec.md
/// §4.5's rename handler.
pub fn rename_preserving_timestamp(old_object_key: &str, new_name: &str) -> String {
    match old_object_key.split_once("__") {
        Some((prefix, _)) => format!("{prefix}__{new_name}"),
        None => new_name.to_string(),
    }
}
