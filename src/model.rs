//! Data model: [`File`], [`StorageObject`], [`UploadSession`], [`UploadPart`],
//! [`SyncEvent`], [`QueueTicket`], [`ProgressRecord`] --- see spec.md §3.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque file identifier (UUID-shaped string, per spec.md §3).
pub type FileId = String;

/// Mints a new random file identifier.
pub fn new_file_id() -> FileId {
    Uuid::new_v4().to_string()
}

/// Lifecycle state of a [`File`]. Forms the DAG
/// `ACTIVE -> TRASHED -> {ACTIVE, DELETED}`; `DELETED` is terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileState {
    Active,
    Trashed,
    Deleted,
}

impl FileState {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: FileState) -> bool {
        use FileState::*;
        matches!(
            (self, next),
            (Active, Trashed) | (Trashed, Active) | (Trashed, Deleted)
        )
    }
}

/// A logical file known to the service, independent of which tier(s)
/// currently hold its bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct File {
    pub id: FileId,
    pub name: String,
    pub folder_id: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub state: FileState,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl File {
    /// Applies `rename`, preserving the (case-insensitive) extension
    /// invariant from spec.md §3. Returns the prior name on success.
    pub fn rename(&mut self, new_name: &str) -> crate::error::Result<String> {
        let old_ext = extension(&self.name);
        let new_ext = extension(new_name);
        if !old_ext.eq_ignore_ascii_case(&new_ext) {
            return Err(crate::error::StorageError::FileExtensionChangeNotAllowed);
        }
        let previous = std::mem::replace(&mut self.name, new_name.to_string());
        self.updated_at = Utc::now();
        Ok(previous)
    }
}

/// Returns the extension of `name` (without the leading dot), or `""`.
pub fn extension(name: &str) -> String {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name[idx + 1..].to_string(),
        _ => String::new(),
    }
}

/// The tier a [`StorageObject`] belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    Cache,
    Nas,
}

/// Availability state of a [`StorageObject`]. See spec.md §4.1 for the
/// transition diagram.
#[derive(Debug, Copy, Clone, PartialEq, Eq, num_derive::FromPrimitive, num_derive::ToPrimitive)]
pub enum AvailabilityStatus {
    Available = 0,
    Syncing = 1,
    Missing = 2,
    Evicting = 3,
    Error = 4,
}

/// One (fileId, tier) pairing's metadata row.
#[derive(Debug, Clone)]
pub struct StorageObject {
    pub id: String,
    pub file_id: FileId,
    pub tier: Tier,
    pub object_key: String,
    pub availability: AvailabilityStatus,
    pub access_count: u64,
    pub lease_count: u32,
    pub last_accessed: Option<DateTime<Utc>>,
    pub checksum: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StorageObject {
    pub fn new(file_id: FileId, tier: Tier, object_key: String, availability: AvailabilityStatus) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            file_id,
            tier,
            object_key,
            availability,
            access_count: 0,
            lease_count: 0,
            last_accessed: None,
            checksum: None,
            created_at: Utc::now(),
        }
    }

    /// Acquires a read lease. Advisory only; see spec.md §4.1.
    pub fn acquire_lease(&mut self) {
        self.lease_count += 1;
        self.access_count += 1;
        self.last_accessed = Some(Utc::now());
    }

    /// Releases a previously-acquired lease. Clamps at zero and never
    /// errors, per spec.md §4.1 ("releaseLease ... never propagates
    /// errors to callers").
    pub fn release_lease(&mut self) {
        self.lease_count = self.lease_count.saturating_sub(1);
    }
}

/// Lifecycle status of an [`UploadSession`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Completing,
    Completed,
    Aborted,
    Expired,
}

impl SessionStatus {
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Active, Completing) | (Active, Aborted) | (Active, Expired)
                | (Completing, Completed) | (Completing, Aborted)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Aborted | SessionStatus::Expired)
    }
}

/// How `complete()` should resolve a filename collision (spec.md §4.3).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConflictStrategy {
    Error,
    Rename,
    Skip,
    /// Deferred, per spec.md §4.3 ("overwrite deferred"): accepted as a
    /// valid strategy value but treated as `Error` until implemented.
    Overwrite,
}

/// A multipart upload in progress (or terminated). See spec.md §3.
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub id: String,
    pub file_name: String,
    pub folder_id: String,
    pub total_size: u64,
    pub mime_type: String,
    pub part_size: u64,
    pub total_parts: u32,
    pub completed_parts: BTreeSet<u32>,
    pub uploaded_bytes: u64,
    pub status: SessionStatus,
    pub conflict_strategy: ConflictStrategy,
    pub expires_at: DateTime<Utc>,
    pub file_id: Option<FileId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadSession {
    pub fn is_complete(&self) -> bool {
        self.completed_parts.len() as u32 == self.total_parts
    }

    pub fn missing_parts(&self) -> Vec<u32> {
        (1..=self.total_parts).filter(|p| !self.completed_parts.contains(p)).collect()
    }
}

/// One part of a multipart upload.
#[derive(Debug, Clone)]
pub struct UploadPart {
    pub session_id: String,
    pub part_number: u32,
    pub size: u64,
    pub object_key: String,
    pub etag: String,
    pub completed_at: DateTime<Utc>,
}

/// The NAS mutation a [`SyncEvent`] describes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SyncAction {
    Upload,
    Rename,
    Move,
    Trash,
    Restore,
    Purge,
}

/// Status of a durable [`SyncEvent`] record. See spec.md §3.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Pending,
    Queued,
    Processing,
    Done,
    Failed,
}

impl SyncStatus {
    pub fn can_transition_to(self, next: SyncStatus) -> bool {
        use SyncStatus::*;
        matches!(
            (self, next),
            (Pending, Queued) | (Queued, Processing) | (Processing, Done)
                | (Processing, Pending) | (Processing, Failed)
        )
    }
}

/// Durable record of a pending/in-progress NAS mutation.
#[derive(Debug, Clone)]
pub struct SyncEvent {
    pub id: String,
    pub file_id: FileId,
    pub event_type: SyncAction,
    pub source_path: Option<String>,
    pub target_path: Option<String>,
    pub status: SyncStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error_message: Option<String>,
    pub multipart_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncEvent {
    pub fn new(file_id: FileId, event_type: SyncAction) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            file_id,
            event_type,
            source_path: None,
            target_path: None,
            status: SyncStatus::Pending,
            retry_count: 0,
            max_retries: 3,
            error_message: None,
            multipart_session_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Status of an in-process admission [`QueueTicket`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TicketStatus {
    Waiting,
    Ready,
    Active,
    Cancelled,
    Expired,
}

/// An ephemeral, process-local reservation for a multipart session slot.
#[derive(Debug, Clone)]
pub struct QueueTicket {
    pub ticket_id: String,
    pub user_id: String,
    pub status: TicketStatus,
    pub requested_total_size: u64,
    pub requested_file_name: String,
    pub requested_folder_id: String,
    pub requested_mime_type: String,
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub ticket_expires_at: DateTime<Utc>,
    pub ready_at: Option<DateTime<Utc>>,
    pub claim_deadline: Option<DateTime<Utc>>,
}

/// Snapshot of sync/restore progress, keyed by `syncEventId`. TTL-bounded
/// in the backing [`crate::ports::progress::ProgressStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub status: String,
    pub percent: f32,
    pub completed_chunks: u32,
    pub total_chunks: u32,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_case_preserved_and_missing_when_no_dot() {
        assert_eq!(extension("report.PDF"), "PDF");
        assert_eq!(extension("README"), "");
        assert_eq!(extension(".gitignore"), "");
    }

    #[test]
    fn rename_rejects_extension_change() {
        let mut f = File {
            id: "f1".into(),
            name: "a.txt".into(),
            folder_id: "root".into(),
            size_bytes: 0,
            mime_type: "text/plain".into(),
            state: FileState::Active,
            created_by: "u1".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(f.rename("b.txt").is_ok());
        assert_eq!(f.name, "b.txt");
        let err = f.rename("b.md").unwrap_err();
        assert_eq!(err.code(), "FILE_EXTENSION_CHANGE_NOT_ALLOWED");
    }

    #[test]
    fn lease_release_clamps_at_zero() {
        let mut obj = StorageObject::new("f1".into(), Tier::Nas, "k".into(), AvailabilityStatus::Available);
        obj.release_lease();
        assert_eq!(obj.lease_count, 0);
        obj.acquire_lease();
        obj.acquire_lease();
        obj.release_lease();
        obj.release_lease();
        obj.release_lease();
        assert_eq!(obj.lease_count, 0);
    }

    #[test]
    fn file_state_dag_allows_only_documented_edges() {
        assert!(FileState::Active.can_transition_to(FileState::Trashed));
        assert!(FileState::Trashed.can_transition_to(FileState::Active));
        assert!(FileState::Trashed.can_transition_to(FileState::Deleted));
        assert!(!FileState::Active.can_transition_to(FileState::Deleted));
        assert!(!FileState::Deleted.can_transition_to(FileState::Active));
    }
}
