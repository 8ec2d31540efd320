//! Category-tagged error type shared by every component in this crate.
//!
//! Mirrors the way the teacher crate models protocol errors
//! (`vfs::Error`, `mount::Error`): a flat enum of wire-facing conditions,
//! no `thiserror`/`anyhow`, with a hand-written [`std::fmt::Display`] impl.

use std::fmt;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Broad disposition of an error, used by callers to decide whether to
/// retry, surface a 4xx, or page someone.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed or disallowed input; no side effects occurred.
    Validation,
    /// The referenced entity does not exist.
    NotFound,
    /// The entity exists but is in a state that conflicts with the request.
    /// Safe to retry after the conflicting condition clears.
    Conflict,
    /// A storage tier is unavailable or inconsistent; 5xx-worthy.
    StorageUnavailable,
    /// A transient condition internal to a worker (lock contention, a
    /// queue redelivery candidate). Never surfaced to end users directly.
    Transient,
}

/// All error conditions raised by the storage core.
///
/// Each variant corresponds 1:1 with a wire code from spec.md §6/§7.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    // -- validation --
    InvalidFileName(String),
    FileExtensionChangeNotAllowed,
    FileTooLarge { size: u64, max: u64 },
    FileTooSmallForMultipart { size: u64, min: u64 },
    InvalidPartNumber { part_number: u32, total_parts: u32 },
    InvalidRange(String),

    // -- not found --
    FileNotFound(String),
    FolderNotFound(String),
    TargetFolderNotFound(String),
    RootFolderNotFound,
    SessionNotFound(String),
    FileNotFoundInStorage(String),

    // -- conflict --
    FileInTrash(String),
    FileDeleted(String),
    FileSyncing(String),
    FileAlreadyTrashed(String),
    FileNotTrashed(String),
    FileInUse(String),
    FolderSyncInProgress(String),
    DuplicateFileExists(String),
    SessionExpired(String),
    SessionAlreadyCompleted(String),
    SessionAborted(String),
    IncompleteParts { missing: Vec<u32> },
    PartMismatch(String),
    QueueFull,

    // -- storage unavailable --
    FileStorageUnavailable(String),
    CacheReadFailed(String),
    NasReadFailed(String),
    FolderSyncFailed(String),

    // -- transient (worker-internal) --
    LockContended(String),
    Retryable(String),

    /// Escape hatch for adapter-level I/O failures that don't map to a
    /// more specific condition above.
    Io(String),
}

impl StorageError {
    /// The wire code used by the (external) HTTP layer, per spec.md §6/§7.
    pub fn code(&self) -> &'static str {
        use StorageError::*;
        match self {
            InvalidFileName(_) => "INVALID_FILE_NAME",
            FileExtensionChangeNotAllowed => "FILE_EXTENSION_CHANGE_NOT_ALLOWED",
            FileTooLarge { .. } => "FILE_TOO_LARGE",
            FileTooSmallForMultipart { .. } => "FILE_TOO_SMALL_FOR_MULTIPART",
            InvalidPartNumber { .. } => "INVALID_PART_NUMBER",
            InvalidRange(_) => "INVALID_RANGE",
            FileNotFound(_) => "FILE_NOT_FOUND",
            FolderNotFound(_) => "FOLDER_NOT_FOUND",
            TargetFolderNotFound(_) => "TARGET_FOLDER_NOT_FOUND",
            RootFolderNotFound => "ROOT_FOLDER_NOT_FOUND",
            SessionNotFound(_) => "SESSION_NOT_FOUND",
            FileNotFoundInStorage(_) => "FILE_NOT_FOUND_IN_STORAGE",
            FileInTrash(_) => "FILE_IN_TRASH",
            FileDeleted(_) => "FILE_DELETED",
            FileSyncing(_) => "FILE_SYNCING",
            FileAlreadyTrashed(_) => "FILE_ALREADY_TRASHED",
            FileNotTrashed(_) => "FILE_NOT_TRASHED",
            FileInUse(_) => "FILE_IN_USE",
            FolderSyncInProgress(_) => "FOLDER_SYNC_IN_PROGRESS",
            DuplicateFileExists(_) => "DUPLICATE_FILE_EXISTS",
            SessionExpired(_) => "SESSION_EXPIRED",
            SessionAlreadyCompleted(_) => "SESSION_ALREADY_COMPLETED",
            SessionAborted(_) => "SESSION_ABORTED",
            IncompleteParts { .. } => "INCOMPLETE_PARTS",
            PartMismatch(_) => "PART_MISMATCH",
            QueueFull => "QUEUE_FULL",
            FileStorageUnavailable(_) => "FILE_STORAGE_UNAVAILABLE",
            CacheReadFailed(_) => "CACHE_READ_FAILED",
            NasReadFailed(_) => "NAS_READ_FAILED",
            FolderSyncFailed(_) => "FOLDER_SYNC_FAILED",
            LockContended(_) => "LOCK_CONTENDED",
            Retryable(_) => "RETRYABLE",
            Io(_) => "IO_ERROR",
        }
    }

    /// The category used to decide retry/alerting disposition.
    pub fn category(&self) -> ErrorCategory {
        use ErrorCategory::*;
        use StorageError::*;
        match self {
            InvalidFileName(_)
            | FileExtensionChangeNotAllowed
            | FileTooLarge { .. }
            | FileTooSmallForMultipart { .. }
            | InvalidPartNumber { .. }
            | InvalidRange(_) => Validation,

            FileNotFound(_)
            | FolderNotFound(_)
            | TargetFolderNotFound(_)
            | RootFolderNotFound
            | SessionNotFound(_)
            | FileNotFoundInStorage(_) => NotFound,

            FileInTrash(_)
            | FileDeleted(_)
            | FileSyncing(_)
            | FileAlreadyTrashed(_)
            | FileNotTrashed(_)
            | FileInUse(_)
            | FolderSyncInProgress(_)
            | DuplicateFileExists(_)
            | SessionExpired(_)
            | SessionAlreadyCompleted(_)
            | SessionAborted(_)
            | IncompleteParts { .. }
            | PartMismatch(_)
            | QueueFull => Conflict,

            FileStorageUnavailable(_) | CacheReadFailed(_) | NasReadFailed(_)
            | FolderSyncFailed(_) => StorageUnavailable,

            LockContended(_) | Retryable(_) | Io(_) => Transient,
        }
    }

    /// Whether a caller should be told "try again later" rather than
    /// treating this as fatal.
    pub fn is_retryable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Conflict | ErrorCategory::Transient)
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:?}", self.code(), self)
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e.to_string())
    }
}
