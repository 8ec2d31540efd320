//! Download router (C8) and its parts-branch fallback. See spec.md §4.2.

pub mod byte_counter;
pub mod parts_branch;
pub mod router;

pub use router::{download, DownloadOutcome, DownloadRequest, DownloadResponse, ReleaseToken};
