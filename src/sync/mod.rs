//! NAS sync pipeline (C9): the background half of every lifecycle
//! mutation, consuming `SyncEvent`s off the `NAS_FILE_SYNC` queue and
//! driving the NAS tier to match metadata. See spec.md §4.5.

pub mod actions;
pub mod worker;

pub use worker::{NasSyncWorker, SyncFailureAlert};
