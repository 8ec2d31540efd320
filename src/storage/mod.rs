//! Storage consistency layer (C7): availability state machine,
//! reconciliation-on-read, and lease bookkeeping. See spec.md §4.1.

pub mod lease;
pub mod state_machine;

pub use state_machine::{reconcile_cache, CacheUsability};
