//! NAS tier port (C2): a path-addressed filesystem with pre-allocation,
//! positional writes, and atomic rename. See spec.md §6 "NAS port".

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::ports::ByteStream;

/// Path-addressed, durable filesystem: the source of truth for persisted
/// bytes.
#[async_trait]
pub trait NasStore: Send + Sync {
    async fn write(&self, key: &str, data: Bytes) -> Result<()>;
    async fn stream_write(&self, key: &str, data: ByteStream) -> Result<u64>;
    async fn read(&self, key: &str) -> Result<Bytes>;
    async fn stream_read(&self, key: &str) -> Result<ByteStream>;
    async fn range_stream_read(&self, key: &str, start: u64, end: u64) -> Result<ByteStream>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn size(&self, key: &str) -> Result<Option<u64>>;

    /// Atomically renames/moves `from_key` to `to_key`. Implementations
    /// must surface `ENOENT`/`EEXIST` distinguishably so callers can treat
    /// them as "already applied" per spec.md §7/§9.
    async fn rename(&self, from_key: &str, to_key: &str) -> Result<()>;

    /// Reserves `size` bytes for `key` ahead of a parallel chunked write.
    async fn preallocate(&self, key: &str, size: u64) -> Result<()>;

    /// Writes `data` at byte `offset` of the (already preallocated)
    /// object at `key`. Order-independent: callers issue these
    /// concurrently across chunks.
    async fn chunk_write(&self, key: &str, data: Bytes, offset: u64) -> Result<()>;

    async fn folder_create(&self, path: &str) -> Result<()>;
    async fn folder_delete(&self, path: &str) -> Result<()>;
    async fn folder_move(&self, from_path: &str, to_path: &str) -> Result<()>;
}

/// Whether a NAS I/O error observed during a rename represents "the
/// mutation was already applied" (spec.md §7/§9 idempotent-replay rule).
pub fn is_already_applied(err: &crate::error::StorageError) -> bool {
    matches!(err, crate::error::StorageError::Io(msg) if msg.contains("ENOENT") || msg.contains("EEXIST"))
}
