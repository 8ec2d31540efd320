//! Cache tier port (C1): an object-addressed blob store with random-range
//! reads and streaming writes. See spec.md §6 "Cache port".

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::ports::ByteStream;

/// Object-addressed, size-bounded blob store fronting the NAS tier.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Writes the full object in one call.
    async fn write(&self, key: &str, data: Bytes) -> Result<()>;

    /// Writes an object from a stream, returning the number of bytes
    /// actually written (callers use this to verify transferred length).
    async fn stream_write(&self, key: &str, data: ByteStream) -> Result<u64>;

    /// Reads the full object.
    async fn read(&self, key: &str) -> Result<Bytes>;

    /// Opens the full object as a stream.
    async fn stream_read(&self, key: &str) -> Result<ByteStream>;

    /// Opens an inclusive byte range `[start, end]` of the object as a
    /// stream.
    async fn range_stream_read(&self, key: &str, start: u64, end: u64) -> Result<ByteStream>;

    /// Deletes the object. Missing objects are not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Whether the object is present.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Moves/renames an object within the tier.
    async fn move_object(&self, from_key: &str, to_key: &str) -> Result<()>;

    /// Size of the object in bytes, if present.
    async fn size(&self, key: &str) -> Result<Option<u64>>;

    /// Removes every object whose key starts with `prefix` (used to clean
    /// up a multipart session's part directory).
    async fn rmdir(&self, prefix: &str) -> Result<()>;
}
