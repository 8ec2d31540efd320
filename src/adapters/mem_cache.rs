//! In-memory reference [`CacheStore`] adapter, used in tests and by the
//! `demos/gateway` example when no real cache backend is configured.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;

use crate::error::{Result, StorageError};
use crate::ports::cache_store::CacheStore;
use crate::ports::ByteStream;

#[derive(Default)]
pub struct InMemoryCache {
    objects: Mutex<HashMap<String, Bytes>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn write(&self, key: &str, data: Bytes) -> Result<()> {
        self.objects.lock().unwrap().insert(key.to_string(), data);
        Ok(())
    }

    async fn stream_write(&self, key: &str, mut data: ByteStream) -> Result<u64> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = data.next().await {
            buf.extend_from_slice(&chunk?);
        }
        let len = buf.len() as u64;
        self.objects.lock().unwrap().insert(key.to_string(), buf.freeze());
        Ok(len)
    }

    async fn read(&self, key: &str) -> Result<Bytes> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::CacheReadFailed(format!("no such object: {key}")))
    }

    async fn stream_read(&self, key: &str) -> Result<ByteStream> {
        let data = self.read(key).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(data) })))
    }

    async fn range_stream_read(&self, key: &str, start: u64, end: u64) -> Result<ByteStream> {
        let data = self.read(key).await?;
        let start = start as usize;
        let end = (end as usize).min(data.len().saturating_sub(1));
        if start > end || start >= data.len() {
            return Err(StorageError::InvalidRange(format!("{start}-{end} out of bounds for {}", data.len())));
        }
        let slice = data.slice(start..=end);
        Ok(Box::pin(futures::stream::once(async move { Ok(slice) })))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.lock().unwrap().contains_key(key))
    }

    async fn move_object(&self, from_key: &str, to_key: &str) -> Result<()> {
        let mut objects = self.objects.lock().unwrap();
        let data = objects.remove(from_key).ok_or_else(|| {
            StorageError::CacheReadFailed(format!("no such object: {from_key}"))
        })?;
        objects.insert(to_key.to_string(), data);
        Ok(())
    }

    async fn size(&self, key: &str) -> Result<Option<u64>> {
        Ok(self.objects.lock().unwrap().get(key).map(|b| b.len() as u64))
    }

    async fn rmdir(&self, prefix: &str) -> Result<()> {
        self.objects.lock().unwrap().retain(|k, _| !k.starts_with(prefix));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_roundtrips() {
        let cache = InMemoryCache::new();
        cache.write("f1", Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(cache.read("f1").await.unwrap(), Bytes::from_static(b"hello"));
        assert!(cache.exists("f1").await.unwrap());
    }

    #[tokio::test]
    async fn range_read_respects_bounds() {
        let cache = InMemoryCache::new();
        cache.write("f1", Bytes::from_static(b"abcdef")).await.unwrap();
        let mut stream = cache.range_stream_read("f1", 1, 3).await.unwrap();
        let chunk = stream.next().await.unwrap().unwrap();
        assert_eq!(&chunk[..], b"bcd");
    }

    #[tokio::test]
    async fn rmdir_removes_matching_prefix_only() {
        let cache = InMemoryCache::new();
        cache.write("multipart/s1/part_00001", Bytes::new()).await.unwrap();
        cache.write("multipart/s1/part_00002", Bytes::new()).await.unwrap();
        cache.write("other", Bytes::new()).await.unwrap();
        cache.rmdir("multipart/s1/").await.unwrap();
        assert!(!cache.exists("multipart/s1/part_00001").await.unwrap());
        assert!(cache.exists("other").await.unwrap());
    }
}
