//! Parts-branch download: serves bytes by concatenating completed
//! multipart upload parts while NAS is still mid-write. See spec.md §4.2
//! "Parts branch".

use std::sync::Arc;

use futures::StreamExt;

use crate::error::{Result, StorageError};
use crate::model::UploadPart;
use crate::ports::cache_store::CacheStore;
use crate::ports::ByteStream;
use crate::range::{part_object_key, ByteRange};

struct PartSpec {
    object_key: String,
    range: Option<(u64, u64)>,
}

fn open_part_stream(cache: Arc<dyn CacheStore>, spec: PartSpec) -> futures::future::BoxFuture<'static, ByteStream> {
    Box::pin(async move {
        let opened = match spec.range {
            Some((start, end)) => cache.range_stream_read(&spec.object_key, start, end).await,
            None => cache.stream_read(&spec.object_key).await,
        };
        match opened {
            Ok(stream) => stream,
            Err(e) => {
                let io_err = std::io::Error::new(std::io::ErrorKind::Other, e.to_string());
                Box::pin(futures::stream::once(async move { Err(io_err) }))
            }
        }
    })
}

/// Concatenates every completed part, in `partNumber` order, into a single
/// stream.
pub fn stream_full(cache: Arc<dyn CacheStore>, session_id: &str, parts: &[UploadPart]) -> ByteStream {
    let specs: Vec<PartSpec> = parts
        .iter()
        .map(|p| PartSpec { object_key: part_object_key(session_id, p.part_number), range: None })
        .collect();
    Box::pin(futures::stream::iter(specs).then(move |spec| open_part_stream(cache.clone(), spec)).flatten())
}

/// Covering-parts range fetch: `startPart = floor(start/partSize)`,
/// `endPart = floor(end/partSize)`; per-part offsets are clamped to the
/// part's actual size.
pub fn stream_range(
    cache: Arc<dyn CacheStore>,
    session_id: &str,
    parts: &[UploadPart],
    part_size: u64,
    range: ByteRange,
) -> Result<ByteStream> {
    let start_part = (range.start / part_size) as u32 + 1;
    let end_part = (range.end / part_size) as u32 + 1;

    let mut specs = Vec::new();
    for part_number in start_part..=end_part {
        let part = parts
            .iter()
            .find(|p| p.part_number == part_number)
            .ok_or_else(|| StorageError::PartMismatch(format!("missing part {part_number}")))?;

        let part_offset = (part_number as u64 - 1) * part_size;
        let local_start = range.start.saturating_sub(part_offset);
        let local_end = (range.end.saturating_sub(part_offset)).min(part.size.saturating_sub(1));

        specs.push(PartSpec {
            object_key: part_object_key(session_id, part_number),
            range: Some((local_start, local_end)),
        });
    }

    Ok(Box::pin(futures::stream::iter(specs).then(move |spec| open_part_stream(cache.clone(), spec)).flatten()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use crate::adapters::mem_cache::InMemoryCache;
    use chrono::Utc;

    fn part(session_id: &str, number: u32, data: &'static [u8], cache: &InMemoryCache) -> UploadPart {
        let key = part_object_key(session_id, number);
        futures::executor::block_on(cache.write(&key, Bytes::from_static(data))).unwrap();
        UploadPart {
            session_id: session_id.to_string(),
            part_number: number,
            size: data.len() as u64,
            object_key: key,
            etag: "x".into(),
            completed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn full_stream_concatenates_in_order() {
        let cache = Arc::new(InMemoryCache::new());
        let p1 = part("s1", 1, b"hello", &cache);
        let p2 = part("s1", 2, b"world", &cache);
        let mut stream = stream_full(cache.clone(), "s1", &[p1, p2]);
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(out, b"helloworld");
    }

    #[tokio::test]
    async fn range_stream_covers_only_intersecting_parts() {
        let cache = Arc::new(InMemoryCache::new());
        let p1 = part("s1", 1, b"0123456789", &cache); // bytes 0..=9
        let p2 = part("s1", 2, b"abcdefghij", &cache); // bytes 10..=19
        let range = ByteRange { start: 8, end: 12 };
        let mut stream = stream_range(cache.clone(), "s1", &[p1, p2], 10, range).unwrap();
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(out, b"89abc");
    }
}
