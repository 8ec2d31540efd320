//! Wraps an opened object stream, verifying the transferred length against
//! the expected size on EOF and logging mismatches (spec.md §4.2 step 9).

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tracing::warn;

use crate::ports::ByteStream;

pub struct ByteCounterStream {
    inner: ByteStream,
    file_id: String,
    expected: u64,
    counted: u64,
    logged: bool,
}

impl ByteCounterStream {
    pub fn new(inner: ByteStream, file_id: impl Into<String>, expected: u64) -> Self {
        Self { inner, file_id: file_id.into(), expected, counted: 0, logged: false }
    }

    pub fn into_stream(self) -> ByteStream {
        Box::pin(self)
    }
}

impl Stream for ByteCounterStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.counted += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e))),
            Poll::Ready(None) => {
                if !this.logged && this.counted != this.expected {
                    warn!(
                        file_id = %this.file_id,
                        expected = this.expected,
                        transferred = this.counted,
                        "stream EOF with byte count mismatch"
                    );
                }
                this.logged = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
