//! External collaborator interfaces ("ports", per spec.md §9's guidance to
//! replace dynamic dependency containers with explicit constructor wiring).
//!
//! Everything under `ports` is a trait; concrete backends are injected by
//! the binary that wires up a [`crate::service::StorageService`]. Reference
//! implementations for local development and tests live in
//! [`crate::adapters`].

pub mod cache_store;
pub mod job_queue;
pub mod lock;
pub mod metadata;
pub mod nas_store;
pub mod progress;

use bytes::Bytes;
use futures::stream::BoxStream;

/// A boxed, owned byte stream. Every streaming port method returns this so
/// producers and consumers compose regardless of backend.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;
