//! Top-level wiring: [`StorageService`] owns the six port handles plus
//! config and is the single constructor-injected object every component
//! in this crate is built from, per spec.md §9's "replace dynamic
//! dependency containers with explicit constructor wiring".

use std::sync::Arc;

use crate::config::Config;
use crate::ports::cache_store::CacheStore;
use crate::ports::job_queue::JobQueue;
use crate::ports::lock::DistributedLock;
use crate::ports::metadata::MetadataStore;
use crate::ports::nas_store::NasStore;
use crate::ports::progress::ProgressStore;
use crate::upload::admission::Admission;

/// Bundles the adapters and config every component needs. Cheap to
/// clone (all fields are `Arc`s or `Copy`-ish config), so handlers and
/// background workers each hold their own owned copy.
#[derive(Clone)]
pub struct StorageService {
    pub cache: Arc<dyn CacheStore>,
    pub nas: Arc<dyn NasStore>,
    pub queue: Arc<dyn JobQueue>,
    pub lock: Arc<dyn DistributedLock>,
    pub progress: Arc<dyn ProgressStore>,
    pub metadata: Arc<dyn MetadataStore>,
    pub admission: Arc<Admission>,
    pub config: Arc<Config>,
}

impl StorageService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cache: Arc<dyn CacheStore>,
        nas: Arc<dyn NasStore>,
        queue: Arc<dyn JobQueue>,
        lock: Arc<dyn DistributedLock>,
        progress: Arc<dyn ProgressStore>,
        metadata: Arc<dyn MetadataStore>,
        config: Config,
    ) -> Result<Self, String> {
        config.validate()?;
        let config = Arc::new(config);
        let admission = Arc::new(Admission::new(config.clone()));
        Ok(Self { cache, nas, queue, lock, progress, metadata, admission, config })
    }
}
