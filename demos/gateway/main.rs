//! Reference wiring for the tierstore core: constructs the in-memory/
//! local-disk adapters, builds a [`StorageService`], and starts the two
//! background job consumers plus the admission-maintenance and
//! orphan-cleaner tickers. No HTTP/RPC surface is included -- per
//! spec.md's Non-goals, routing and DTO shaping belong to a caller.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tierstore::adapters::local_nas::LocalNas;
use tierstore::adapters::mem_cache::InMemoryCache;
use tierstore::adapters::mem_lock::InMemoryLock;
use tierstore::adapters::mem_metadata::InMemoryMetadata;
use tierstore::adapters::mem_queue::InMemoryQueue;
use tierstore::adapters::moka_progress::MokaProgress;
use tierstore::cache_restore::CacheRestoreWorker;
use tierstore::config::Config;
use tierstore::orphan_cleaner::OrphanCleaner;
use tierstore::ports::job_queue::{JobQueue, QueueName};
use tierstore::sync::NasSyncWorker;
use tierstore::StorageService;

#[derive(Parser, Debug)]
#[command(name = "tierstore-gateway", about = "Runs the tierstore background workers against the reference adapters")]
struct Args {
    /// Path to a TOML config file. Falls back to `Config::default()`.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = match args.config {
        Some(path) => Config::from_toml_file(&path)?,
        None => Config::default(),
    };

    let cache = Arc::new(InMemoryCache::new());
    let nas = Arc::new(LocalNas::new(PathBuf::from(&config.nas_mount_path)));
    let queue = Arc::new(InMemoryQueue::new());
    let lock = Arc::new(InMemoryLock::new());
    let progress = Arc::new(MokaProgress::new(10_000));
    let metadata = Arc::new(InMemoryMetadata::new());

    let nas_concurrency = config.nas_file_sync_concurrency;
    let cache_concurrency = config.cache_restore_concurrency;

    let service = StorageService::new(cache, nas, queue.clone(), lock, progress, metadata, config)?;

    queue
        .process_jobs(QueueName::NasFileSync, Arc::new(NasSyncWorker::new(service.clone())), nas_concurrency)
        .await?;
    queue
        .process_jobs(QueueName::CacheRestore, Arc::new(CacheRestoreWorker::new(service.clone())), cache_concurrency)
        .await?;

    OrphanCleaner::new(service.clone()).spawn();
    spawn_admission_maintenance(service.clone());

    tracing::info!("tierstore gateway running");
    std::future::pending::<()>().await;
    Ok(())
}

fn spawn_admission_maintenance(service: StorageService) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(service.config.admission_maintenance_interval_seconds));
        loop {
            ticker.tick().await;
            service.admission.run_maintenance().await;
        }
    });
}
