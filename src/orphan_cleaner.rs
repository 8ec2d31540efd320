//! Scheduled multipart-session reaper (C10), per spec.md §4.7: sweeps
//! EXPIRED/ABORTED sessions and stuck COMPLETING sessions past the
//! retention window, frees their cache blobs, and nudges admission to
//! promote waiting tickets into the freed slots.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tracing::{info, warn};

use crate::error::Result;
use crate::model::{SessionStatus, UploadSession};
use crate::service::StorageService;

/// Runs [`sweep`] on `service.config.orphan_cleaner_interval_seconds`,
/// refusing to overlap with itself via `running`.
pub struct OrphanCleaner {
    service: StorageService,
    running: AtomicBool,
}

impl OrphanCleaner {
    pub fn new(service: StorageService) -> Arc<Self> {
        Arc::new(Self { service, running: AtomicBool::new(false) })
    }

    /// Spawns the periodic sweep loop. Returns immediately.
    pub fn spawn(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(this.service.config.orphan_cleaner_interval_seconds));
            loop {
                ticker.tick().await;
                if let Err(e) = this.sweep().await {
                    warn!(error = %e, "orphan cleaner sweep failed");
                }
            }
        });
    }

    /// One sweep pass. Safe to call concurrently; a second call while one
    /// is already running is skipped.
    pub async fn sweep(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            info!("orphan cleaner sweep already in progress, skipping");
            return Ok(());
        }
        let result = self.do_sweep().await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn do_sweep(&self) -> Result<()> {
        let cfg = &self.service.config;
        let now = Utc::now();
        let mut reclaimed = 0usize;

        // Step 1: every EXPIRED session is fair game immediately, no age
        // gate -- it already failed its own lifetime check.
        let expired = self
            .service
            .metadata
            .list_sessions_by_status(&[SessionStatus::Expired], None, cfg.multipart_cleanup_batch_size)
            .await?;
        for session in &expired {
            self.reap(session).await?;
            reclaimed += 1;
        }

        // Step 2: ABORTED/EXPIRED sessions idle past retentionHours...
        let cutoff = now - ChronoDuration::hours(cfg.multipart_cleanup_retention_hours);
        let terminal = self
            .service
            .metadata
            .list_sessions_by_status(&[SessionStatus::Aborted, SessionStatus::Expired], Some(cutoff), cfg.multipart_cleanup_batch_size)
            .await?;
        for session in &terminal {
            self.reap(session).await?;
            reclaimed += 1;
        }

        // ...and COMPLETING sessions idle past 2x retentionHours: the NAS
        // sync job that should have finished them likely died mid-concat.
        let stuck_cutoff = now - ChronoDuration::hours(cfg.multipart_cleanup_retention_hours * 2);
        let stuck_completing = self
            .service
            .metadata
            .list_sessions_by_status(&[SessionStatus::Completing], Some(stuck_cutoff), cfg.multipart_cleanup_batch_size)
            .await?;
        for session in &stuck_completing {
            warn!(session_id = %session.id, "multipart session stuck in COMPLETING past twice the retention window, reclaiming");
            self.reap(session).await?;
            reclaimed += 1;
        }

        // Active sessions past their own expiry flip to EXPIRED so the
        // next sweep's step-1 pass picks them up.
        let active_expired = self
            .service
            .metadata
            .list_sessions_by_status(&[SessionStatus::Active], None, cfg.multipart_cleanup_batch_size)
            .await?;
        for mut session in active_expired.into_iter().filter(|s| s.expires_at < now) {
            session.status = SessionStatus::Expired;
            session.updated_at = now;
            self.service.metadata.update_session(session).await?;
        }

        if reclaimed > 0 {
            info!(reclaimed, "orphan cleaner reclaimed multipart sessions");
            self.service.admission.promote_while_capacity().await;
        }
        Ok(())
    }

    /// Deletes a reclaimed session's cache blobs, part rows, and the
    /// session row itself.
    async fn reap(&self, session: &UploadSession) -> Result<()> {
        self.service.cache.rmdir(&format!("multipart/{}/", session.id)).await?;
        self.service.metadata.delete_parts(&session.id).await?;
        self.service.metadata.delete_session(&session.id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::local_nas::LocalNas;
    use crate::adapters::mem_cache::InMemoryCache;
    use crate::adapters::mem_lock::InMemoryLock;
    use crate::adapters::mem_metadata::InMemoryMetadata;
    use crate::adapters::mem_queue::InMemoryQueue;
    use crate::adapters::moka_progress::MokaProgress;
    use crate::config::Config;
    use crate::model::{ConflictStrategy, UploadSession};
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn harness() -> StorageService {
        StorageService::new(
            Arc::new(InMemoryCache::new()),
            Arc::new(LocalNas::new(std::env::temp_dir())),
            Arc::new(InMemoryQueue::new()),
            Arc::new(InMemoryLock::new()),
            Arc::new(MokaProgress::new(1000)),
            Arc::new(InMemoryMetadata::new()),
            Config::default(),
        )
        .unwrap()
    }

    fn session_with(id: &str, status: SessionStatus, age_hours: i64) -> UploadSession {
        let updated_at = Utc::now() - ChronoDuration::hours(age_hours);
        UploadSession {
            id: id.into(),
            file_name: "x.bin".into(),
            folder_id: "root".into(),
            total_size: 100,
            mime_type: "application/octet-stream".into(),
            part_size: 10,
            total_parts: 10,
            completed_parts: BTreeSet::new(),
            uploaded_bytes: 0,
            status,
            conflict_strategy: ConflictStrategy::Error,
            expires_at: updated_at,
            file_id: None,
            created_at: updated_at,
            updated_at,
        }
    }

    fn aborted_session(id: &str, age_hours: i64) -> UploadSession {
        session_with(id, SessionStatus::Aborted, age_hours)
    }

    #[tokio::test]
    async fn sweep_reclaims_old_aborted_sessions() {
        let service = harness();
        service.metadata.insert_session(aborted_session("s1", 48)).await.unwrap();
        service.cache.write("multipart/s1/part_00001", bytes::Bytes::from_static(b"x")).await.unwrap();

        let cleaner = OrphanCleaner::new(service.clone());
        cleaner.sweep().await.unwrap();

        assert!(!service.cache.exists("multipart/s1/part_00001").await.unwrap());
        assert!(service.metadata.get_session("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sweep_leaves_recent_aborted_sessions_alone() {
        let service = harness();
        service.metadata.insert_session(aborted_session("s2", 1)).await.unwrap();
        service.cache.write("multipart/s2/part_00001", bytes::Bytes::from_static(b"x")).await.unwrap();

        let cleaner = OrphanCleaner::new(service.clone());
        cleaner.sweep().await.unwrap();

        assert!(service.cache.exists("multipart/s2/part_00001").await.unwrap());
        assert!(service.metadata.get_session("s2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn sweep_reclaims_expired_sessions_regardless_of_age() {
        let service = harness();
        service.metadata.insert_session(session_with("s3", SessionStatus::Expired, 0)).await.unwrap();
        service.cache.write("multipart/s3/part_00001", bytes::Bytes::from_static(b"x")).await.unwrap();

        let cleaner = OrphanCleaner::new(service.clone());
        cleaner.sweep().await.unwrap();

        assert!(!service.cache.exists("multipart/s3/part_00001").await.unwrap());
        assert!(service.metadata.get_session("s3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sweep_leaves_completing_sessions_alone_before_double_retention() {
        let service = harness();
        let retention = Config::default().multipart_cleanup_retention_hours;
        service.metadata.insert_session(session_with("s4", SessionStatus::Completing, retention + 1)).await.unwrap();

        let cleaner = OrphanCleaner::new(service.clone());
        cleaner.sweep().await.unwrap();

        assert!(service.metadata.get_session("s4").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn sweep_reclaims_completing_sessions_stuck_past_double_retention() {
        let service = harness();
        let retention = Config::default().multipart_cleanup_retention_hours;
        service.metadata.insert_session(session_with("s5", SessionStatus::Completing, retention * 2 + 1)).await.unwrap();
        service.cache.write("multipart/s5/part_00001", bytes::Bytes::from_static(b"x")).await.unwrap();

        let cleaner = OrphanCleaner::new(service.clone());
        cleaner.sweep().await.unwrap();

        assert!(!service.cache.exists("multipart/s5/part_00001").await.unwrap());
        assert!(service.metadata.get_session("s5").await.unwrap().is_none());
    }
}
