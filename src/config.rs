//! Enumerated configuration, per spec.md §6. Loadable from TOML via
//! `serde` + `toml`, matching the teacher's config story (`clap` +
//! `serde` + `toml` are already teacher dependencies).

use serde::{Deserialize, Serialize};

const GIB: u64 = 1024 * 1024 * 1024;
const MIB: u64 = 1024 * 1024;

/// All tunables from spec.md §6, with the documented defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // -- admission & virtual queue --
    pub max_active_sessions: u32,
    pub max_sessions_per_user: u32,
    pub max_total_upload_bytes: u64,
    pub max_file_size_bytes: u64,
    pub max_queue_size: u32,
    pub queue_ticket_ttl_ms: u64,
    pub queue_ready_claim_ms: u64,
    pub estimated_session_duration_seconds: u64,

    // -- multipart --
    pub multipart_min_file_size: u64,
    pub default_part_size: u64,

    // -- NAS parallel upload --
    pub nas_parallel_upload_threshold_bytes: u64,
    pub nas_parallel_upload_chunk_size: u64,
    pub nas_parallel_upload_chunks: u32,
    pub progress_log_interval_percent: u8,

    // -- worker concurrency --
    pub nas_file_sync_concurrency: usize,
    pub cache_restore_concurrency: usize,

    // -- orphan cleanup --
    pub multipart_cleanup_retention_hours: i64,
    pub multipart_cleanup_batch_size: usize,

    // -- locks --
    pub sync_lock_ttl_seconds: u64,
    pub sync_lock_wait_timeout_seconds: u64,
    pub sync_lock_renew_interval_seconds: u64,
    pub cache_restore_lock_ttl_seconds: u64,

    // -- progress store --
    pub progress_ttl_seconds: u64,

    // -- admission maintenance tick --
    pub admission_maintenance_interval_seconds: u64,

    // -- orphan cleaner schedule --
    pub orphan_cleaner_interval_seconds: u64,

    // -- backends (consumed by adapters, opaque to the core) --
    pub cache_local_path: String,
    pub nas_mount_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_active_sessions: 10,
            max_sessions_per_user: 3,
            max_total_upload_bytes: 50 * GIB,
            max_file_size_bytes: 20 * GIB,
            max_queue_size: 50,
            queue_ticket_ttl_ms: 30 * 60 * 1000,
            queue_ready_claim_ms: 5 * 60 * 1000,
            estimated_session_duration_seconds: 300,

            multipart_min_file_size: 100 * MIB,
            default_part_size: 10 * MIB,

            nas_parallel_upload_threshold_bytes: 100 * MIB,
            nas_parallel_upload_chunk_size: 50 * MIB,
            nas_parallel_upload_chunks: 4,
            progress_log_interval_percent: 5,

            nas_file_sync_concurrency: 5,
            cache_restore_concurrency: 3,

            multipart_cleanup_retention_hours: 24,
            multipart_cleanup_batch_size: 50,

            sync_lock_ttl_seconds: 60,
            sync_lock_wait_timeout_seconds: 30,
            sync_lock_renew_interval_seconds: 25,
            cache_restore_lock_ttl_seconds: 120,

            progress_ttl_seconds: 3600,

            admission_maintenance_interval_seconds: 30,
            orphan_cleaner_interval_seconds: 30 * 60,

            cache_local_path: "./data/cache".to_string(),
            nas_mount_path: "./data/nas".to_string(),
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file, falling back to documented
    /// defaults for any field the file omits.
    pub fn from_toml_file(path: &std::path::Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Cross-field sanity checks that can't be expressed as per-field
    /// defaults. Called once at `StorageService` construction time.
    pub fn validate(&self) -> Result<(), String> {
        if self.multipart_min_file_size > self.max_file_size_bytes {
            return Err("multipart_min_file_size must not exceed max_file_size_bytes".into());
        }
        if self.default_part_size == 0 {
            return Err("default_part_size must be > 0".into());
        }
        if self.nas_parallel_upload_chunks == 0 {
            return Err("nas_parallel_upload_chunks must be > 0".into());
        }
        if self.nas_file_sync_concurrency == 0 || self.cache_restore_concurrency == 0 {
            return Err("worker concurrency must be > 0".into());
        }
        Ok(())
    }

    /// `totalParts = ceil(totalSize / partSize)`, per spec.md §3.
    pub fn total_parts(&self, total_size: u64) -> u32 {
        total_parts_for(total_size, self.default_part_size)
    }
}

/// `ceil(total_size / part_size)`, clamped to at least 1 for a zero-size
/// file (a single empty part).
pub fn total_parts_for(total_size: u64, part_size: u64) -> u32 {
    if total_size == 0 {
        return 1;
    }
    (total_size.div_ceil(part_size)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let c = Config::default();
        assert_eq!(c.max_active_sessions, 10);
        assert_eq!(c.max_file_size_bytes, 20 * GIB);
        assert_eq!(c.multipart_min_file_size, 100 * MIB);
        assert_eq!(c.default_part_size, 10 * MIB);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn total_parts_rounds_up() {
        assert_eq!(total_parts_for(150 * MIB, 10 * MIB), 15);
        assert_eq!(total_parts_for(101 * MIB, 10 * MIB), 11);
        assert_eq!(total_parts_for(0, 10 * MIB), 1);
    }

    #[test]
    fn validate_rejects_inconsistent_thresholds() {
        let mut c = Config::default();
        c.multipart_min_file_size = c.max_file_size_bytes + 1;
        assert!(c.validate().is_err());
    }
}
