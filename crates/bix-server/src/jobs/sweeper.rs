//! Background cleanup
//!
//! One periodic task prunes terminal and stale jobs from the registry,
//! expired idempotency keys, and aged upload/export files by mtime.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;

use super::{IdempotencyLedger, JobRegistry};

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Tick between sweeps
    pub interval: Duration,
    /// Jobs older than this are dropped, irrespective of status
    pub job_max_age: Duration,
    /// Idempotency keys older than this are dropped
    pub idempotency_max_age: Duration,
    pub uploads_dir: PathBuf,
    pub uploads_max_age: Duration,
    pub exports_dir: PathBuf,
    pub exports_max_age: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            job_max_age: Duration::from_secs(24 * 3600),
            idempotency_max_age: Duration::from_secs(3600),
            uploads_dir: PathBuf::from("./uploads"),
            uploads_max_age: Duration::from_secs(24 * 3600),
            exports_dir: PathBuf::from("./exports"),
            exports_max_age: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

/// Spawn the sweeper loop. The handle can be aborted at shutdown; a sweep
/// in progress finishes its current step.
pub fn spawn_sweeper(
    registry: Arc<JobRegistry>,
    ledger: Arc<IdempotencyLedger>,
    config: SweeperConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);
        // The first tick fires immediately; skip it so a fresh boot does
        // not race directory creation.
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let jobs_removed = registry.cleanup_old(config.job_max_age);
            let keys_removed = ledger.cleanup(config.idempotency_max_age);

            let uploads_removed =
                cleanup_old_files(&config.uploads_dir, config.uploads_max_age).await;
            let exports_removed =
                cleanup_old_files(&config.exports_dir, config.exports_max_age).await;

            tracing::info!(
                jobs_removed,
                keys_removed,
                uploads_removed,
                exports_removed,
                "cleanup completed"
            );
        }
    })
}

/// Remove regular files in `dir` whose mtime is older than `max_age`.
/// Returns the number of files removed; directory errors only log.
pub async fn cleanup_old_files(dir: &Path, max_age: Duration) -> usize {
    let cutoff = SystemTime::now()
        .checked_sub(max_age)
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(dir = %dir.display(), error = %err, "failed to read directory");
            return 0;
        }
    };

    let mut removed = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        if modified < cutoff && tokio::fs::remove_file(entry.path()).await.is_ok() {
            removed += 1;
        }
    }

    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cleanup_old_files_removes_only_stale_files() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("stale.csv");
        let fresh = dir.path().join("fresh.csv");
        tokio::fs::write(&stale, b"old").await.unwrap();
        tokio::fs::write(&fresh, b"new").await.unwrap();

        // With a zero max-age both qualify; with a long one neither does.
        assert_eq!(cleanup_old_files(dir.path(), Duration::from_secs(3600)).await, 0);
        assert!(fresh.exists() && stale.exists());

        assert_eq!(cleanup_old_files(dir.path(), Duration::from_secs(0)).await, 2);
        assert!(!fresh.exists() && !stale.exists());
    }

    #[tokio::test]
    async fn test_cleanup_missing_directory_is_harmless() {
        let removed =
            cleanup_old_files(Path::new("/nonexistent/bix-sweeper-test"), Duration::from_secs(0))
                .await;
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn test_sweeper_task_spawns_and_aborts() {
        let registry = Arc::new(JobRegistry::new());
        let ledger = Arc::new(IdempotencyLedger::new());
        let handle = spawn_sweeper(registry, ledger, SweeperConfig::default());
        handle.abort();
    }
}
