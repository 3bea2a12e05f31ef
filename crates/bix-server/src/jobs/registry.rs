//! In-process job registry
//!
//! Maps job ids to job records. All mutations pass through the registry,
//! which serialises writes under one lock per index and returns snapshot
//! copies on reads. Counters and progress never decrease; terminal states
//! freeze the record and stamp `completed_at` exactly once.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::models::{
    ErrorLog, ExportFormat, ExportJob, ImportJob, JobStatus, ResourceKind, ValidationError,
};
use crate::store::Filters;

/// Per-status counts for imports and exports plus totals
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub import_jobs: HashMap<String, usize>,
    pub export_jobs: HashMap<String, usize>,
    pub total_import_jobs: usize,
    pub total_export_jobs: usize,
}

#[derive(Default)]
pub struct JobRegistry {
    imports: RwLock<HashMap<Uuid, ImportJob>>,
    exports: RwLock<HashMap<Uuid, ExportJob>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_import_job(&self, kind: ResourceKind, file_name: &str) -> ImportJob {
        let job = ImportJob {
            id: Uuid::new_v4(),
            status: JobStatus::Pending,
            resource_type: kind,
            file_name: file_name.to_string(),
            total_records: 0,
            valid_records: 0,
            error_records: 0,
            errors: ErrorLog::new(),
            created_at: Utc::now(),
            completed_at: None,
            progress: 0,
        };

        self.imports
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(job.id, job.clone());
        job
    }

    pub fn create_export_job(
        &self,
        kind: ResourceKind,
        format: ExportFormat,
        filters: Filters,
    ) -> ExportJob {
        let job = ExportJob {
            id: Uuid::new_v4(),
            status: JobStatus::Pending,
            resource_type: kind,
            format,
            filters,
            total_records: 0,
            download_url: None,
            created_at: Utc::now(),
            completed_at: None,
            progress: 0,
        };

        self.exports
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(job.id, job.clone());
        job
    }

    /// Snapshot copy of an import job; the error log is deep-copied
    pub fn get_import_job(&self, id: Uuid) -> Option<ImportJob> {
        self.imports
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn get_export_job(&self, id: Uuid) -> Option<ExportJob> {
        self.exports
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Merge a progress update into an import job
    ///
    /// Counters and progress are clamped non-decreasing; `new_errors` are
    /// appended to the bounded log. A terminal status pins progress at 100
    /// and stamps `completed_at`. Updates against terminal or unknown jobs
    /// are dropped.
    pub fn update_import_job(
        &self,
        id: Uuid,
        status: JobStatus,
        progress: u8,
        total_records: u64,
        valid_records: u64,
        error_records: u64,
        new_errors: Vec<ValidationError>,
    ) {
        let mut imports = self.imports.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(job) = imports.get_mut(&id) else {
            return;
        };
        if job.status.is_terminal() {
            return;
        }

        job.status = status;
        job.total_records = job.total_records.max(total_records);
        job.valid_records = job.valid_records.max(valid_records);
        job.error_records = job.error_records.max(error_records);
        job.errors.extend(new_errors);

        if status.is_terminal() {
            job.progress = 100;
            job.completed_at = Some(Utc::now());
        } else {
            job.progress = job.progress.max(progress.min(100));
        }
    }

    /// Merge a progress update into an export job; same clamping rules
    pub fn update_export_job(
        &self,
        id: Uuid,
        status: JobStatus,
        progress: u8,
        total_records: u64,
        download_url: Option<String>,
    ) {
        let mut exports = self.exports.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(job) = exports.get_mut(&id) else {
            return;
        };
        if job.status.is_terminal() {
            return;
        }

        job.status = status;
        job.total_records = job.total_records.max(total_records);
        if download_url.is_some() {
            job.download_url = download_url;
        }

        if status.is_terminal() {
            job.progress = 100;
            job.completed_at = Some(Utc::now());
        } else {
            job.progress = job.progress.max(progress.min(100));
        }
    }

    /// Drop jobs created more than `max_age` ago, irrespective of status
    pub fn cleanup_old(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::hours(24));
        let mut removed = 0;

        {
            let mut imports = self.imports.write().unwrap_or_else(std::sync::PoisonError::into_inner);
            let before = imports.len();
            imports.retain(|_, job| job.created_at >= cutoff);
            removed += before - imports.len();
        }
        {
            let mut exports = self.exports.write().unwrap_or_else(std::sync::PoisonError::into_inner);
            let before = exports.len();
            exports.retain(|_, job| job.created_at >= cutoff);
            removed += before - exports.len();
        }

        removed
    }

    pub fn stats(&self) -> RegistryStats {
        let imports = self.imports.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        let exports = self.exports.read().unwrap_or_else(std::sync::PoisonError::into_inner);

        let mut import_jobs: HashMap<String, usize> = HashMap::new();
        for job in imports.values() {
            *import_jobs.entry(job.status.as_str().to_string()).or_default() += 1;
        }

        let mut export_jobs: HashMap<String, usize> = HashMap::new();
        for job in exports.values() {
            *export_jobs.entry(job.status.as_str().to_string()).or_default() += 1;
        }

        RegistryStats {
            total_import_jobs: imports.len(),
            total_export_jobs: exports.len(),
            import_jobs,
            export_jobs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_get_import_job() {
        let registry = JobRegistry::new();
        let job = registry.create_import_job(ResourceKind::Users, "users.csv");

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert!(job.errors.is_empty());

        let snapshot = registry.get_import_job(job.id).unwrap();
        assert_eq!(snapshot.file_name, "users.csv");
        assert_eq!(snapshot.resource_type, ResourceKind::Users);
        assert!(registry.get_import_job(Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_counters_and_progress_are_monotonic() {
        let registry = JobRegistry::new();
        let job = registry.create_import_job(ResourceKind::Users, "users.csv");

        registry.update_import_job(job.id, JobStatus::Processing, 20, 1000, 900, 100, vec![]);
        // A stale update with lower values must not move anything backwards.
        registry.update_import_job(job.id, JobStatus::Processing, 5, 400, 300, 10, vec![]);

        let snapshot = registry.get_import_job(job.id).unwrap();
        assert_eq!(snapshot.progress, 20);
        assert_eq!(snapshot.total_records, 1000);
        assert_eq!(snapshot.valid_records, 900);
        assert_eq!(snapshot.error_records, 100);
    }

    #[test]
    fn test_terminal_status_sets_progress_and_completed_at() {
        let registry = JobRegistry::new();
        let job = registry.create_import_job(ResourceKind::Users, "users.csv");

        registry.update_import_job(job.id, JobStatus::Completed, 42, 10, 10, 0, vec![]);
        let snapshot = registry.get_import_job(job.id).unwrap();
        assert_eq!(snapshot.progress, 100);
        assert!(snapshot.completed_at.is_some());

        // Terminal jobs are frozen.
        registry.update_import_job(job.id, JobStatus::Processing, 10, 99, 99, 99, vec![]);
        let frozen = registry.get_import_job(job.id).unwrap();
        assert_eq!(frozen.status, JobStatus::Completed);
        assert_eq!(frozen.total_records, 10);
    }

    #[test]
    fn test_error_log_capped_through_updates() {
        let registry = JobRegistry::new();
        let job = registry.create_import_job(ResourceKind::Users, "users.csv");

        for batch_start in (0..3000u64).step_by(1000) {
            let errors: Vec<ValidationError> = (batch_start..batch_start + 1000)
                .map(|i| ValidationError::new(i + 2, "email", "invalid"))
                .collect();
            registry.update_import_job(
                job.id,
                JobStatus::Processing,
                10,
                batch_start + 1000,
                0,
                batch_start + 1000,
                errors,
            );
        }

        let snapshot = registry.get_import_job(job.id).unwrap();
        assert_eq!(snapshot.errors.len(), 1000);
        assert_eq!(snapshot.errors.first().unwrap().row, 2);
        assert_eq!(snapshot.errors.last().unwrap().row, 3001);
    }

    #[test]
    fn test_export_job_download_url_on_completion() {
        let registry = JobRegistry::new();
        let job =
            registry.create_export_job(ResourceKind::Users, ExportFormat::Csv, Filters::new());

        registry.update_export_job(job.id, JobStatus::Processing, 45, 5000, None);
        let running = registry.get_export_job(job.id).unwrap();
        assert_eq!(running.progress, 45);
        assert!(running.download_url.is_none());

        registry.update_export_job(
            job.id,
            JobStatus::Completed,
            100,
            10_000,
            Some("/downloads/users_csv_1700000000.csv".to_string()),
        );
        let done = registry.get_export_job(job.id).unwrap();
        assert_eq!(done.progress, 100);
        assert!(done.completed_at.is_some());
        assert_eq!(
            done.download_url.as_deref(),
            Some("/downloads/users_csv_1700000000.csv")
        );
    }

    #[test]
    fn test_cleanup_old_drops_all_statuses() {
        let registry = JobRegistry::new();
        let job = registry.create_import_job(ResourceKind::Users, "users.csv");
        registry.create_export_job(ResourceKind::Comments, ExportFormat::Ndjson, Filters::new());
        registry.update_import_job(job.id, JobStatus::Processing, 10, 1, 1, 0, vec![]);

        // Nothing is old enough yet.
        assert_eq!(registry.cleanup_old(Duration::from_secs(3600)), 0);
        // A zero max-age sweeps everything, including the in-flight job.
        assert_eq!(registry.cleanup_old(Duration::from_secs(0)), 2);
        assert!(registry.get_import_job(job.id).is_none());
    }

    #[test]
    fn test_stats_counts_by_status() {
        let registry = JobRegistry::new();
        let a = registry.create_import_job(ResourceKind::Users, "a.csv");
        let _b = registry.create_import_job(ResourceKind::Users, "b.csv");
        registry.create_export_job(ResourceKind::Articles, ExportFormat::Ndjson, Filters::new());

        registry.update_import_job(a.id, JobStatus::Completed, 100, 1, 1, 0, vec![]);

        let stats = registry.stats();
        assert_eq!(stats.total_import_jobs, 2);
        assert_eq!(stats.total_export_jobs, 1);
        assert_eq!(stats.import_jobs.get("completed"), Some(&1));
        assert_eq!(stats.import_jobs.get("pending"), Some(&1));
        assert_eq!(stats.export_jobs.get("pending"), Some(&1));
    }
}
