//! Detached job execution
//!
//! The runner owns the fire-and-forget boundary: it marks a job as
//! processing, spawns the pipeline on its own task, and translates the
//! outcome into registry state. An operational error terminalises the job
//! as failed with a single general error entry; cancellation leaves it in
//! `processing` for the sweeper or an operator to resolve.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::{
    ExportFormat, ImportFormat, JobStatus, ResourceKind, ValidationError,
};
use crate::pipeline::{ExportOutcome, ImportOutcome, Processor};
use crate::store::{DynStore, Filters};

use super::JobRegistry;

pub struct JobRunner {
    registry: Arc<JobRegistry>,
    store: DynStore,
    processor: Arc<Processor>,
    tokens: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl JobRunner {
    pub fn new(registry: Arc<JobRegistry>, store: DynStore, processor: Arc<Processor>) -> Self {
        Self {
            registry,
            store,
            processor,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Request cooperative cancellation of a running job
    pub fn cancel(&self, job_id: Uuid) -> bool {
        let tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        match tokens.get(&job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn register_token(&self, job_id: Uuid) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id, token.clone());
        token
    }

    fn release_token(&self, job_id: Uuid) {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&job_id);
    }

    /// Spawn an import pipeline on a detached task
    pub fn spawn_import(
        self: &Arc<Self>,
        job_id: Uuid,
        kind: ResourceKind,
        format: ImportFormat,
        path: PathBuf,
    ) {
        let runner = Arc::clone(self);
        let token = self.register_token(job_id);

        runner.registry.update_import_job(
            job_id,
            JobStatus::Processing,
            0,
            0,
            0,
            0,
            vec![],
        );

        tokio::spawn(async move {
            let result = runner
                .processor
                .process_import(&token, job_id, kind, format, &path)
                .await;

            match result {
                Ok(ImportOutcome::Completed) => {}
                Ok(ImportOutcome::Cancelled) => {
                    tracing::warn!(job_id = %job_id, "import cancelled, job left in processing");
                }
                Err(err) => {
                    tracing::error!(job_id = %job_id, error = %err, "import failed");
                    runner.registry.update_import_job(
                        job_id,
                        JobStatus::Failed,
                        100,
                        0,
                        0,
                        0,
                        vec![ValidationError::new(
                            0,
                            "general",
                            format!("Import failed: {}", err),
                        )],
                    );
                }
            }

            runner.release_token(job_id);
        });
    }

    /// Spawn an export pipeline on a detached task
    pub fn spawn_export(
        self: &Arc<Self>,
        job_id: Uuid,
        kind: ResourceKind,
        format: ExportFormat,
        filters: Filters,
    ) {
        let runner = Arc::clone(self);
        let token = self.register_token(job_id);

        runner
            .registry
            .update_export_job(job_id, JobStatus::Processing, 0, 0, None);

        tokio::spawn(async move {
            let total = match runner.count_for(kind, &filters).await {
                Ok(total) => total,
                Err(err) => {
                    tracing::error!(job_id = %job_id, error = %err, "export count failed");
                    runner
                        .registry
                        .update_export_job(job_id, JobStatus::Failed, 100, 0, None);
                    runner.release_token(job_id);
                    return;
                }
            };

            let result = runner
                .processor
                .process_export(&token, job_id, kind, format, &filters)
                .await;

            match result {
                Ok(ExportOutcome::Completed { download_url, .. }) => {
                    runner.registry.update_export_job(
                        job_id,
                        JobStatus::Completed,
                        100,
                        total,
                        Some(download_url),
                    );
                }
                Ok(ExportOutcome::Cancelled) => {
                    tracing::warn!(job_id = %job_id, "export cancelled, job left in processing");
                }
                Err(err) => {
                    tracing::error!(job_id = %job_id, error = %err, "export failed");
                    runner
                        .registry
                        .update_export_job(job_id, JobStatus::Failed, 100, total, None);
                }
            }

            runner.release_token(job_id);
        });
    }

    async fn count_for(
        &self,
        kind: ResourceKind,
        filters: &Filters,
    ) -> Result<u64, crate::store::StoreError> {
        let count = match kind {
            ResourceKind::Users => self.store.count_users(filters).await?,
            ResourceKind::Articles => self.store.count_articles(filters).await?,
            ResourceKind::Comments => self.store.count_comments(filters).await?,
        };
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use tempfile::NamedTempFile;

    use crate::store::mock::MemoryStore;

    use super::*;

    async fn wait_for<F: Fn() -> bool>(check: F) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    fn runner_fixture(
        store: Arc<MemoryStore>,
        export_dir: std::path::PathBuf,
    ) -> (Arc<JobRunner>, Arc<JobRegistry>) {
        let registry = Arc::new(JobRegistry::new());
        let store: DynStore = store;
        let processor = Arc::new(Processor::new(
            store.clone(),
            registry.clone(),
            export_dir,
        ));
        (
            Arc::new(JobRunner::new(registry.clone(), store, processor)),
            registry,
        )
    }

    #[tokio::test]
    async fn test_spawn_import_runs_to_completion() {
        let store = Arc::new(MemoryStore::new());
        let (runner, registry) = runner_fixture(store.clone(), std::env::temp_dir());
        let job = registry.create_import_job(ResourceKind::Users, "users.csv");

        let mut payload = NamedTempFile::new().unwrap();
        payload
            .write_all(b"email,name,role,active\nalice@example.com,Alice,admin,true\n")
            .unwrap();
        payload.flush().unwrap();

        runner.spawn_import(
            job.id,
            ResourceKind::Users,
            ImportFormat::Csv,
            payload.path().to_path_buf(),
        );

        wait_for(|| {
            registry
                .get_import_job(job.id)
                .map(|j| j.status == JobStatus::Completed)
                .unwrap_or(false)
        })
        .await;

        assert_eq!(store.users().len(), 1);
        assert!(!runner.cancel(job.id), "token released after completion");
    }

    #[tokio::test]
    async fn test_spawn_import_marks_failed_with_general_error() {
        let store = Arc::new(MemoryStore::new());
        store.fail_upserts();
        let (runner, registry) = runner_fixture(store, std::env::temp_dir());
        let job = registry.create_import_job(ResourceKind::Users, "users.csv");

        let mut payload = NamedTempFile::new().unwrap();
        payload
            .write_all(b"email,name,role,active\nalice@example.com,Alice,admin,true\n")
            .unwrap();
        payload.flush().unwrap();

        runner.spawn_import(
            job.id,
            ResourceKind::Users,
            ImportFormat::Csv,
            payload.path().to_path_buf(),
        );

        wait_for(|| {
            registry
                .get_import_job(job.id)
                .map(|j| j.status == JobStatus::Failed)
                .unwrap_or(false)
        })
        .await;

        let snapshot = registry.get_import_job(job.id).unwrap();
        assert_eq!(snapshot.progress, 100);
        let errors = snapshot.errors.to_vec();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "general");
        assert!(errors[0].message.starts_with("Import failed:"));
    }

    #[tokio::test]
    async fn test_spawn_export_completes_with_download_url() {
        let store = Arc::new(MemoryStore::new());
        let mut user = crate::models::User {
            id: Uuid::new_v4(),
            email: "a@example.com".to_string(),
            name: "A".to_string(),
            role: "admin".to_string(),
            active: true,
            created_at: None,
            updated_at: None,
        };
        user.touch_timestamps();
        store.seed_user(user);

        let export_dir = tempfile::tempdir().unwrap();
        let (runner, registry) = runner_fixture(store, export_dir.path().to_path_buf());
        let job =
            registry.create_export_job(ResourceKind::Users, ExportFormat::Ndjson, Filters::new());

        runner.spawn_export(job.id, ResourceKind::Users, ExportFormat::Ndjson, Filters::new());

        wait_for(|| {
            registry
                .get_export_job(job.id)
                .map(|j| j.status == JobStatus::Completed)
                .unwrap_or(false)
        })
        .await;

        let snapshot = registry.get_export_job(job.id).unwrap();
        assert_eq!(snapshot.total_records, 1);
        assert!(snapshot
            .download_url
            .as_deref()
            .unwrap()
            .starts_with("/downloads/"));
    }

    #[tokio::test]
    async fn test_cancel_unknown_job_is_noop() {
        let store = Arc::new(MemoryStore::new());
        let (runner, _) = runner_fixture(store, std::env::temp_dir());
        assert!(!runner.cancel(Uuid::new_v4()));
    }
}
