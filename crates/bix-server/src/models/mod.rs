//! Record and job models
//!
//! The three record kinds handled by the service, the validation error
//! shape, and the import/export job records tracked by the registry.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Roles a user may hold
pub const VALID_ROLES: &[&str] = &["admin", "manager", "reader"];

/// Article lifecycle states
pub const VALID_STATUSES: &[&str] = &["draft", "published"];

/// Resource kinds moved through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Users,
    Articles,
    Comments,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Users => "users",
            ResourceKind::Articles => "articles",
            ResourceKind::Comments => "comments",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown resource kind: {0}")]
pub struct InvalidResourceKind(String);

impl std::str::FromStr for ResourceKind {
    type Err = InvalidResourceKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "users" => Ok(ResourceKind::Users),
            "articles" => Ok(ResourceKind::Articles),
            "comments" => Ok(ResourceKind::Comments),
            other => Err(InvalidResourceKind(other.to_string())),
        }
    }
}

/// Formats accepted on the import path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportFormat {
    Csv,
    Ndjson,
}

impl ImportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportFormat::Csv => "csv",
            ImportFormat::Ndjson => "ndjson",
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown import format: {0}")]
pub struct InvalidImportFormat(String);

impl std::str::FromStr for ImportFormat {
    type Err = InvalidImportFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "csv" => Ok(ImportFormat::Csv),
            "ndjson" => Ok(ImportFormat::Ndjson),
            other => Err(InvalidImportFormat(other.to_string())),
        }
    }
}

/// Formats accepted on the export path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Csv,
    Ndjson,
    Json,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Ndjson => "ndjson",
            ExportFormat::Json => "json",
        }
    }

    /// File extension for server-side export files
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }

    /// Content type for streamed responses
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv",
            ExportFormat::Ndjson => "application/x-ndjson",
            ExportFormat::Json => "application/json",
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown export format: {0}")]
pub struct InvalidExportFormat(String);

impl std::str::FromStr for ExportFormat {
    type Err = InvalidExportFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "csv" => Ok(ExportFormat::Csv),
            "ndjson" => Ok(ExportFormat::Ndjson),
            "json" => Ok(ExportFormat::Json),
            other => Err(InvalidExportFormat(other.to_string())),
        }
    }
}

/// Legal (kind, format) combinations for imports
pub fn import_format_supported(kind: ResourceKind, format: ImportFormat) -> bool {
    matches!(
        (kind, format),
        (ResourceKind::Users, ImportFormat::Csv)
            | (ResourceKind::Articles, ImportFormat::Ndjson)
            | (ResourceKind::Comments, ImportFormat::Ndjson)
    )
}

/// Legal (kind, format) combinations for exports
///
/// CSV export is defined for users only; the line-oriented JSON formats
/// work for every kind.
pub fn export_format_supported(kind: ResourceKind, format: ExportFormat) -> bool {
    match format {
        ExportFormat::Csv => kind == ResourceKind::Users,
        ExportFormat::Ndjson | ExportFormat::Json => true,
    }
}

/// Job lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Terminal states freeze counters and set `completed_at`
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// A user record
///
/// The nil UUID stands for "id not supplied"; the validator generates a
/// fresh v4 id on acceptance. Upserts key on `email`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    #[serde(default)]
    pub id: Uuid,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl User {
    /// Natural key used for upsert conflict resolution
    pub fn natural_key(&self) -> &str {
        &self.email
    }

    /// Generate a v4 id if none was supplied
    pub fn ensure_id(&mut self) {
        if self.id.is_nil() {
            self.id = Uuid::new_v4();
        }
    }

    /// Stamp `created_at` if unset; `updated_at` is always refreshed
    pub fn touch_timestamps(&mut self) {
        let now = Utc::now();
        if self.created_at.is_none() {
            self.created_at = Some(now);
        }
        self.updated_at = Some(now);
    }
}

/// An article record
///
/// Upserts key on `slug`. `author_id` must reference an existing user.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Article {
    #[serde(default)]
    pub id: Uuid,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub author_id: Uuid,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Article {
    pub fn natural_key(&self) -> &str {
        &self.slug
    }

    pub fn ensure_id(&mut self) {
        if self.id.is_nil() {
            self.id = Uuid::new_v4();
        }
    }

    pub fn touch_timestamps(&mut self) {
        let now = Utc::now();
        if self.created_at.is_none() {
            self.created_at = Some(now);
        }
        self.updated_at = Some(now);
    }
}

/// A comment record
///
/// Upserts key on `id`; comments have no separate natural key.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Comment {
    #[serde(default)]
    pub id: Uuid,
    #[serde(default)]
    pub article_id: Uuid,
    #[serde(default)]
    pub user_id: Uuid,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Comment {
    pub fn ensure_id(&mut self) {
        if self.id.is_nil() {
            self.id = Uuid::new_v4();
        }
    }

    /// Comments only carry a creation timestamp
    pub fn touch_timestamps(&mut self) {
        if self.created_at.is_none() {
            self.created_at = Some(Utc::now());
        }
    }
}

/// A per-record validation failure
///
/// `row` is 1-based relative to the start of the payload; for CSV the
/// header line counts as row 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    pub row: u64,
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    pub message: String,
}

impl ValidationError {
    pub fn new(row: u64, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            row,
            field: field.into(),
            value: None,
            message: message.into(),
        }
    }

    pub fn with_value(mut self, value: impl Into<serde_json::Value>) -> Self {
        self.value = Some(value.into());
        self
    }
}

/// Cap on retained errors per job: the first 500 observed plus a sliding
/// window of the most recent 500.
pub const ERROR_LOG_HEAD: usize = 500;
pub const ERROR_LOG_TAIL: usize = 500;

/// Bounded per-job error log
///
/// Keeps initial context (the head) and recent context (the tail) while
/// bounding memory under pathological inputs. Serialises as a flat array.
#[derive(Debug, Clone, Default)]
pub struct ErrorLog {
    head: Vec<ValidationError>,
    tail: VecDeque<ValidationError>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: ValidationError) {
        if self.head.len() < ERROR_LOG_HEAD {
            self.head.push(err);
        } else {
            self.tail.push_back(err);
            if self.tail.len() > ERROR_LOG_TAIL {
                self.tail.pop_front();
            }
        }
    }

    pub fn extend(&mut self, errs: impl IntoIterator<Item = ValidationError>) {
        for err in errs {
            self.push(err);
        }
    }

    pub fn len(&self) -> usize {
        self.head.len() + self.tail.len()
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_empty() && self.tail.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.head.iter().chain(self.tail.iter())
    }

    pub fn first(&self) -> Option<&ValidationError> {
        self.head.first()
    }

    pub fn last(&self) -> Option<&ValidationError> {
        self.tail.back().or_else(|| self.head.last())
    }

    pub fn to_vec(&self) -> Vec<ValidationError> {
        self.iter().cloned().collect()
    }
}

impl Serialize for ErrorLog {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl<'de> Deserialize<'de> for ErrorLog {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let errs = Vec::<ValidationError>::deserialize(deserializer)?;
        let mut log = ErrorLog::new();
        log.extend(errs);
        Ok(log)
    }
}

/// An asynchronous import job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportJob {
    pub id: Uuid,
    pub status: JobStatus,
    pub resource_type: ResourceKind,
    pub file_name: String,
    pub total_records: u64,
    pub valid_records: u64,
    pub error_records: u64,
    pub errors: ErrorLog,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Percentage, 0..=100
    pub progress: u8,
}

/// An asynchronous export job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportJob {
    pub id: Uuid,
    pub status: JobStatus,
    pub resource_type: ResourceKind,
    pub format: ExportFormat,
    pub filters: std::collections::HashMap<String, String>,
    pub total_records: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: u8,
}

/// Request body for JSON-mode import creation
#[derive(Debug, Clone, Deserialize)]
pub struct ImportRequest {
    pub resource_type: ResourceKind,
    #[serde(default)]
    pub file_url: Option<String>,
    pub format: ImportFormat,
}

/// Request body for async export creation
#[derive(Debug, Clone, Deserialize)]
pub struct ExportRequest {
    pub resource_type: ResourceKind,
    pub format: ExportFormat,
    #[serde(default)]
    pub filters: std::collections::HashMap<String, String>,
    /// Accepted for forward compatibility; field projection is not applied
    #[serde(default)]
    pub fields: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_generation_and_natural_key() {
        let mut user = User {
            id: Uuid::nil(),
            email: "test@example.com".to_string(),
            name: "Test User".to_string(),
            role: "admin".to_string(),
            active: true,
            created_at: None,
            updated_at: None,
        };

        user.ensure_id();
        assert!(!user.id.is_nil());

        let id = user.id;
        user.ensure_id();
        assert_eq!(user.id, id, "existing id must be preserved");

        assert_eq!(user.natural_key(), "test@example.com");

        user.touch_timestamps();
        assert!(user.created_at.is_some());
        assert!(user.updated_at.is_some());
    }

    #[test]
    fn test_user_touch_preserves_created_at() {
        let created = Utc::now() - chrono::Duration::days(7);
        let mut user = User {
            id: Uuid::new_v4(),
            email: "a@example.com".to_string(),
            name: "A".to_string(),
            role: "reader".to_string(),
            active: false,
            created_at: Some(created),
            updated_at: None,
        };

        user.touch_timestamps();
        assert_eq!(user.created_at, Some(created));
        assert!(user.updated_at.unwrap() > created);
    }

    #[test]
    fn test_article_natural_key_and_timestamps() {
        let mut article = Article {
            id: Uuid::nil(),
            slug: "test-article".to_string(),
            title: "Test Article".to_string(),
            body: "body".to_string(),
            author_id: Uuid::new_v4(),
            tags: vec!["test".to_string(), "example".to_string()],
            published_at: None,
            status: "draft".to_string(),
            created_at: None,
            updated_at: None,
        };

        article.ensure_id();
        assert!(!article.id.is_nil());
        assert_eq!(article.natural_key(), "test-article");

        article.touch_timestamps();
        assert!(article.created_at.is_some());
        assert!(article.updated_at.is_some());
    }

    #[test]
    fn test_comment_only_gets_created_at() {
        let mut comment = Comment {
            id: Uuid::nil(),
            article_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            body: "a comment".to_string(),
            created_at: None,
        };

        comment.ensure_id();
        assert!(!comment.id.is_nil());

        comment.touch_timestamps();
        assert!(comment.created_at.is_some());
    }

    #[test]
    fn test_resource_kind_round_trip() {
        for kind in [
            ResourceKind::Users,
            ResourceKind::Articles,
            ResourceKind::Comments,
        ] {
            assert_eq!(kind.as_str().parse::<ResourceKind>().unwrap(), kind);
        }
        assert!("organisations".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn test_import_format_matrix() {
        assert!(import_format_supported(
            ResourceKind::Users,
            ImportFormat::Csv
        ));
        assert!(import_format_supported(
            ResourceKind::Articles,
            ImportFormat::Ndjson
        ));
        assert!(import_format_supported(
            ResourceKind::Comments,
            ImportFormat::Ndjson
        ));
        assert!(!import_format_supported(
            ResourceKind::Users,
            ImportFormat::Ndjson
        ));
        assert!(!import_format_supported(
            ResourceKind::Articles,
            ImportFormat::Csv
        ));
    }

    #[test]
    fn test_export_format_matrix() {
        assert!(export_format_supported(
            ResourceKind::Users,
            ExportFormat::Csv
        ));
        assert!(!export_format_supported(
            ResourceKind::Articles,
            ExportFormat::Csv
        ));
        for kind in [
            ResourceKind::Users,
            ResourceKind::Articles,
            ResourceKind::Comments,
        ] {
            assert!(export_format_supported(kind, ExportFormat::Ndjson));
            assert!(export_format_supported(kind, ExportFormat::Json));
        }
    }

    #[test]
    fn test_job_status_terminal() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_error_log_appends_freely_below_cap() {
        let mut log = ErrorLog::new();
        for row in 1..=800u64 {
            log.push(ValidationError::new(row, "email", "invalid"));
        }
        assert_eq!(log.len(), 800);
        assert_eq!(log.first().unwrap().row, 1);
        assert_eq!(log.last().unwrap().row, 800);
    }

    #[test]
    fn test_error_log_keeps_first_and_most_recent() {
        let mut log = ErrorLog::new();
        for row in 1..=3000u64 {
            log.push(ValidationError::new(row, "email", "invalid"));
        }
        assert_eq!(log.len(), 1000);

        let rows: Vec<u64> = log.iter().map(|e| e.row).collect();
        assert_eq!(&rows[..500], (1..=500).collect::<Vec<_>>().as_slice());
        assert_eq!(&rows[500..], (2501..=3000).collect::<Vec<_>>().as_slice());
    }

    #[test]
    fn test_error_log_serialises_flat() {
        let mut log = ErrorLog::new();
        log.push(ValidationError::new(2, "email", "invalid").with_value("bad@"));
        let json = serde_json::to_value(&log).unwrap();
        assert_eq!(json[0]["row"], 2);
        assert_eq!(json[0]["field"], "email");
        assert_eq!(json[0]["value"], "bad@");
    }

    #[test]
    fn test_user_ndjson_round_trip() {
        let raw = r#"{"email":"x@example.com","name":"X","role":"reader","active":true}"#;
        let user: User = serde_json::from_str(raw).unwrap();
        assert!(user.id.is_nil());
        assert!(user.created_at.is_none());
        assert_eq!(user.role, "reader");
    }

    #[test]
    fn test_article_unknown_fields_ignored() {
        let raw = format!(
            r#"{{"slug":"hi","title":"t","body":"b","author_id":"{}","status":"draft","surprise":42}}"#,
            Uuid::new_v4()
        );
        let article: Article = serde_json::from_str(&raw).unwrap();
        assert_eq!(article.slug, "hi");
        assert!(article.tags.is_empty());
    }
}
