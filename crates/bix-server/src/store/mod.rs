//! Store adapter
//!
//! A narrow capability boundary over the relational database: existence
//! probes, batched upserts keyed by natural key, filtered cursor-returning
//! reads, and filtered counts. The pipeline and validator only ever see the
//! [`Store`] trait; [`postgres::PgStore`] is the production implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Article, Comment, User};

pub mod postgres;

#[cfg(test)]
pub mod mock;

pub use postgres::PgStore;

/// Filter mapping from field name to raw string value. Only whitelisted
/// keys per kind are interpreted; unknown keys are ignored.
pub type Filters = HashMap<String, String>;

/// Filter keys interpreted for each table
pub const USER_FILTER_KEYS: &[&str] = &["role", "active"];
pub const ARTICLE_FILTER_KEYS: &[&str] = &["status", "author_id"];
pub const COMMENT_FILTER_KEYS: &[&str] = &["article_id", "user_id"];

/// Store errors are operational: they abort the surrounding job or request
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid filter value for '{key}': {value}")]
    InvalidFilter { key: String, value: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A forward-only record cursor ordered by `created_at` ascending
pub type RecordStream<T> = BoxStream<'static, StoreResult<T>>;

/// Shared handle to a store implementation
pub type DynStore = Arc<dyn Store>;

/// Capability boundary over the relational database
///
/// Batched upserts run under one transaction per batch and commit
/// atomically; a failure aborts the whole batch. Conflict resolution is
/// last-writer-wins on the natural key (email for users, slug for
/// articles, id for comments). The adapter holds no in-memory caches;
/// existence probes are single-row server-side queries.
#[async_trait]
pub trait Store: Send + Sync {
    async fn user_exists(&self, id: Uuid) -> StoreResult<bool>;
    async fn article_exists(&self, id: Uuid) -> StoreResult<bool>;
    async fn email_exists(&self, email: &str) -> StoreResult<bool>;
    async fn slug_exists(&self, slug: &str) -> StoreResult<bool>;

    async fn batch_upsert_users(&self, users: &[User]) -> StoreResult<()>;
    async fn batch_upsert_articles(&self, articles: &[Article]) -> StoreResult<()>;
    async fn batch_upsert_comments(&self, comments: &[Comment]) -> StoreResult<()>;

    fn stream_users(&self, filters: &Filters) -> RecordStream<User>;
    fn stream_articles(&self, filters: &Filters) -> RecordStream<Article>;
    fn stream_comments(&self, filters: &Filters) -> RecordStream<Comment>;

    async fn count_users(&self, filters: &Filters) -> StoreResult<i64>;
    async fn count_articles(&self, filters: &Filters) -> StoreResult<i64>;
    async fn count_comments(&self, filters: &Filters) -> StoreResult<i64>;
}

/// Collapse duplicate natural keys within a batch, keeping the last
/// occurrence of each key.
///
/// A multi-row `INSERT ... ON CONFLICT` must not touch the same key twice,
/// so intra-batch conflicts are resolved here, preserving last-writer-wins
/// in batch order.
pub(crate) fn dedup_last_by<T: Clone, K: std::hash::Hash + Eq>(
    records: &[T],
    key: impl Fn(&T) -> K,
) -> Vec<T> {
    let mut order: Vec<K> = Vec::new();
    let mut latest: HashMap<K, &T> = HashMap::new();

    for record in records {
        let k = key(record);
        if !latest.contains_key(&k) {
            order.push(key(record));
        }
        latest.insert(k, record);
    }

    order
        .into_iter()
        .filter_map(|k| latest.get(&k).map(|r| (*r).clone()))
        .collect()
}
