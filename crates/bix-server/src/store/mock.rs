//! In-memory store used by unit tests
//!
//! Mirrors the upsert and filter semantics of the Postgres adapter closely
//! enough to exercise the validator and pipeline without a database.
//! Upsert failures can be injected to drive the operational-error paths.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream;
use uuid::Uuid;

use crate::models::{Article, Comment, User};

use super::{Filters, RecordStream, Store, StoreError, StoreResult};

#[derive(Default)]
struct Inner {
    users: Vec<User>,
    articles: Vec<Article>,
    comments: Vec<Comment>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    fail_upserts: AtomicBool,
    batches_committed: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent upsert fail with an operational error
    pub fn fail_upserts(&self) {
        self.fail_upserts.store(true, Ordering::SeqCst);
    }

    /// Number of successfully committed upsert batches
    pub fn batches_committed(&self) -> usize {
        self.batches_committed.load(Ordering::SeqCst)
    }

    pub fn seed_user(&self, user: User) {
        self.inner.lock().unwrap().users.push(user);
    }

    pub fn seed_article(&self, article: Article) {
        self.inner.lock().unwrap().articles.push(article);
    }

    pub fn users(&self) -> Vec<User> {
        self.inner.lock().unwrap().users.clone()
    }

    pub fn articles(&self) -> Vec<Article> {
        self.inner.lock().unwrap().articles.clone()
    }

    pub fn comments(&self) -> Vec<Comment> {
        self.inner.lock().unwrap().comments.clone()
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.fail_upserts.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("injected failure".to_string()))
        } else {
            Ok(())
        }
    }
}

fn sort_key(created_at: Option<DateTime<Utc>>, id: Uuid) -> (DateTime<Utc>, Uuid) {
    (created_at.unwrap_or(DateTime::<Utc>::MIN_UTC), id)
}

fn invalid_filter(key: &str, value: &str) -> StoreError {
    StoreError::InvalidFilter {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn check_bool_filter(filters: &Filters, key: &str) -> StoreResult<()> {
    match filters.get(key).map(String::as_str) {
        None | Some("true") | Some("false") => Ok(()),
        Some(other) => Err(invalid_filter(key, other)),
    }
}

fn check_uuid_filter(filters: &Filters, key: &str) -> StoreResult<()> {
    match filters.get(key) {
        None => Ok(()),
        Some(raw) => Uuid::parse_str(raw)
            .map(|_| ())
            .map_err(|_| invalid_filter(key, raw)),
    }
}

fn check_user_filters(filters: &Filters) -> StoreResult<()> {
    check_bool_filter(filters, "active")
}

fn check_article_filters(filters: &Filters) -> StoreResult<()> {
    check_uuid_filter(filters, "author_id")
}

fn check_comment_filters(filters: &Filters) -> StoreResult<()> {
    check_uuid_filter(filters, "article_id")?;
    check_uuid_filter(filters, "user_id")
}

fn erroring_stream<T: Send + 'static>(err: StoreError) -> RecordStream<T> {
    Box::pin(stream::iter(vec![Err(err)]))
}

fn matches_user(user: &User, filters: &Filters) -> bool {
    if let Some(role) = filters.get("role") {
        if &user.role != role {
            return false;
        }
    }
    if let Some(active) = filters.get("active") {
        if user.active != (active == "true") {
            return false;
        }
    }
    true
}

fn matches_article(article: &Article, filters: &Filters) -> bool {
    if let Some(status) = filters.get("status") {
        if &article.status != status {
            return false;
        }
    }
    if let Some(author_id) = filters.get("author_id") {
        if article.author_id.to_string() != *author_id {
            return false;
        }
    }
    true
}

fn matches_comment(comment: &Comment, filters: &Filters) -> bool {
    if let Some(article_id) = filters.get("article_id") {
        if comment.article_id.to_string() != *article_id {
            return false;
        }
    }
    if let Some(user_id) = filters.get("user_id") {
        if comment.user_id.to_string() != *user_id {
            return false;
        }
    }
    true
}

#[async_trait]
impl Store for MemoryStore {
    async fn user_exists(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.inner.lock().unwrap().users.iter().any(|u| u.id == id))
    }

    async fn article_exists(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .articles
            .iter()
            .any(|a| a.id == id))
    }

    async fn email_exists(&self, email: &str) -> StoreResult<bool> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .users
            .iter()
            .any(|u| u.email == email))
    }

    async fn slug_exists(&self, slug: &str) -> StoreResult<bool> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .articles
            .iter()
            .any(|a| a.slug == slug))
    }

    async fn batch_upsert_users(&self, users: &[User]) -> StoreResult<()> {
        self.check_available()?;
        let mut inner = self.inner.lock().unwrap();
        for user in users {
            inner.users.retain(|existing| existing.email != user.email);
            inner.users.push(user.clone());
        }
        self.batches_committed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn batch_upsert_articles(&self, articles: &[Article]) -> StoreResult<()> {
        self.check_available()?;
        let mut inner = self.inner.lock().unwrap();
        for article in articles {
            inner.articles.retain(|existing| existing.slug != article.slug);
            inner.articles.push(article.clone());
        }
        self.batches_committed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn batch_upsert_comments(&self, comments: &[Comment]) -> StoreResult<()> {
        self.check_available()?;
        let mut inner = self.inner.lock().unwrap();
        for comment in comments {
            inner.comments.retain(|existing| existing.id != comment.id);
            inner.comments.push(comment.clone());
        }
        self.batches_committed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stream_users(&self, filters: &Filters) -> RecordStream<User> {
        if let Err(err) = check_user_filters(filters) {
            return erroring_stream(err);
        }
        let mut rows: Vec<User> = self
            .inner
            .lock()
            .unwrap()
            .users
            .iter()
            .filter(|u| matches_user(u, filters))
            .cloned()
            .collect();
        rows.sort_by_key(|u| sort_key(u.created_at, u.id));
        Box::pin(stream::iter(rows.into_iter().map(Ok)))
    }

    fn stream_articles(&self, filters: &Filters) -> RecordStream<Article> {
        if let Err(err) = check_article_filters(filters) {
            return erroring_stream(err);
        }
        let mut rows: Vec<Article> = self
            .inner
            .lock()
            .unwrap()
            .articles
            .iter()
            .filter(|a| matches_article(a, filters))
            .cloned()
            .collect();
        rows.sort_by_key(|a| sort_key(a.created_at, a.id));
        Box::pin(stream::iter(rows.into_iter().map(Ok)))
    }

    fn stream_comments(&self, filters: &Filters) -> RecordStream<Comment> {
        if let Err(err) = check_comment_filters(filters) {
            return erroring_stream(err);
        }
        let mut rows: Vec<Comment> = self
            .inner
            .lock()
            .unwrap()
            .comments
            .iter()
            .filter(|c| matches_comment(c, filters))
            .cloned()
            .collect();
        rows.sort_by_key(|c| sort_key(c.created_at, c.id));
        Box::pin(stream::iter(rows.into_iter().map(Ok)))
    }

    async fn count_users(&self, filters: &Filters) -> StoreResult<i64> {
        check_user_filters(filters)?;
        Ok(self
            .inner
            .lock()
            .unwrap()
            .users
            .iter()
            .filter(|u| matches_user(u, filters))
            .count() as i64)
    }

    async fn count_articles(&self, filters: &Filters) -> StoreResult<i64> {
        check_article_filters(filters)?;
        Ok(self
            .inner
            .lock()
            .unwrap()
            .articles
            .iter()
            .filter(|a| matches_article(a, filters))
            .count() as i64)
    }

    async fn count_comments(&self, filters: &Filters) -> StoreResult<i64> {
        check_comment_filters(filters)?;
        Ok(self
            .inner
            .lock()
            .unwrap()
            .comments
            .iter()
            .filter(|c| matches_comment(c, filters))
            .count() as i64)
    }
}
