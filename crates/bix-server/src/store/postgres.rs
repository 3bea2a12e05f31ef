//! PostgreSQL store implementation
//!
//! Batched upserts are built with `QueryBuilder::push_values` and run in
//! one transaction per batch. Cursors are keyset-paginated over
//! `(created_at, id)` so exports hold at most one page in memory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{stream, Future, TryStreamExt};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::models::{Article, Comment, User};

use super::{dedup_last_by, Filters, RecordStream, Store, StoreError, StoreResult};

/// Rows fetched per cursor page
const CURSOR_PAGE_SIZE: i64 = 500;

/// Rows per multi-row INSERT statement. Well below the Postgres bind
/// parameter limit even for the widest table (articles, 10 columns).
const UPSERT_CHUNK: usize = 1000;

/// Keyset position in the `(created_at, id)` ordering
type Keyset = (DateTime<Utc>, Uuid);

/// Store adapter backed by a PostgreSQL pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn push_clause(qb: &mut QueryBuilder<'_, Postgres>, has_where: &mut bool) {
    if *has_where {
        qb.push(" AND ");
    } else {
        qb.push(" WHERE ");
        *has_where = true;
    }
}

fn parse_bool_filter(key: &str, value: &str) -> StoreResult<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(StoreError::InvalidFilter {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_uuid_filter(key: &str, value: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(value).map_err(|_| StoreError::InvalidFilter {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Whitelisted user filters: `role`, `active`. Unknown keys are ignored.
fn push_user_filters(
    qb: &mut QueryBuilder<'_, Postgres>,
    filters: &Filters,
    has_where: &mut bool,
) -> StoreResult<()> {
    if let Some(role) = filters.get("role") {
        push_clause(qb, has_where);
        qb.push("role = ").push_bind(role.clone());
    }
    if let Some(active) = filters.get("active") {
        let value = parse_bool_filter("active", active)?;
        push_clause(qb, has_where);
        qb.push("active = ").push_bind(value);
    }
    Ok(())
}

/// Whitelisted article filters: `status`, `author_id`.
fn push_article_filters(
    qb: &mut QueryBuilder<'_, Postgres>,
    filters: &Filters,
    has_where: &mut bool,
) -> StoreResult<()> {
    if let Some(status) = filters.get("status") {
        push_clause(qb, has_where);
        qb.push("status = ").push_bind(status.clone());
    }
    if let Some(author_id) = filters.get("author_id") {
        let value = parse_uuid_filter("author_id", author_id)?;
        push_clause(qb, has_where);
        qb.push("author_id = ").push_bind(value);
    }
    Ok(())
}

/// Whitelisted comment filters: `article_id`, `user_id`.
fn push_comment_filters(
    qb: &mut QueryBuilder<'_, Postgres>,
    filters: &Filters,
    has_where: &mut bool,
) -> StoreResult<()> {
    if let Some(article_id) = filters.get("article_id") {
        let value = parse_uuid_filter("article_id", article_id)?;
        push_clause(qb, has_where);
        qb.push("article_id = ").push_bind(value);
    }
    if let Some(user_id) = filters.get("user_id") {
        let value = parse_uuid_filter("user_id", user_id)?;
        push_clause(qb, has_where);
        qb.push("user_id = ").push_bind(value);
    }
    Ok(())
}

fn push_keyset(qb: &mut QueryBuilder<'_, Postgres>, has_where: &mut bool, after: Option<Keyset>) {
    if let Some((created_at, id)) = after {
        push_clause(qb, has_where);
        qb.push("(created_at, id) > (")
            .push_bind(created_at)
            .push(", ")
            .push_bind(id)
            .push(")");
    }
}

fn keyset_of(created_at: Option<DateTime<Utc>>, id: Uuid) -> Keyset {
    (created_at.unwrap_or(DateTime::<Utc>::MIN_UTC), id)
}

/// Turn a page-fetching closure into a forward-only record stream.
///
/// Pages are fetched lazily as the consumer advances; a short page ends
/// the stream.
fn paginate<T, F, Fut>(mut fetch_page: F) -> RecordStream<T>
where
    T: Send + 'static,
    F: FnMut(Option<Keyset>) -> Fut + Send + 'static,
    Fut: Future<Output = StoreResult<Vec<(Keyset, T)>>> + Send + 'static,
{
    Box::pin(
        stream::try_unfold(Some(None::<Keyset>), move |state| {
            let page = state.map(&mut fetch_page);
            async move {
                let Some(page) = page else {
                    return Ok::<_, StoreError>(None);
                };
                let rows = page.await?;
                let full = rows.len() as i64 >= CURSOR_PAGE_SIZE;
                let next = if full {
                    rows.last().map(|(key, _)| Some(*key))
                } else {
                    None
                };
                let items = rows
                    .into_iter()
                    .map(|(_, row)| Ok::<_, StoreError>(row));
                Ok(Some((stream::iter(items), next)))
            }
        })
        .try_flatten(),
    )
}

async fn fetch_users_page(
    pool: &PgPool,
    filters: &Filters,
    after: Option<Keyset>,
) -> StoreResult<Vec<(Keyset, User)>> {
    let mut qb = QueryBuilder::new(
        "SELECT id, email, name, role, active, created_at, updated_at FROM users",
    );
    let mut has_where = false;
    push_user_filters(&mut qb, filters, &mut has_where)?;
    push_keyset(&mut qb, &mut has_where, after);
    qb.push(" ORDER BY created_at, id LIMIT ").push_bind(CURSOR_PAGE_SIZE);

    let rows: Vec<User> = qb.build_query_as().fetch_all(pool).await?;
    Ok(rows
        .into_iter()
        .map(|row| (keyset_of(row.created_at, row.id), row))
        .collect())
}

async fn fetch_articles_page(
    pool: &PgPool,
    filters: &Filters,
    after: Option<Keyset>,
) -> StoreResult<Vec<(Keyset, Article)>> {
    let mut qb = QueryBuilder::new(
        "SELECT id, slug, title, body, author_id, tags, published_at, status, created_at, updated_at FROM articles",
    );
    let mut has_where = false;
    push_article_filters(&mut qb, filters, &mut has_where)?;
    push_keyset(&mut qb, &mut has_where, after);
    qb.push(" ORDER BY created_at, id LIMIT ").push_bind(CURSOR_PAGE_SIZE);

    let rows: Vec<Article> = qb.build_query_as().fetch_all(pool).await?;
    Ok(rows
        .into_iter()
        .map(|row| (keyset_of(row.created_at, row.id), row))
        .collect())
}

async fn fetch_comments_page(
    pool: &PgPool,
    filters: &Filters,
    after: Option<Keyset>,
) -> StoreResult<Vec<(Keyset, Comment)>> {
    let mut qb =
        QueryBuilder::new("SELECT id, article_id, user_id, body, created_at FROM comments");
    let mut has_where = false;
    push_comment_filters(&mut qb, filters, &mut has_where)?;
    push_keyset(&mut qb, &mut has_where, after);
    qb.push(" ORDER BY created_at, id LIMIT ").push_bind(CURSOR_PAGE_SIZE);

    let rows: Vec<Comment> = qb.build_query_as().fetch_all(pool).await?;
    Ok(rows
        .into_iter()
        .map(|row| (keyset_of(row.created_at, row.id), row))
        .collect())
}

#[async_trait]
impl Store for PgStore {
    async fn user_exists(&self, id: Uuid) -> StoreResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn article_exists(&self, id: Uuid) -> StoreResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM articles WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn email_exists(&self, email: &str) -> StoreResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
                .bind(email)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn slug_exists(&self, slug: &str) -> StoreResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM articles WHERE slug = $1)")
                .bind(slug)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn batch_upsert_users(&self, users: &[User]) -> StoreResult<()> {
        if users.is_empty() {
            return Ok(());
        }
        let deduped = dedup_last_by(users, |u| u.email.clone());

        let mut tx = self.pool.begin().await?;
        for chunk in deduped.chunks(UPSERT_CHUNK) {
            let mut qb = QueryBuilder::new(
                "INSERT INTO users (id, email, name, role, active, created_at, updated_at) ",
            );
            qb.push_values(chunk, |mut b, user| {
                b.push_bind(user.id)
                    .push_bind(&user.email)
                    .push_bind(&user.name)
                    .push_bind(&user.role)
                    .push_bind(user.active)
                    .push_bind(user.created_at)
                    .push_bind(user.updated_at);
            });
            qb.push(
                " ON CONFLICT (email) DO UPDATE SET \
                 name = EXCLUDED.name, \
                 role = EXCLUDED.role, \
                 active = EXCLUDED.active, \
                 updated_at = EXCLUDED.updated_at",
            );
            qb.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn batch_upsert_articles(&self, articles: &[Article]) -> StoreResult<()> {
        if articles.is_empty() {
            return Ok(());
        }
        let deduped = dedup_last_by(articles, |a| a.slug.clone());

        let mut tx = self.pool.begin().await?;
        for chunk in deduped.chunks(UPSERT_CHUNK) {
            let mut qb = QueryBuilder::new(
                "INSERT INTO articles (id, slug, title, body, author_id, tags, published_at, status, created_at, updated_at) ",
            );
            qb.push_values(chunk, |mut b, article| {
                b.push_bind(article.id)
                    .push_bind(&article.slug)
                    .push_bind(&article.title)
                    .push_bind(&article.body)
                    .push_bind(article.author_id)
                    .push_bind(&article.tags)
                    .push_bind(article.published_at)
                    .push_bind(&article.status)
                    .push_bind(article.created_at)
                    .push_bind(article.updated_at);
            });
            qb.push(
                " ON CONFLICT (slug) DO UPDATE SET \
                 title = EXCLUDED.title, \
                 body = EXCLUDED.body, \
                 author_id = EXCLUDED.author_id, \
                 tags = EXCLUDED.tags, \
                 published_at = EXCLUDED.published_at, \
                 status = EXCLUDED.status, \
                 updated_at = EXCLUDED.updated_at",
            );
            qb.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn batch_upsert_comments(&self, comments: &[Comment]) -> StoreResult<()> {
        if comments.is_empty() {
            return Ok(());
        }
        let deduped = dedup_last_by(comments, |c| c.id);

        let mut tx = self.pool.begin().await?;
        for chunk in deduped.chunks(UPSERT_CHUNK) {
            let mut qb = QueryBuilder::new(
                "INSERT INTO comments (id, article_id, user_id, body, created_at) ",
            );
            qb.push_values(chunk, |mut b, comment| {
                b.push_bind(comment.id)
                    .push_bind(comment.article_id)
                    .push_bind(comment.user_id)
                    .push_bind(&comment.body)
                    .push_bind(comment.created_at);
            });
            qb.push(
                " ON CONFLICT (id) DO UPDATE SET \
                 article_id = EXCLUDED.article_id, \
                 user_id = EXCLUDED.user_id, \
                 body = EXCLUDED.body, \
                 created_at = EXCLUDED.created_at",
            );
            qb.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    fn stream_users(&self, filters: &Filters) -> RecordStream<User> {
        let pool = self.pool.clone();
        let filters = filters.clone();
        paginate(move |after| {
            let pool = pool.clone();
            let filters = filters.clone();
            async move { fetch_users_page(&pool, &filters, after).await }
        })
    }

    fn stream_articles(&self, filters: &Filters) -> RecordStream<Article> {
        let pool = self.pool.clone();
        let filters = filters.clone();
        paginate(move |after| {
            let pool = pool.clone();
            let filters = filters.clone();
            async move { fetch_articles_page(&pool, &filters, after).await }
        })
    }

    fn stream_comments(&self, filters: &Filters) -> RecordStream<Comment> {
        let pool = self.pool.clone();
        let filters = filters.clone();
        paginate(move |after| {
            let pool = pool.clone();
            let filters = filters.clone();
            async move { fetch_comments_page(&pool, &filters, after).await }
        })
    }

    async fn count_users(&self, filters: &Filters) -> StoreResult<i64> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM users");
        let mut has_where = false;
        push_user_filters(&mut qb, filters, &mut has_where)?;
        let count: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn count_articles(&self, filters: &Filters) -> StoreResult<i64> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM articles");
        let mut has_where = false;
        push_article_filters(&mut qb, filters, &mut has_where)?;
        let count: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn count_comments(&self, filters: &Filters) -> StoreResult<i64> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM comments");
        let mut has_where = false;
        push_comment_filters(&mut qb, filters, &mut has_where)?;
        let count: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sql_of(build: impl FnOnce(&mut QueryBuilder<'_, Postgres>) -> StoreResult<()>) -> String {
        let mut qb = QueryBuilder::new("SELECT 1 FROM t");
        build(&mut qb).unwrap();
        qb.sql().to_string()
    }

    #[test]
    fn test_user_filters_whitelist() {
        let mut filters = Filters::new();
        filters.insert("role".to_string(), "admin".to_string());
        filters.insert("active".to_string(), "true".to_string());
        filters.insert("email".to_string(), "ignored@example.com".to_string());

        let sql = sql_of(|qb| {
            let mut has_where = false;
            push_user_filters(qb, &filters, &mut has_where)
        });
        assert!(sql.contains("role = "));
        assert!(sql.contains("active = "));
        assert!(!sql.contains("email"));
        assert_eq!(sql.matches("WHERE").count(), 1);
        assert_eq!(sql.matches("AND").count(), 1);
    }

    #[test]
    fn test_invalid_active_filter_rejected() {
        let mut filters = Filters::new();
        filters.insert("active".to_string(), "yes".to_string());

        let mut qb = QueryBuilder::new("SELECT 1 FROM t");
        let mut has_where = false;
        let err = push_user_filters(&mut qb, &filters, &mut has_where).unwrap_err();
        assert!(matches!(err, StoreError::InvalidFilter { .. }));
    }

    #[test]
    fn test_invalid_uuid_filter_rejected() {
        let mut filters = Filters::new();
        filters.insert("author_id".to_string(), "not-a-uuid".to_string());

        let mut qb = QueryBuilder::new("SELECT 1 FROM t");
        let mut has_where = false;
        let err = push_article_filters(&mut qb, &filters, &mut has_where).unwrap_err();
        assert!(matches!(err, StoreError::InvalidFilter { .. }));
    }

    #[test]
    fn test_keyset_appends_to_existing_where() {
        let sql = sql_of(|qb| {
            let mut has_where = false;
            let mut filters = Filters::new();
            filters.insert("role".to_string(), "admin".to_string());
            push_user_filters(qb, &filters, &mut has_where)?;
            push_keyset(
                qb,
                &mut has_where,
                Some((Utc::now(), Uuid::new_v4())),
            );
            Ok(())
        });
        assert!(sql.contains("WHERE role = "));
        assert!(sql.contains("AND (created_at, id) > ("));
    }

    #[test]
    fn test_no_filters_no_where() {
        let sql = sql_of(|qb| {
            let mut has_where = false;
            push_comment_filters(qb, &Filters::new(), &mut has_where)
        });
        assert_eq!(sql, "SELECT 1 FROM t");
    }
}
