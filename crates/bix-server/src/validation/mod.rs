//! Per-record validation
//!
//! [`RecordValidator`] checks one record against its kind and collects
//! structured [`ValidationError`]s; it never fails a record with a panic or
//! an early return. Store reads (existence probes) are the only I/O; a
//! probe failure is an operational error and propagates to the caller.
//!
//! [`BatchValidator`] runs the per-record validator over a batch, stamps
//! ids and timestamps on accepted records, and accumulates errors across
//! batches for the lifetime of one job.

use crate::models::{
    Article, Comment, User, ValidationError, VALID_ROLES, VALID_STATUSES,
};
use crate::store::{DynStore, StoreResult};

/// Syntactic email check: one `@`, non-empty local part, dotted domain,
/// no whitespace. Deliberately loose; the unique index is the backstop.
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.is_empty() {
        return false;
    }
    if domain.starts_with('.') || domain.ends_with('.') {
        return false;
    }
    domain.contains('.')
}

/// Kebab-case slug check: lowercase alphanumeric runs joined by single
/// hyphens (`^[a-z0-9]+(?:-[a-z0-9]+)*$`).
pub fn is_valid_slug(slug: &str) -> bool {
    if slug.is_empty() || slug.starts_with('-') || slug.ends_with('-') {
        return false;
    }
    if slug.contains("--") {
        return false;
    }
    slug.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Validates a single record against its kind
pub struct RecordValidator {
    store: DynStore,
}

impl RecordValidator {
    pub fn new(store: DynStore) -> Self {
        Self { store }
    }

    /// Validate a user record. `row` labels any errors produced.
    pub async fn validate_user(
        &self,
        user: &User,
        row: u64,
    ) -> StoreResult<Vec<ValidationError>> {
        let mut errors = Vec::new();

        if user.email.is_empty() {
            errors.push(ValidationError::new(row, "email", "email is required"));
        } else if !is_valid_email(&user.email) {
            errors.push(
                ValidationError::new(row, "email", "invalid email format")
                    .with_value(user.email.clone()),
            );
        }

        if user.name.trim().is_empty() {
            errors.push(ValidationError::new(row, "name", "name is required"));
        }

        if user.role.is_empty() {
            errors.push(ValidationError::new(row, "role", "role is required"));
        } else if !VALID_ROLES.contains(&user.role.as_str()) {
            errors.push(
                ValidationError::new(row, "role", "role must be one of: admin, manager, reader")
                    .with_value(user.role.clone()),
            );
        }

        // Reusing an explicit id for an already-known email is rejected;
        // upserting by email without an id is allowed.
        if !user.id.is_nil()
            && !user.email.is_empty()
            && self.store.email_exists(&user.email).await?
        {
            errors.push(
                ValidationError::new(row, "email", "email already exists")
                    .with_value(user.email.clone()),
            );
        }

        Ok(errors)
    }

    /// Validate an article record. A published article with no
    /// `published_at` is stamped with the current time on the spot.
    pub async fn validate_article(
        &self,
        article: &mut Article,
        row: u64,
    ) -> StoreResult<Vec<ValidationError>> {
        let mut errors = Vec::new();

        if article.slug.is_empty() {
            errors.push(ValidationError::new(row, "slug", "slug is required"));
        } else {
            if !is_valid_slug(&article.slug) {
                errors.push(
                    ValidationError::new(
                        row,
                        "slug",
                        "slug must be kebab-case (lowercase letters, numbers, and hyphens only)",
                    )
                    .with_value(article.slug.clone()),
                );
            }
            if !article.id.is_nil() && self.store.slug_exists(&article.slug).await? {
                errors.push(
                    ValidationError::new(row, "slug", "slug already exists")
                        .with_value(article.slug.clone()),
                );
            }
        }

        if article.title.trim().is_empty() {
            errors.push(ValidationError::new(row, "title", "title is required"));
        }
        if article.body.trim().is_empty() {
            errors.push(ValidationError::new(row, "body", "body is required"));
        }

        if article.author_id.is_nil() {
            errors.push(ValidationError::new(row, "author_id", "author_id is required"));
        } else if !self.store.user_exists(article.author_id).await? {
            errors.push(
                ValidationError::new(row, "author_id", "author_id does not exist")
                    .with_value(article.author_id.to_string()),
            );
        }

        if article.status.is_empty() {
            errors.push(ValidationError::new(row, "status", "status is required"));
        } else if !VALID_STATUSES.contains(&article.status.as_str()) {
            errors.push(
                ValidationError::new(row, "status", "status must be one of: draft, published")
                    .with_value(article.status.clone()),
            );
        }

        if article.status == "draft" && article.published_at.is_some() {
            errors.push(ValidationError::new(
                row,
                "published_at",
                "draft articles cannot have published_at date",
            ));
        }

        if article.status == "published" && article.published_at.is_none() {
            article.published_at = Some(chrono::Utc::now());
        }

        Ok(errors)
    }

    /// Validate a comment record.
    pub async fn validate_comment(
        &self,
        comment: &Comment,
        row: u64,
    ) -> StoreResult<Vec<ValidationError>> {
        let mut errors = Vec::new();

        if comment.article_id.is_nil() {
            errors.push(ValidationError::new(row, "article_id", "article_id is required"));
        } else if !self.store.article_exists(comment.article_id).await? {
            errors.push(
                ValidationError::new(row, "article_id", "article_id does not exist")
                    .with_value(comment.article_id.to_string()),
            );
        }

        if comment.user_id.is_nil() {
            errors.push(ValidationError::new(row, "user_id", "user_id is required"));
        } else if !self.store.user_exists(comment.user_id).await? {
            errors.push(
                ValidationError::new(row, "user_id", "user_id does not exist")
                    .with_value(comment.user_id.to_string()),
            );
        }

        if comment.body.is_empty() {
            errors.push(ValidationError::new(row, "body", "body is required"));
        } else {
            if comment.body.trim().is_empty() {
                errors.push(ValidationError::new(row, "body", "body cannot be empty"));
            }

            let word_count = comment.body.split_whitespace().count();
            if word_count > 500 {
                errors.push(
                    ValidationError::new(row, "body", "body cannot exceed 500 words")
                        .with_value(format!("{} words", word_count)),
                );
            }

            let char_count = comment.body.chars().count();
            if char_count > 10_000 {
                errors.push(
                    ValidationError::new(row, "body", "body is too long (over 10,000 characters)")
                        .with_value(format!("{} characters", char_count)),
                );
            }
        }

        Ok(errors)
    }
}

/// Validates batches and accumulates errors across one job
///
/// Accepted records come back mutated: missing ids generated, timestamps
/// stamped. Errors pile up in `pending` until the pipeline drains them
/// into the job registry at the next flush.
pub struct BatchValidator {
    validator: RecordValidator,
    pending: Vec<ValidationError>,
    total_errors: u64,
}

impl BatchValidator {
    pub fn new(store: DynStore) -> Self {
        Self {
            validator: RecordValidator::new(store),
            pending: Vec::new(),
            total_errors: 0,
        }
    }

    /// Validate a batch of `(row, user)` pairs, returning accepted users
    pub async fn validate_users(
        &mut self,
        batch: Vec<(u64, User)>,
    ) -> StoreResult<Vec<User>> {
        let mut accepted = Vec::with_capacity(batch.len());
        for (row, mut user) in batch {
            let errors = self.validator.validate_user(&user, row).await?;
            if errors.is_empty() {
                user.ensure_id();
                user.touch_timestamps();
                accepted.push(user);
            } else {
                self.record(errors);
            }
        }
        Ok(accepted)
    }

    pub async fn validate_articles(
        &mut self,
        batch: Vec<(u64, Article)>,
    ) -> StoreResult<Vec<Article>> {
        let mut accepted = Vec::with_capacity(batch.len());
        for (row, mut article) in batch {
            let errors = self.validator.validate_article(&mut article, row).await?;
            if errors.is_empty() {
                article.ensure_id();
                article.touch_timestamps();
                accepted.push(article);
            } else {
                self.record(errors);
            }
        }
        Ok(accepted)
    }

    pub async fn validate_comments(
        &mut self,
        batch: Vec<(u64, Comment)>,
    ) -> StoreResult<Vec<Comment>> {
        let mut accepted = Vec::with_capacity(batch.len());
        for (row, mut comment) in batch {
            let errors = self.validator.validate_comment(&comment, row).await?;
            if errors.is_empty() {
                comment.ensure_id();
                comment.touch_timestamps();
                accepted.push(comment);
            } else {
                self.record(errors);
            }
        }
        Ok(accepted)
    }

    fn record(&mut self, errors: Vec<ValidationError>) {
        self.total_errors += errors.len() as u64;
        self.pending.extend(errors);
    }

    /// Errors accumulated since the last drain
    pub fn drain_pending(&mut self) -> Vec<ValidationError> {
        std::mem::take(&mut self.pending)
    }

    /// Total errors observed over the lifetime of this job
    pub fn total_errors(&self) -> u64 {
        self.total_errors
    }
}
