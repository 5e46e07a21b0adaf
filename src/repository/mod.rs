use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    filters::{ListingFilter, PageRequest, UserFilter},
    models::{
        Category, ListingChanges, ListingRecord, ListingStatus, ListingUpdateOutcome,
        ModerationRecord, NewCategory, NewListing, NewUser, ProfileChanges, ProfileUpdateOutcome,
        User, UserCredentials,
    },
    policy::VisibilityScope,
};

mod memory;
mod postgres;

pub use memory::InMemoryRepository;
pub use postgres::PostgresRepository;

/// RepoError
///
/// Datastore-level failures. Every write either commits in full or returns one of these with
/// nothing persisted.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("record not found")]
    NotFound,
    #[error("only the author may change this listing")]
    Forbidden,
    #[error("a listing may have at most {max} images, this change would leave {resulting}")]
    TooManyImages { resulting: usize, max: usize },
    #[error("image {0} does not belong to this listing")]
    InvalidImage(Uuid),
    #[error("category does not exist")]
    UnknownCategory,
    #[error("{0} is already taken")]
    Duplicate(String),
    #[error("{0}")]
    Protected(String),
    #[error("concurrent modification, retry")]
    Conflict,
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

/// Maps the unique-constraint names of the schema to the field they guard.
fn duplicate_field(constraint: Option<&str>) -> String {
    match constraint {
        Some("users_username_key") => "username",
        Some("users_email_key") => "email",
        Some("categories_slug_key") => "slug",
        Some("listing_images_image_key_key") => "image_key",
        _ => "value",
    }
    .to_string()
}

impl From<sqlx::Error> for RepoError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            match db.code().as_deref() {
                // serialization_failure, deadlock_detected, lock_not_available
                Some("40001" | "40P01" | "55P03") => return RepoError::Conflict,
                Some("23505") => return RepoError::Duplicate(duplicate_field(db.constraint())),
                Some("23503") => {
                    return RepoError::Protected("the record is still referenced".to_string());
                }
                _ => {}
            }
        }
        match err {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            other => RepoError::Database(other),
        }
    }
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository Trait
///
/// The persistence contract shared by the Postgres and in-memory stores. Authorization decisions
/// live in `policy`; the repository only enforces the invariants that must hold under concurrency
/// (author ownership at write time, the image cap, cascade and protect rules).
///
/// **Send + Sync + async_trait** keep `Arc<dyn Repository>` usable across Axum's task boundaries.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Identity ---
    async fn create_user(&self, user: NewUser) -> RepoResult<User>;
    async fn get_user(&self, id: Uuid) -> RepoResult<Option<User>>;
    async fn get_credentials(&self, username: &str) -> RepoResult<Option<UserCredentials>>;
    async fn username_exists(&self, username: &str) -> RepoResult<bool>;
    // Email comparison is case-insensitive; `except` skips the caller's own row.
    async fn email_exists(&self, email: &str, except: Option<Uuid>) -> RepoResult<bool>;
    /// One page of users plus the total number of matches.
    async fn search_users(&self, filter: &UserFilter, page: PageRequest) -> RepoResult<(Vec<User>, i64)>;
    async fn update_profile(&self, id: Uuid, changes: ProfileChanges) -> RepoResult<ProfileUpdateOutcome>;
    async fn set_user_active(&self, id: Uuid, is_active: bool) -> RepoResult<User>;
    /// Deletes the user with their listings and images. Returns the orphaned blob keys, avatar
    /// included.
    async fn delete_user(&self, id: Uuid) -> RepoResult<Vec<String>>;
    async fn count_approved_listings(&self, author_id: Uuid) -> RepoResult<i64>;

    // --- Categories ---
    async fn list_categories(&self) -> RepoResult<Vec<Category>>;
    async fn get_category(&self, id: Uuid) -> RepoResult<Option<Category>>;
    async fn create_category(&self, category: NewCategory) -> RepoResult<Category>;
    /// Get-or-create by slug. The flag is true when a row was inserted.
    async fn ensure_category(&self, category: NewCategory) -> RepoResult<(Category, bool)>;
    /// Fails with `Protected` while any listing references the category.
    async fn delete_category(&self, id: Uuid) -> RepoResult<()>;

    // --- Listings ---
    async fn insert_listing(&self, author_id: Uuid, listing: NewListing) -> RepoResult<ListingRecord>;
    async fn get_listing(&self, id: Uuid) -> RepoResult<Option<ListingRecord>>;
    /// One page of listings admitted by `scope` and `filter`, plus the total match count.
    async fn search_listings(
        &self,
        scope: VisibilityScope,
        filter: &ListingFilter,
        page: PageRequest,
    ) -> RepoResult<(Vec<ListingRecord>, i64)>;
    async fn update_listing(
        &self,
        id: Uuid,
        author_id: Uuid,
        changes: ListingChanges,
    ) -> RepoResult<ListingUpdateOutcome>;
    /// Deletes the listing and its images. Returns the orphaned blob keys.
    async fn delete_listing(&self, id: Uuid, author_id: Uuid) -> RepoResult<Vec<String>>;

    // --- Moderation ---
    /// Sets the status, bumps `updated_at` and appends an audit record in one transaction.
    async fn set_listing_status(
        &self,
        id: Uuid,
        moderator_id: Uuid,
        status: ListingStatus,
    ) -> RepoResult<ListingRecord>;
    /// Audit records of a listing, newest first.
    async fn moderation_history(&self, listing_id: Uuid) -> RepoResult<Vec<ModerationRecord>>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;
