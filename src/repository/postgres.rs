use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction, query_builder::QueryBuilder};
use std::collections::HashMap;
use uuid::Uuid;

use super::{RepoError, RepoResult, Repository};
use crate::{
    filters::{ListingFilter, PageRequest, UserFilter},
    images::{self, NewImage},
    models::{
        Category, Listing, ListingChanges, ListingImage, ListingRecord, ListingStatus,
        ListingUpdateOutcome, ModerationRecord, NewCategory, NewListing, NewUser, ProfileChanges,
        ProfileUpdateOutcome, User, UserCredentials,
    },
    policy::VisibilityScope,
};

const USER_COLUMNS: &str =
    "id, username, email, first_name, last_name, phone, avatar_key, is_staff, is_moderator, is_active, date_joined";
const CATEGORY_COLUMNS: &str = "id, name, slug, created_at";
const LISTING_COLUMNS: &str = "id, title, description, price, category_id, author_id, status, author_phone, author_email, created_at, updated_at";
const IMAGE_COLUMNS: &str = "id, listing_id, image_key, sort_order, uploaded_at";
const MODERATION_COLUMNS: &str = "id, listing_id, moderator_id, from_status, to_status, created_at";

type Tx = Transaction<'static, Postgres>;

/// Escapes LIKE metacharacters so user input only ever matches literally.
fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

/// Appends the visibility scope and the field filters as parameterized WHERE conditions.
fn push_conditions(builder: &mut QueryBuilder<'_, Postgres>, scope: VisibilityScope, filter: &ListingFilter) {
    builder.push(" WHERE TRUE");
    match scope {
        VisibilityScope::Everything => {}
        VisibilityScope::ApprovedOnly => {
            builder.push(" AND status = ");
            builder.push_bind(ListingStatus::Approved);
        }
        VisibilityScope::ApprovedOrAuthoredBy(viewer) => {
            builder.push(" AND (status = ");
            builder.push_bind(ListingStatus::Approved);
            builder.push(" OR author_id = ");
            builder.push_bind(viewer);
            builder.push(")");
        }
    }
    if let Some(term) = filter.search_term() {
        let pattern = like_pattern(term);
        builder.push(" AND (title ILIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" OR description ILIKE ");
        builder.push_bind(pattern);
        builder.push(")");
    }
    if let Some(category_id) = filter.category_id {
        builder.push(" AND category_id = ");
        builder.push_bind(category_id);
    }
    if let Some(min) = filter.min_price {
        builder.push(" AND price >= ");
        builder.push_bind(min);
    }
    if let Some(max) = filter.max_price {
        builder.push(" AND price <= ");
        builder.push_bind(max);
    }
    if let Some(status) = filter.status {
        builder.push(" AND status = ");
        builder.push_bind(status);
    }
    if let Some(author_id) = filter.author_id {
        builder.push(" AND author_id = ");
        builder.push_bind(author_id);
    }
}

fn push_user_conditions(builder: &mut QueryBuilder<'_, Postgres>, filter: &UserFilter) {
    builder.push(" WHERE TRUE");
    if let Some(term) = filter.search_term() {
        let pattern = like_pattern(term);
        builder.push(" AND (username ILIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" OR email ILIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" OR first_name ILIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" OR last_name ILIKE ");
        builder.push_bind(pattern);
        builder.push(")");
    }
}

/// PostgresRepository
///
/// The `Repository` implementation backed by PostgreSQL. Every multi-statement write runs in one
/// transaction with a bounded `lock_timeout`.
pub struct PostgresRepository {
    pool: PgPool,
    lock_timeout_ms: u64,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool, lock_timeout_ms: u64) -> Self {
        Self { pool, lock_timeout_ms }
    }

    async fn begin(&self) -> RepoResult<Tx> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout_ms))
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    /// Loads images for a set of listings, grouped by listing and already sorted.
    async fn images_for<'e, E>(executor: E, listing_ids: &[Uuid]) -> RepoResult<HashMap<Uuid, Vec<ListingImage>>>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        if listing_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query_as::<_, ListingImage>(&format!(
            "SELECT {IMAGE_COLUMNS} FROM listing_images WHERE listing_id = ANY($1) ORDER BY sort_order ASC, uploaded_at ASC"
        ))
        .bind(listing_ids)
        .fetch_all(executor)
        .await?;

        let mut grouped: HashMap<Uuid, Vec<ListingImage>> = HashMap::new();
        for image in rows {
            grouped.entry(image.listing_id).or_default().push(image);
        }
        Ok(grouped)
    }

    async fn lock_listing(tx: &mut Tx, id: Uuid) -> RepoResult<Listing> {
        sqlx::query_as::<_, Listing>(&format!("SELECT {LISTING_COLUMNS} FROM listings WHERE id = $1 FOR UPDATE"))
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or(RepoError::NotFound)
    }

    /// Takes a share lock on the category so it cannot be deleted before the commit.
    async fn require_category(tx: &mut Tx, id: Uuid) -> RepoResult<()> {
        sqlx::query_scalar::<_, Uuid>("SELECT id FROM categories WHERE id = $1 FOR SHARE")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?
            .map(|_| ())
            .ok_or(RepoError::UnknownCategory)
    }

    async fn insert_images(tx: &mut Tx, listing_id: Uuid, planned: &[NewImage]) -> RepoResult<()> {
        for image in planned {
            sqlx::query(
                "INSERT INTO listing_images (id, listing_id, image_key, sort_order, uploaded_at) VALUES ($1, $2, $3, $4, clock_timestamp())",
            )
            .bind(Uuid::new_v4())
            .bind(listing_id)
            .bind(&image.key)
            .bind(image.order)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    async fn load_record(tx: &mut Tx, listing: Listing) -> RepoResult<ListingRecord> {
        let mut grouped = Self::images_for(&mut **tx, &[listing.id]).await?;
        let images = grouped.remove(&listing.id).unwrap_or_default();
        Ok(ListingRecord { listing, images })
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    // --- IDENTITY ---

    async fn create_user(&self, user: NewUser) -> RepoResult<User> {
        let created = sqlx::query_as::<_, User>(&format!(
            r#"INSERT INTO users (id, username, email, password_hash, first_name, last_name, phone, is_staff, is_moderator, is_active, date_joined)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, true, NOW())
               RETURNING {USER_COLUMNS}"#
        ))
        .bind(Uuid::new_v4())
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.phone)
        .bind(user.roles.is_staff)
        .bind(user.roles.is_moderator)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn get_user(&self, id: Uuid) -> RepoResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn get_credentials(&self, username: &str) -> RepoResult<Option<UserCredentials>> {
        let credentials = sqlx::query_as::<_, UserCredentials>(&format!(
            "SELECT {USER_COLUMNS}, password_hash FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(credentials)
    }

    async fn username_exists(&self, username: &str) -> RepoResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE username = $1)")
            .bind(username)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn email_exists(&self, email: &str, except: Option<Uuid>) -> RepoResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM users WHERE lower(email) = lower($1) AND ($2::uuid IS NULL OR id <> $2))",
        )
        .bind(email)
        .bind(except)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn search_users(&self, filter: &UserFilter, page: PageRequest) -> RepoResult<(Vec<User>, i64)> {
        let mut count_query: QueryBuilder<Postgres> = QueryBuilder::new("SELECT COUNT(*) FROM users");
        push_user_conditions(&mut count_query, filter);
        let total: i64 = count_query.build_query_scalar().fetch_one(&self.pool).await?;

        let mut page_query: QueryBuilder<Postgres> = QueryBuilder::new(format!("SELECT {USER_COLUMNS} FROM users"));
        push_user_conditions(&mut page_query, filter);
        page_query.push(" ORDER BY ");
        page_query.push(filter.ordering.sql());
        page_query.push(" LIMIT ");
        page_query.push_bind(page.limit());
        page_query.push(" OFFSET ");
        page_query.push_bind(page.offset());
        let users: Vec<User> = page_query.build_query_as().fetch_all(&self.pool).await?;
        Ok((users, total))
    }

    /// update_profile
    ///
    /// COALESCE keeps untouched columns; phone and avatar use explicit flags because `None` may
    /// mean "clear it". The row is locked first so the replaced avatar key is the one this update
    /// actually overwrote.
    async fn update_profile(&self, id: Uuid, changes: ProfileChanges) -> RepoResult<ProfileUpdateOutcome> {
        let mut tx = self.begin().await?;
        let previous_avatar = sqlx::query_scalar::<_, Option<String>>("SELECT avatar_key FROM users WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(RepoError::NotFound)?;

        let set_phone = changes.phone.is_some();
        let set_avatar = changes.avatar_key.is_some();
        let new_avatar = changes.avatar_key.flatten();
        let user = sqlx::query_as::<_, User>(&format!(
            r#"UPDATE users
               SET first_name = COALESCE($2, first_name),
                   last_name = COALESCE($3, last_name),
                   phone = CASE WHEN $4 THEN $5 ELSE phone END,
                   email = COALESCE($6, email),
                   avatar_key = CASE WHEN $7 THEN $8 ELSE avatar_key END
               WHERE id = $1
               RETURNING {USER_COLUMNS}"#
        ))
        .bind(id)
        .bind(changes.first_name)
        .bind(changes.last_name)
        .bind(set_phone)
        .bind(changes.phone.flatten())
        .bind(changes.email)
        .bind(set_avatar)
        .bind(new_avatar.clone())
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        let removed_avatar = previous_avatar.filter(|old| set_avatar && new_avatar.as_deref() != Some(old.as_str()));
        Ok(ProfileUpdateOutcome { user, removed_avatar })
    }

    async fn set_user_active(&self, id: Uuid, is_active: bool) -> RepoResult<User> {
        sqlx::query_as::<_, User>(&format!("UPDATE users SET is_active = $2 WHERE id = $1 RETURNING {USER_COLUMNS}"))
            .bind(id)
            .bind(is_active)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RepoError::NotFound)
    }

    /// delete_user
    ///
    /// Explicit cascade: images, then listings, then the user. The avatar key joins the returned
    /// blob keys. Moderation records written by the
    /// user keep their row with `moderator_id` cleared.
    async fn delete_user(&self, id: Uuid) -> RepoResult<Vec<String>> {
        let mut tx = self.begin().await?;
        let avatar = sqlx::query_scalar::<_, Option<String>>("SELECT avatar_key FROM users WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(RepoError::NotFound)?;

        let mut keys = sqlx::query_scalar::<_, String>(
            "DELETE FROM listing_images WHERE listing_id IN (SELECT id FROM listings WHERE author_id = $1) RETURNING image_key",
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM listings WHERE author_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE moderation_log SET moderator_id = NULL WHERE moderator_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        keys.extend(avatar);
        Ok(keys)
    }

    async fn count_approved_listings(&self, author_id: Uuid) -> RepoResult<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM listings WHERE author_id = $1 AND status = $2")
            .bind(author_id)
            .bind(ListingStatus::Approved)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // --- CATEGORIES ---

    async fn list_categories(&self) -> RepoResult<Vec<Category>> {
        let categories = sqlx::query_as::<_, Category>(&format!("SELECT {CATEGORY_COLUMNS} FROM categories ORDER BY name ASC"))
            .fetch_all(&self.pool)
            .await?;
        Ok(categories)
    }

    async fn get_category(&self, id: Uuid) -> RepoResult<Option<Category>> {
        let category = sqlx::query_as::<_, Category>(&format!("SELECT {CATEGORY_COLUMNS} FROM categories WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(category)
    }

    async fn create_category(&self, category: NewCategory) -> RepoResult<Category> {
        let created = sqlx::query_as::<_, Category>(&format!(
            "INSERT INTO categories (id, name, slug, created_at) VALUES ($1, $2, $3, NOW()) RETURNING {CATEGORY_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&category.name)
        .bind(&category.slug)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn ensure_category(&self, category: NewCategory) -> RepoResult<(Category, bool)> {
        let inserted = sqlx::query_as::<_, Category>(&format!(
            "INSERT INTO categories (id, name, slug, created_at) VALUES ($1, $2, $3, NOW()) ON CONFLICT (slug) DO NOTHING RETURNING {CATEGORY_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&category.name)
        .bind(&category.slug)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(created) = inserted {
            return Ok((created, true));
        }
        let existing = sqlx::query_as::<_, Category>(&format!("SELECT {CATEGORY_COLUMNS} FROM categories WHERE slug = $1"))
            .bind(&category.slug)
            .fetch_one(&self.pool)
            .await?;
        Ok((existing, false))
    }

    async fn delete_category(&self, id: Uuid) -> RepoResult<()> {
        let mut tx = self.begin().await?;
        sqlx::query_scalar::<_, Uuid>("SELECT id FROM categories WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(RepoError::NotFound)?;
        let referenced = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM listings WHERE category_id = $1)")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        if referenced {
            return Err(RepoError::Protected(
                "category is referenced by existing listings".to_string(),
            ));
        }
        sqlx::query("DELETE FROM categories WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    // --- LISTINGS ---

    /// insert_listing
    ///
    /// The listing row and its images are written in one transaction; the image plan is checked
    /// before anything is inserted.
    async fn insert_listing(&self, author_id: Uuid, listing: NewListing) -> RepoResult<ListingRecord> {
        let planned = images::plan_initial(&listing.image_keys)?;
        let mut tx = self.begin().await?;
        Self::require_category(&mut tx, listing.category_id).await?;

        let created = sqlx::query_as::<_, Listing>(&format!(
            r#"INSERT INTO listings (id, title, description, price, category_id, author_id, status, author_phone, author_email, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW(), NOW())
               RETURNING {LISTING_COLUMNS}"#
        ))
        .bind(Uuid::new_v4())
        .bind(&listing.title)
        .bind(&listing.description)
        .bind(listing.price)
        .bind(listing.category_id)
        .bind(author_id)
        .bind(ListingStatus::Pending)
        .bind(&listing.author_phone)
        .bind(&listing.author_email)
        .fetch_one(&mut *tx)
        .await?;

        Self::insert_images(&mut tx, created.id, &planned).await?;
        let record = Self::load_record(&mut tx, created).await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn get_listing(&self, id: Uuid) -> RepoResult<Option<ListingRecord>> {
        let Some(listing) = sqlx::query_as::<_, Listing>(&format!("SELECT {LISTING_COLUMNS} FROM listings WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };
        let mut grouped = Self::images_for(&self.pool, &[listing.id]).await?;
        let images = grouped.remove(&listing.id).unwrap_or_default();
        Ok(Some(ListingRecord { listing, images }))
    }

    /// search_listings
    ///
    /// The visibility scope becomes part of the WHERE clause, so the count and the page are both
    /// computed over visible rows only.
    async fn search_listings(
        &self,
        scope: VisibilityScope,
        filter: &ListingFilter,
        page: PageRequest,
    ) -> RepoResult<(Vec<ListingRecord>, i64)> {
        let mut count_query: QueryBuilder<Postgres> = QueryBuilder::new("SELECT COUNT(*) FROM listings");
        push_conditions(&mut count_query, scope, filter);
        let total: i64 = count_query.build_query_scalar().fetch_one(&self.pool).await?;

        let mut page_query: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {LISTING_COLUMNS} FROM listings"));
        push_conditions(&mut page_query, scope, filter);
        page_query.push(" ORDER BY ");
        page_query.push(filter.ordering.sql());
        page_query.push(" LIMIT ");
        page_query.push_bind(page.limit());
        page_query.push(" OFFSET ");
        page_query.push_bind(page.offset());
        let listings: Vec<Listing> = page_query.build_query_as().fetch_all(&self.pool).await?;

        let ids: Vec<Uuid> = listings.iter().map(|l| l.id).collect();
        let mut grouped = Self::images_for(&self.pool, &ids).await?;
        let records = listings
            .into_iter()
            .map(|listing| {
                let images = grouped.remove(&listing.id).unwrap_or_default();
                ListingRecord { listing, images }
            })
            .collect();
        Ok((records, total))
    }

    /// update_listing
    ///
    /// Locks the listing row, re-reads the image set under the lock and plans against it, so two
    /// concurrent updates can never push the image count past the cap.
    async fn update_listing(&self, id: Uuid, author_id: Uuid, changes: ListingChanges) -> RepoResult<ListingUpdateOutcome> {
        let mut tx = self.begin().await?;
        let current = Self::lock_listing(&mut tx, id).await?;
        if current.author_id != author_id {
            return Err(RepoError::Forbidden);
        }
        if let Some(category_id) = changes.category_id {
            Self::require_category(&mut tx, category_id).await?;
        }

        let existing = Self::images_for(&mut *tx, &[id]).await?.remove(&id).unwrap_or_default();
        let plan = images::plan_update(&existing, &changes.delete_image_ids, &changes.new_image_keys)?;

        if !plan.delete.is_empty() {
            sqlx::query("DELETE FROM listing_images WHERE listing_id = $1 AND id = ANY($2)")
                .bind(id)
                .bind(&plan.delete)
                .execute(&mut *tx)
                .await?;
        }
        Self::insert_images(&mut tx, id, &plan.insert).await?;

        let updated = sqlx::query_as::<_, Listing>(&format!(
            r#"UPDATE listings
               SET title = COALESCE($2, title),
                   description = COALESCE($3, description),
                   price = COALESCE($4, price),
                   category_id = COALESCE($5, category_id),
                   author_phone = COALESCE($6, author_phone),
                   author_email = COALESCE($7, author_email),
                   status = $8,
                   updated_at = NOW()
               WHERE id = $1
               RETURNING {LISTING_COLUMNS}"#
        ))
        .bind(id)
        .bind(changes.title)
        .bind(changes.description)
        .bind(changes.price)
        .bind(changes.category_id)
        .bind(changes.author_phone)
        .bind(changes.author_email)
        .bind(ListingStatus::Pending)
        .fetch_one(&mut *tx)
        .await?;

        let record = Self::load_record(&mut tx, updated).await?;
        tx.commit().await?;
        Ok(ListingUpdateOutcome {
            record,
            removed_keys: plan.removed_keys,
        })
    }

    async fn delete_listing(&self, id: Uuid, author_id: Uuid) -> RepoResult<Vec<String>> {
        let mut tx = self.begin().await?;
        let current = Self::lock_listing(&mut tx, id).await?;
        if current.author_id != author_id {
            return Err(RepoError::Forbidden);
        }
        let keys = sqlx::query_scalar::<_, String>("DELETE FROM listing_images WHERE listing_id = $1 RETURNING image_key")
            .bind(id)
            .fetch_all(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM listings WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(keys)
    }

    // --- MODERATION ---

    async fn set_listing_status(&self, id: Uuid, moderator_id: Uuid, status: ListingStatus) -> RepoResult<ListingRecord> {
        let mut tx = self.begin().await?;
        let current = Self::lock_listing(&mut tx, id).await?;
        let updated = sqlx::query_as::<_, Listing>(&format!(
            "UPDATE listings SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING {LISTING_COLUMNS}"
        ))
        .bind(id)
        .bind(status)
        .fetch_one(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO moderation_log (id, listing_id, moderator_id, from_status, to_status, created_at) VALUES ($1, $2, $3, $4, $5, clock_timestamp())",
        )
        .bind(Uuid::new_v4())
        .bind(id)
        .bind(moderator_id)
        .bind(current.status)
        .bind(status)
        .execute(&mut *tx)
        .await?;
        let record = Self::load_record(&mut tx, updated).await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn moderation_history(&self, listing_id: Uuid) -> RepoResult<Vec<ModerationRecord>> {
        let records = sqlx::query_as::<_, ModerationRecord>(&format!(
            "SELECT {MODERATION_COLUMNS} FROM moderation_log WHERE listing_id = $1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(listing_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }
}
