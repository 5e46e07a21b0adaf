use async_trait::async_trait;
use chrono::Utc;
use std::{cmp::Ordering, collections::HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{RepoError, RepoResult, Repository};
use crate::{
    filters::{ListingFilter, ListingOrdering, PageRequest, UserFilter, UserOrdering},
    images::{self, NewImage},
    models::{
        Category, Listing, ListingChanges, ListingImage, ListingRecord, ListingStatus,
        ListingUpdateOutcome, ModerationRecord, NewCategory, NewListing, NewUser, ProfileChanges,
        ProfileUpdateOutcome, User, UserCredentials,
    },
    policy::VisibilityScope,
};

#[derive(Default)]
struct Store {
    users: HashMap<Uuid, UserCredentials>,
    categories: HashMap<Uuid, Category>,
    listings: HashMap<Uuid, Listing>,
    images: HashMap<Uuid, ListingImage>,
    moderation: Vec<ModerationRecord>,
}

impl Store {
    fn record(&self, listing: &Listing) -> ListingRecord {
        let mut images: Vec<ListingImage> = self
            .images
            .values()
            .filter(|image| image.listing_id == listing.id)
            .cloned()
            .collect();
        images::sort_images(&mut images);
        ListingRecord {
            listing: listing.clone(),
            images,
        }
    }

    fn insert_images(&mut self, listing_id: Uuid, planned: Vec<NewImage>) {
        for image in planned {
            let id = Uuid::new_v4();
            self.images.insert(
                id,
                ListingImage {
                    id,
                    listing_id,
                    image_key: image.key,
                    order: image.order,
                    uploaded_at: Utc::now(),
                },
            );
        }
    }

    /// Removes every image of the listing and returns their blob keys.
    fn drop_images_of(&mut self, listing_id: Uuid) -> Vec<String> {
        let ids: Vec<Uuid> = self
            .images
            .values()
            .filter(|image| image.listing_id == listing_id)
            .map(|image| image.id)
            .collect();
        ids.into_iter()
            .filter_map(|id| self.images.remove(&id))
            .map(|image| image.image_key)
            .collect()
    }

    /// Mirrors the unique constraint on `listing_images.image_key`.
    fn check_keys_free(&self, planned: &[NewImage]) -> RepoResult<()> {
        let taken = planned
            .iter()
            .any(|new| self.images.values().any(|image| image.image_key == new.key));
        if taken {
            return Err(RepoError::Duplicate("image_key".to_string()));
        }
        Ok(())
    }

    fn email_taken(&self, email: &str, except: Option<Uuid>) -> bool {
        self.users
            .values()
            .any(|c| Some(c.user.id) != except && c.user.email.eq_ignore_ascii_case(email))
    }
}

fn compare_users(ordering: UserOrdering, a: &User, b: &User) -> Ordering {
    match ordering {
        UserOrdering::JoinedAsc => a.date_joined.cmp(&b.date_joined).then(a.id.cmp(&b.id)),
        UserOrdering::JoinedDesc => b.date_joined.cmp(&a.date_joined).then(b.id.cmp(&a.id)),
        UserOrdering::UsernameAsc => a.username.cmp(&b.username).then(a.id.cmp(&b.id)),
        UserOrdering::UsernameDesc => b.username.cmp(&a.username).then(b.id.cmp(&a.id)),
    }
}

fn compare(ordering: ListingOrdering, a: &Listing, b: &Listing) -> Ordering {
    match ordering {
        ListingOrdering::CreatedAsc => a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)),
        ListingOrdering::CreatedDesc => b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)),
        ListingOrdering::PriceAsc => a.price.cmp(&b.price).then(a.id.cmp(&b.id)),
        ListingOrdering::PriceDesc => b.price.cmp(&a.price).then(b.id.cmp(&a.id)),
    }
}

/// InMemoryRepository
///
/// A `Repository` held entirely in process memory. A single `RwLock` serializes every write, which
/// gives each operation the same all-or-nothing behaviour as a Postgres transaction. Used by the
/// test suite and for running the API without a database.
#[derive(Default)]
pub struct InMemoryRepository {
    store: RwLock<Store>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn create_user(&self, user: NewUser) -> RepoResult<User> {
        let mut store = self.store.write().await;
        if store.users.values().any(|c| c.user.username == user.username) {
            return Err(RepoError::Duplicate("username".to_string()));
        }
        if store.email_taken(&user.email, None) {
            return Err(RepoError::Duplicate("email".to_string()));
        }
        let created = User {
            id: Uuid::new_v4(),
            username: user.username,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            phone: user.phone,
            avatar_key: None,
            is_staff: user.roles.is_staff,
            is_moderator: user.roles.is_moderator,
            is_active: true,
            date_joined: Utc::now(),
        };
        store.users.insert(
            created.id,
            UserCredentials {
                user: created.clone(),
                password_hash: user.password_hash,
            },
        );
        Ok(created)
    }

    async fn get_user(&self, id: Uuid) -> RepoResult<Option<User>> {
        Ok(self.store.read().await.users.get(&id).map(|c| c.user.clone()))
    }

    async fn get_credentials(&self, username: &str) -> RepoResult<Option<UserCredentials>> {
        let store = self.store.read().await;
        Ok(store.users.values().find(|c| c.user.username == username).cloned())
    }

    async fn username_exists(&self, username: &str) -> RepoResult<bool> {
        let store = self.store.read().await;
        Ok(store.users.values().any(|c| c.user.username == username))
    }

    async fn email_exists(&self, email: &str, except: Option<Uuid>) -> RepoResult<bool> {
        Ok(self.store.read().await.email_taken(email, except))
    }

    async fn search_users(&self, filter: &UserFilter, page: PageRequest) -> RepoResult<(Vec<User>, i64)> {
        let store = self.store.read().await;
        let mut matched: Vec<&User> = store
            .users
            .values()
            .map(|c| &c.user)
            .filter(|u| filter.matches(u))
            .collect();
        matched.sort_by(|a, b| compare_users(filter.ordering, a, b));
        let total = i64::try_from(matched.len()).unwrap_or(i64::MAX);
        let offset = usize::try_from(page.offset()).unwrap_or(usize::MAX);
        let limit = usize::try_from(page.limit()).unwrap_or(usize::MAX);
        Ok((matched.into_iter().skip(offset).take(limit).cloned().collect(), total))
    }

    async fn update_profile(&self, id: Uuid, changes: ProfileChanges) -> RepoResult<ProfileUpdateOutcome> {
        let mut store = self.store.write().await;
        if let Some(email) = &changes.email {
            if store.email_taken(email, Some(id)) {
                return Err(RepoError::Duplicate("email".to_string()));
            }
        }
        let credentials = store.users.get_mut(&id).ok_or(RepoError::NotFound)?;
        let user = &mut credentials.user;
        if let Some(first_name) = changes.first_name {
            user.first_name = first_name;
        }
        if let Some(last_name) = changes.last_name {
            user.last_name = last_name;
        }
        if let Some(phone) = changes.phone {
            user.phone = phone;
        }
        if let Some(email) = changes.email {
            user.email = email;
        }
        let mut removed_avatar = None;
        if let Some(avatar_key) = changes.avatar_key {
            if user.avatar_key != avatar_key {
                removed_avatar = std::mem::replace(&mut user.avatar_key, avatar_key);
            }
        }
        Ok(ProfileUpdateOutcome {
            user: user.clone(),
            removed_avatar,
        })
    }

    async fn set_user_active(&self, id: Uuid, is_active: bool) -> RepoResult<User> {
        let mut store = self.store.write().await;
        let credentials = store.users.get_mut(&id).ok_or(RepoError::NotFound)?;
        credentials.user.is_active = is_active;
        Ok(credentials.user.clone())
    }

    async fn delete_user(&self, id: Uuid) -> RepoResult<Vec<String>> {
        let mut store = self.store.write().await;
        if !store.users.contains_key(&id) {
            return Err(RepoError::NotFound);
        }
        let owned: Vec<Uuid> = store
            .listings
            .values()
            .filter(|l| l.author_id == id)
            .map(|l| l.id)
            .collect();
        let mut keys = Vec::new();
        for listing_id in owned {
            keys.extend(store.drop_images_of(listing_id));
            store.listings.remove(&listing_id);
            store.moderation.retain(|r| r.listing_id != listing_id);
        }
        for record in store.moderation.iter_mut().filter(|r| r.moderator_id == Some(id)) {
            record.moderator_id = None;
        }
        if let Some(credentials) = store.users.remove(&id) {
            keys.extend(credentials.user.avatar_key);
        }
        Ok(keys)
    }

    async fn count_approved_listings(&self, author_id: Uuid) -> RepoResult<i64> {
        let store = self.store.read().await;
        let count = store
            .listings
            .values()
            .filter(|l| l.author_id == author_id && l.status == ListingStatus::Approved)
            .count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    async fn list_categories(&self) -> RepoResult<Vec<Category>> {
        let mut categories: Vec<Category> = self.store.read().await.categories.values().cloned().collect();
        categories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(categories)
    }

    async fn get_category(&self, id: Uuid) -> RepoResult<Option<Category>> {
        Ok(self.store.read().await.categories.get(&id).cloned())
    }

    async fn create_category(&self, category: NewCategory) -> RepoResult<Category> {
        let mut store = self.store.write().await;
        if store.categories.values().any(|c| c.slug == category.slug) {
            return Err(RepoError::Duplicate("slug".to_string()));
        }
        let created = Category {
            id: Uuid::new_v4(),
            name: category.name,
            slug: category.slug,
            created_at: Utc::now(),
        };
        store.categories.insert(created.id, created.clone());
        Ok(created)
    }

    async fn ensure_category(&self, category: NewCategory) -> RepoResult<(Category, bool)> {
        let mut store = self.store.write().await;
        if let Some(existing) = store.categories.values().find(|c| c.slug == category.slug) {
            return Ok((existing.clone(), false));
        }
        let created = Category {
            id: Uuid::new_v4(),
            name: category.name,
            slug: category.slug,
            created_at: Utc::now(),
        };
        store.categories.insert(created.id, created.clone());
        Ok((created, true))
    }

    async fn delete_category(&self, id: Uuid) -> RepoResult<()> {
        let mut store = self.store.write().await;
        if !store.categories.contains_key(&id) {
            return Err(RepoError::NotFound);
        }
        if store.listings.values().any(|l| l.category_id == id) {
            return Err(RepoError::Protected(
                "category is referenced by existing listings".to_string(),
            ));
        }
        store.categories.remove(&id);
        Ok(())
    }

    async fn insert_listing(&self, author_id: Uuid, listing: NewListing) -> RepoResult<ListingRecord> {
        let planned = images::plan_initial(&listing.image_keys)?;
        let mut store = self.store.write().await;
        if !store.categories.contains_key(&listing.category_id) {
            return Err(RepoError::UnknownCategory);
        }
        if !store.users.contains_key(&author_id) {
            return Err(RepoError::NotFound);
        }
        store.check_keys_free(&planned)?;
        let now = Utc::now();
        let created = Listing {
            id: Uuid::new_v4(),
            title: listing.title,
            description: listing.description,
            price: listing.price,
            category_id: listing.category_id,
            author_id,
            status: ListingStatus::Pending,
            author_phone: listing.author_phone,
            author_email: listing.author_email,
            created_at: now,
            updated_at: now,
        };
        store.listings.insert(created.id, created.clone());
        store.insert_images(created.id, planned);
        Ok(store.record(&created))
    }

    async fn get_listing(&self, id: Uuid) -> RepoResult<Option<ListingRecord>> {
        let store = self.store.read().await;
        Ok(store.listings.get(&id).map(|l| store.record(l)))
    }

    async fn search_listings(
        &self,
        scope: VisibilityScope,
        filter: &ListingFilter,
        page: PageRequest,
    ) -> RepoResult<(Vec<ListingRecord>, i64)> {
        let store = self.store.read().await;
        let mut matched: Vec<&Listing> = store
            .listings
            .values()
            .filter(|l| scope.admits(l) && filter.matches_fields(l))
            .collect();
        matched.sort_by(|a, b| compare(filter.ordering, a, b));
        let total = i64::try_from(matched.len()).unwrap_or(i64::MAX);
        let offset = usize::try_from(page.offset()).unwrap_or(usize::MAX);
        let limit = usize::try_from(page.limit()).unwrap_or(usize::MAX);
        let records = matched
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|l| store.record(l))
            .collect();
        Ok((records, total))
    }

    async fn update_listing(&self, id: Uuid, author_id: Uuid, changes: ListingChanges) -> RepoResult<ListingUpdateOutcome> {
        let mut store = self.store.write().await;
        let current = store.listings.get(&id).ok_or(RepoError::NotFound)?.clone();
        if current.author_id != author_id {
            return Err(RepoError::Forbidden);
        }
        if let Some(category_id) = changes.category_id {
            if !store.categories.contains_key(&category_id) {
                return Err(RepoError::UnknownCategory);
            }
        }
        let existing = store.record(&current).images;
        let plan = images::plan_update(&existing, &changes.delete_image_ids, &changes.new_image_keys)?;
        store.check_keys_free(&plan.insert)?;

        for image_id in &plan.delete {
            store.images.remove(image_id);
        }
        store.insert_images(id, plan.insert);

        let mut updated = current;
        if let Some(title) = changes.title {
            updated.title = title;
        }
        if let Some(description) = changes.description {
            updated.description = description;
        }
        if let Some(price) = changes.price {
            updated.price = price;
        }
        if let Some(category_id) = changes.category_id {
            updated.category_id = category_id;
        }
        if let Some(phone) = changes.author_phone {
            updated.author_phone = phone;
        }
        if let Some(email) = changes.author_email {
            updated.author_email = email;
        }
        updated.status = ListingStatus::Pending;
        updated.updated_at = Utc::now();
        store.listings.insert(id, updated.clone());

        Ok(ListingUpdateOutcome {
            record: store.record(&updated),
            removed_keys: plan.removed_keys,
        })
    }

    async fn delete_listing(&self, id: Uuid, author_id: Uuid) -> RepoResult<Vec<String>> {
        let mut store = self.store.write().await;
        let current = store.listings.get(&id).ok_or(RepoError::NotFound)?;
        if current.author_id != author_id {
            return Err(RepoError::Forbidden);
        }
        let keys = store.drop_images_of(id);
        store.listings.remove(&id);
        store.moderation.retain(|r| r.listing_id != id);
        Ok(keys)
    }

    async fn set_listing_status(&self, id: Uuid, moderator_id: Uuid, status: ListingStatus) -> RepoResult<ListingRecord> {
        let mut store = self.store.write().await;
        let listing = store.listings.get_mut(&id).ok_or(RepoError::NotFound)?;
        let from_status = listing.status;
        listing.status = status;
        listing.updated_at = Utc::now();
        let updated = listing.clone();
        store.moderation.push(ModerationRecord {
            id: Uuid::new_v4(),
            listing_id: id,
            moderator_id: Some(moderator_id),
            from_status,
            to_status: status,
            created_at: Utc::now(),
        });
        Ok(store.record(&updated))
    }

    async fn moderation_history(&self, listing_id: Uuid) -> RepoResult<Vec<ModerationRecord>> {
        let store = self.store.read().await;
        // Appended in commit order, so reversing yields newest first.
        Ok(store
            .moderation
            .iter()
            .rev()
            .filter(|r| r.listing_id == listing_id)
            .cloned()
            .collect())
    }
}
