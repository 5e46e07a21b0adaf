//! Listing and image management.
//!
//! Every operation takes the viewer explicitly and asks `policy` before touching the repository.
//! The image cap and author ownership are re-checked by the repository under its row lock.

use uuid::Uuid;

use crate::{
    error::{AppError, ErrorCode, FieldErrors},
    filters::{ListingFilter, PageRequest},
    models::{
        CreateListingRequest, ImageView, ListingChanges, ListingRecord, ListingView, NewListing,
        Page, UpdateListingRequest,
    },
    policy::{self, Viewer},
    repository::Repository,
    images::{self, LISTING_KEY_PREFIX},
    storage::StorageService,
    validation::{self, TITLE_MAX_LEN},
};

/// Projects a stored record into the response shape, resolving image URLs.
pub fn to_view(storage: &dyn StorageService, record: ListingRecord) -> ListingView {
    let images = record
        .images
        .into_iter()
        .map(|image| ImageView {
            url: storage.object_url(&image.image_key),
            id: image.id,
            key: image.image_key,
            order: image.order,
            uploaded_at: image.uploaded_at,
        })
        .collect();
    ListingView {
        listing: record.listing,
        images,
    }
}

/// purge_blobs
///
/// Best-effort removal of orphaned blobs after a committed delete. Failures are logged and
/// otherwise ignored; the database change stands either way.
pub async fn purge_blobs(storage: &dyn StorageService, keys: &[String]) {
    for key in keys {
        if let Err(e) = storage.delete_object(key).await {
            tracing::warn!(key = %key, error = %e, "failed to delete orphaned image blob");
        }
    }
}

/// Image keys must be ones the upload endpoints produced for the listing's author: clean keys
/// under `listings/<author id>/`.
fn validate_image_keys(field: &str, keys: &[String], owner: Uuid, errors: &mut FieldErrors) {
    for key in keys {
        if !images::is_owned_key(LISTING_KEY_PREFIX, owner, key) {
            errors.add(field, ErrorCode::InvalidImage, format!("'{key}' is not one of your uploaded images."));
        }
    }
}

fn validate_contact_phone(raw: &str, errors: &mut FieldErrors) -> String {
    let phone = validation::required_text("author_phone", raw, None, errors);
    if !phone.is_empty() {
        validation::validate_phone("author_phone", &phone, errors);
    }
    phone
}

fn validate_contact_email(raw: &str, errors: &mut FieldErrors) -> String {
    validation::validate_email("author_email", raw, errors);
    raw.trim().to_string()
}

async fn check_category(repo: &dyn Repository, id: Uuid, errors: &mut FieldErrors) -> Result<(), AppError> {
    if repo.get_category(id).await?.is_none() {
        errors.add("category_id", ErrorCode::UnknownCategory, "Category does not exist.");
    }
    Ok(())
}

/// create_listing
///
/// The listing starts as `pending`; images take their submission order.
pub async fn create_listing(
    repo: &dyn Repository,
    storage: &dyn StorageService,
    viewer: &Viewer,
    req: CreateListingRequest,
) -> Result<ListingView, AppError> {
    let author_id = viewer.require_user()?;
    let mut errors = FieldErrors::new();

    let title = validation::required_text("title", &req.title, Some(TITLE_MAX_LEN), &mut errors);
    let description = validation::required_text("description", &req.description, None, &mut errors);
    let price = validation::normalize_price("price", req.price, &mut errors);
    let author_phone = validate_contact_phone(&req.author_phone, &mut errors);
    let author_email = validate_contact_email(&req.author_email, &mut errors);
    validate_image_keys("image_keys", &req.image_keys, author_id, &mut errors);
    check_category(repo, req.category_id, &mut errors).await?;
    errors.into_result()?;

    let record = repo
        .insert_listing(
            author_id,
            NewListing {
                title,
                description,
                price,
                category_id: req.category_id,
                author_phone,
                author_email,
                image_keys: req.image_keys,
            },
        )
        .await?;
    tracing::info!(
        listing_id = %record.listing.id,
        author_id = %author_id,
        images = record.images.len(),
        "listing created"
    );
    Ok(to_view(storage, record))
}

/// get_listing
///
/// Listings the viewer may not see are reported as missing.
pub async fn get_listing(
    repo: &dyn Repository,
    storage: &dyn StorageService,
    viewer: &Viewer,
    id: Uuid,
) -> Result<ListingView, AppError> {
    let record = repo
        .get_listing(id)
        .await?
        .filter(|r| policy::can_view(viewer, &r.listing))
        .ok_or(AppError::NotFound)?;
    Ok(to_view(storage, record))
}

/// list_listings
///
/// The viewer's visibility scope is pushed into the query together with the filter.
pub async fn list_listings(
    repo: &dyn Repository,
    storage: &dyn StorageService,
    viewer: &Viewer,
    filter: &ListingFilter,
    page: PageRequest,
) -> Result<Page<ListingView>, AppError> {
    let scope = policy::visibility_scope(viewer);
    let (records, total) = repo.search_listings(scope, filter, page).await?;
    let views = records.into_iter().map(|r| to_view(storage, r)).collect();
    page.into_page(views, total)
}

/// my_listings
///
/// The caller's own listings in every status, newest first.
pub async fn my_listings(
    repo: &dyn Repository,
    storage: &dyn StorageService,
    viewer: &Viewer,
    page: PageRequest,
) -> Result<Page<ListingView>, AppError> {
    let author_id = viewer.require_user()?;
    let filter = ListingFilter {
        author_id: Some(author_id),
        ..ListingFilter::default()
    };
    list_listings(repo, storage, viewer, &filter, page).await
}

/// update_listing
///
/// Author-only. Any successful update sends the listing back to `pending`. Blobs of deleted
/// images are purged once the change is committed.
pub async fn update_listing(
    repo: &dyn Repository,
    storage: &dyn StorageService,
    viewer: &Viewer,
    id: Uuid,
    req: UpdateListingRequest,
) -> Result<ListingView, AppError> {
    let author_id = viewer.require_user()?;
    let current = repo.get_listing(id).await?.ok_or(AppError::NotFound)?;
    policy::authorize_mutation(viewer, &current.listing)?;

    let mut errors = FieldErrors::new();
    let title = req
        .title
        .map(|v| validation::required_text("title", &v, Some(TITLE_MAX_LEN), &mut errors));
    let description = req
        .description
        .map(|v| validation::required_text("description", &v, None, &mut errors));
    let price = req.price.map(|v| validation::normalize_price("price", v, &mut errors));
    let author_phone = req.author_phone.map(|v| validate_contact_phone(&v, &mut errors));
    let author_email = req.author_email.map(|v| validate_contact_email(&v, &mut errors));
    validate_image_keys(
        "new_image_keys",
        &req.new_image_keys,
        current.listing.author_id,
        &mut errors,
    );
    if let Some(category_id) = req.category_id {
        check_category(repo, category_id, &mut errors).await?;
    }
    errors.into_result()?;

    let outcome = repo
        .update_listing(
            id,
            author_id,
            ListingChanges {
                title,
                description,
                price,
                category_id: req.category_id,
                author_phone,
                author_email,
                new_image_keys: req.new_image_keys,
                delete_image_ids: req.delete_image_ids,
            },
        )
        .await?;
    tracing::info!(
        listing_id = %id,
        from = %current.listing.status,
        images = outcome.record.images.len(),
        "listing updated, awaiting moderation"
    );
    purge_blobs(storage, &outcome.removed_keys).await;
    Ok(to_view(storage, outcome.record))
}

/// delete_listing
///
/// Author-only; cascades to the listing's images and their blobs.
pub async fn delete_listing(
    repo: &dyn Repository,
    storage: &dyn StorageService,
    viewer: &Viewer,
    id: Uuid,
) -> Result<(), AppError> {
    let author_id = viewer.require_user()?;
    let current = repo.get_listing(id).await?.ok_or(AppError::NotFound)?;
    policy::authorize_mutation(viewer, &current.listing)?;

    let removed_keys = repo.delete_listing(id, author_id).await?;
    tracing::info!(listing_id = %id, images = removed_keys.len(), "listing deleted");
    purge_blobs(storage, &removed_keys).await;
    Ok(())
}
