use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::{
    error::{AppError, ErrorCode},
    filters::{ListingFilter, ListingOrdering, PageRequest, UserFilter, UserOrdering},
    images::{AVATAR_KEY_PREFIX, LISTING_KEY_PREFIX},
    policy::Roles,
};

// --- Core Application Schemas (Mapped to Database) ---

/// User
///
/// The canonical account record stored in the `users` table. The password hash is deliberately
/// absent; it only travels inside `UserCredentials` during login.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    /// Blob key of the avatar image, if one is set.
    pub avatar_key: Option<String>,
    // Role flags consumed by the policy module.
    pub is_staff: bool,
    pub is_moderator: bool,
    // Deactivated accounts keep their listings but can no longer authenticate.
    pub is_active: bool,
    #[ts(type = "string")]
    pub date_joined: DateTime<Utc>,
}

impl User {
    pub fn is_privileged(&self) -> bool {
        self.is_staff || self.is_moderator
    }
}

/// UserCredentials
///
/// Internal login row: the user plus the stored argon2 PHC string.
#[derive(Debug, Clone, FromRow)]
pub struct UserCredentials {
    #[sqlx(flatten)]
    pub user: User,
    pub password_hash: String,
}

/// NewUser
///
/// A fully validated account ready to be inserted.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub roles: Roles,
}

/// ProfileChanges
///
/// Validated profile fields to overwrite. `Some(None)` clears the phone or the avatar.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileChanges {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<Option<String>>,
    pub email: Option<String>,
    pub avatar_key: Option<Option<String>>,
}

/// ProfileUpdateOutcome
///
/// The updated user and the avatar blob key the update replaced or cleared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileUpdateOutcome {
    pub user: User,
    pub removed_avatar: Option<String>,
}

/// Category
///
/// A flat listing category. The slug is unique and never empty.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// NewCategory
///
/// A category with its slug already resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCategory {
    pub name: String,
    pub slug: String,
}

/// ListingStatus
///
/// Moderation state of a listing, stored as the `listing_status` Postgres enum.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS, ToSchema, sqlx::Type,
)]
#[sqlx(type_name = "listing_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum ListingStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Pending => "pending",
            ListingStatus::Approved => "approved",
            ListingStatus::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(ListingStatus::Pending),
            "approved" => Some(ListingStatus::Approved),
            "rejected" => Some(ListingStatus::Rejected),
            _ => None,
        }
    }
}

impl std::fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Listing
///
/// A classified advertisement from the `listings` table.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct Listing {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    /// NUMERIC(10,2); serialized as a decimal string such as "1500.00".
    #[ts(type = "string")]
    #[schema(value_type = String, example = "1500.00")]
    pub price: Decimal,
    // Protected reference: the category cannot be deleted while this row exists.
    pub category_id: Uuid,
    // Owning reference: deleting the author deletes the listing.
    pub author_id: Uuid,
    pub status: ListingStatus,
    pub author_phone: String,
    pub author_email: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

/// ListingImage
///
/// One image of a listing. Only the blob key is stored here; the payload lives in object storage.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct ListingImage {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub image_key: String,
    /// `order` is reserved in SQL, so the column is called `sort_order`.
    #[sqlx(rename = "sort_order")]
    pub order: i32,
    #[ts(type = "string")]
    pub uploaded_at: DateTime<Utc>,
}

/// ListingRecord
///
/// A listing together with its images sorted by (order, uploaded_at). This is the unit the
/// repository reads and writes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingRecord {
    pub listing: Listing,
    pub images: Vec<ListingImage>,
}

/// NewListing
///
/// A validated listing ready to be inserted together with its initial image keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewListing {
    pub title: String,
    pub description: String,
    pub price: Decimal,
    pub category_id: Uuid,
    pub author_phone: String,
    pub author_email: String,
    pub image_keys: Vec<String>,
}

/// ListingChanges
///
/// Validated partial update applied by the author. Any applied change resets the status to pending.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub category_id: Option<Uuid>,
    pub author_phone: Option<String>,
    pub author_email: Option<String>,
    pub new_image_keys: Vec<String>,
    pub delete_image_ids: Vec<Uuid>,
}

/// ListingUpdateOutcome
///
/// The committed listing and the blob keys its update orphaned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingUpdateOutcome {
    pub record: ListingRecord,
    pub removed_keys: Vec<String>,
}

/// ModerationRecord
///
/// Audit row appended by every moderation transition.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, PartialEq)]
#[ts(export)]
pub struct ModerationRecord {
    pub id: Uuid,
    pub listing_id: Uuid,
    // NULL once the moderator account has been deleted.
    pub moderator_id: Option<Uuid>,
    pub from_status: ListingStatus,
    pub to_status: ListingStatus,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

// --- Request Payloads (Input Schemas) ---

/// RegisterRequest
///
/// Input payload for `POST /auth/register`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub password_confirm: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    #[schema(example = "+7 (999) 123-45-67")]
    pub phone: Option<String>,
}

/// LoginRequest
///
/// Input payload for `POST /auth/login`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// UpdateProfileRequest
///
/// Partial update of the caller's own profile (`PATCH /auth/profile`).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateProfileRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    /// An empty string clears the phone.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Key returned by an avatar upload; an empty string removes the avatar.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_key: Option<String>,
}

/// SetUserActiveRequest
///
/// Staff-only activation toggle (`PATCH /admin/users/{id}`).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct SetUserActiveRequest {
    pub is_active: bool,
}

/// CreateCategoryRequest
///
/// Staff-only category creation. The slug is derived from the name when omitted.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateCategoryRequest {
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
}

/// CreateListingRequest
///
/// Input payload for `POST /listings`. `image_keys` are object keys obtained through the upload
/// endpoints; their order becomes the image order.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateListingRequest {
    pub title: String,
    pub description: String,
    #[ts(type = "string")]
    #[schema(value_type = String, example = "1500.00")]
    pub price: Decimal,
    pub category_id: Uuid,
    pub author_phone: String,
    pub author_email: String,
    #[serde(default)]
    pub image_keys: Vec<String>,
}

/// UpdateListingRequest
///
/// Partial update for `PATCH /listings/{id}`. Image additions are appended after the current
/// images; deletions refer to image ids of this listing.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateListingRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[ts(type = "string | null")]
    #[schema(value_type = Option<String>)]
    pub price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_email: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub new_image_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delete_image_ids: Vec<Uuid>,
}

/// ModerateRequest
///
/// Input payload for `PATCH /admin/listings/{id}/moderate`. Kept as a string so that an unknown
/// or disallowed target surfaces as a field error instead of a body rejection.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct ModerateRequest {
    #[schema(example = "approved")]
    pub status: String,
}

/// UploadPurpose
///
/// What an uploaded image is for. Decides the key prefix of the new blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum UploadPurpose {
    #[default]
    Listing,
    Avatar,
}

impl UploadPurpose {
    pub fn key_prefix(self) -> &'static str {
        match self {
            UploadPurpose::Listing => LISTING_KEY_PREFIX,
            UploadPurpose::Avatar => AVATAR_KEY_PREFIX,
        }
    }
}

/// PresignedUrlRequest
///
/// Input payload for requesting a short-lived S3 upload URL (POST /upload/presigned).
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema, TS, Default)]
#[ts(export)]
pub struct PresignedUrlRequest {
    /// The original filename, used to derive the file extension.
    #[schema(example = "sofa.jpg")]
    pub filename: String,
    /// Must be an `image/*` MIME type.
    #[schema(example = "image/jpeg")]
    pub file_type: String,
    /// Defaults to `listing`.
    #[serde(default)]
    pub purpose: UploadPurpose,
}

// --- Output Schemas ---

/// PresignedUrlResponse
///
/// The temporary PUT URL plus the object key to reference in a listing request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, TS, Default)]
#[ts(export)]
pub struct PresignedUrlResponse {
    pub upload_url: String,
    pub resource_key: String,
}

/// UploadResponse
///
/// Result of a direct image upload (`POST /upload/images`).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, TS, Default)]
#[ts(export)]
pub struct UploadResponse {
    pub resource_key: String,
    pub url: String,
}

/// TokenResponse
///
/// Bearer token issued on register and login.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, TS, Default)]
#[ts(export)]
pub struct TokenResponse {
    pub access: String,
    pub token_type: String,
    pub expires_in: u64,
}

/// UserProfile
///
/// The caller's own profile (`GET /auth/me`, `GET /auth/profile`).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UserProfile {
    #[serde(flatten)]
    pub user: User,
    /// Public URL of the avatar, if one is set.
    pub avatar_url: Option<String>,
    /// Number of the user's approved listings.
    pub listings_count: i64,
}

/// AuthResponse
///
/// Body returned by register and login.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, TS, Default)]
#[ts(export)]
pub struct AuthResponse {
    pub user: UserProfile,
    pub token: TokenResponse,
}

/// PublicUser
///
/// Public view of another user (`GET /users/{id}`). Contact details are not exposed.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct PublicUser {
    pub id: Uuid,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    #[ts(type = "string")]
    pub date_joined: DateTime<Utc>,
    pub avatar_url: Option<String>,
    pub listings_count: i64,
}

/// ImageView
///
/// A listing image with its resolved public URL.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[ts(export)]
pub struct ImageView {
    pub id: Uuid,
    pub key: String,
    pub url: String,
    pub order: i32,
    #[ts(type = "string")]
    pub uploaded_at: DateTime<Utc>,
}

/// ListingView
///
/// Listing as returned by every listing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[ts(export)]
pub struct ListingView {
    #[serde(flatten)]
    pub listing: Listing,
    pub images: Vec<ImageView>,
}

/// Page
///
/// One page of a paginated collection.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct Page<T> {
    /// Total number of items across all pages.
    pub count: i64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
    pub results: Vec<T>,
}

// --- Query Parameters ---

/// ListingQuery
///
/// Query string of the listing collection endpoints. Unknown `ordering` values fall back to
/// newest first. `status` is only honoured on the moderation queue, where an unknown value is a
/// validation error; the public endpoints ignore it.
#[derive(Debug, Clone, Deserialize, IntoParams, Default)]
#[into_params(parameter_in = Query)]
pub struct ListingQuery {
    /// Case-insensitive match over title and description.
    pub search: Option<String>,
    /// Category id.
    pub category: Option<Uuid>,
    #[param(value_type = Option<String>, example = "100.00")]
    pub min_price: Option<Decimal>,
    #[param(value_type = Option<String>, example = "5000.00")]
    pub max_price: Option<Decimal>,
    /// One of `created_at`, `-created_at`, `price`, `-price`.
    pub ordering: Option<String>,
    /// 1-based page number.
    pub page: Option<u32>,
    /// Defaults to 12, at most 100.
    pub page_size: Option<u32>,
    /// `pending`, `approved` or `rejected`.
    pub status: Option<String>,
}

impl ListingQuery {
    /// Listing filter of the public endpoints, which never filter by status.
    pub fn filter(&self) -> ListingFilter {
        ListingFilter {
            search: self.search.clone(),
            category_id: self.category,
            min_price: self.min_price,
            max_price: self.max_price,
            status: None,
            author_id: None,
            ordering: ListingOrdering::parse(self.ordering.as_deref()),
        }
    }

    /// Listing filter of the moderation queue. A blank `status` means all statuses.
    pub fn moderation_filter(&self) -> Result<ListingFilter, AppError> {
        let status = match self.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            None => None,
            Some(raw) => Some(ListingStatus::parse(raw).ok_or_else(|| {
                AppError::field(
                    "status",
                    ErrorCode::InvalidChoice,
                    format!("'{raw}' is not one of pending, approved, rejected."),
                )
            })?),
        };
        Ok(ListingFilter {
            status,
            ..self.filter()
        })
    }

    pub fn page(&self) -> Result<PageRequest, AppError> {
        PageRequest::new(self.page, self.page_size)
    }
}

/// UserQuery
///
/// Query string of the staff user list.
#[derive(Debug, Clone, Deserialize, IntoParams, Default)]
#[into_params(parameter_in = Query)]
pub struct UserQuery {
    /// Case-insensitive match over username, email and names.
    pub search: Option<String>,
    /// One of `date_joined`, `-date_joined`, `username`, `-username`.
    pub ordering: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl UserQuery {
    pub fn filter(&self) -> UserFilter {
        UserFilter {
            search: self.search.clone(),
            ordering: UserOrdering::parse(self.ordering.as_deref()),
        }
    }

    pub fn page(&self) -> Result<PageRequest, AppError> {
        PageRequest::new(self.page, self.page_size)
    }
}

/// UploadQuery
///
/// Query string of the direct upload endpoint.
#[derive(Debug, Clone, Deserialize, IntoParams, Default)]
#[into_params(parameter_in = Query)]
pub struct UploadQuery {
    /// `listing` (default) or `avatar`.
    #[serde(default)]
    #[param(value_type = Option<String>)]
    pub purpose: UploadPurpose,
}

/// PageQuery
///
/// Pagination-only query string.
#[derive(Debug, Clone, Deserialize, IntoParams, Default)]
#[into_params(parameter_in = Query)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl PageQuery {
    pub fn page(&self) -> Result<PageRequest, AppError> {
        PageRequest::new(self.page, self.page_size)
    }
}
