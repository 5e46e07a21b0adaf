use crate::{
    AppState, accounts,
    auth::{self, AuthUser, MaybeAuthUser},
    catalog,
    error::{AppError, ErrorCode},
    images, listings,
    models::{
        AuthResponse, Category, CreateCategoryRequest, CreateListingRequest, ListingQuery,
        ListingView, LoginRequest, ModerateRequest, ModerationRecord, Page, PageQuery,
        PresignedUrlRequest, PresignedUrlResponse, PublicUser, RegisterRequest,
        SetUserActiveRequest, UpdateListingRequest, UpdateProfileRequest, UploadQuery,
        UploadResponse, User, UserProfile, UserQuery,
    },
    moderation,
};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
};
use uuid::Uuid;

/// Maps an accepted image MIME type to the file extension used in its object key.
fn image_extension(content_type: &str) -> Option<&'static str> {
    match content_type.trim().to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        _ => None,
    }
}

fn unsupported_image(field: &str) -> AppError {
    AppError::field(field, ErrorCode::InvalidImage, "Only JPEG, PNG, WebP or GIF images are accepted.")
}

// --- Identity ---

/// register
///
/// [Public Route] Creates an account and returns it together with a bearer token.
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Registered", body = AuthResponse),
        (status = 400, description = "Validation error")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    let repo = state.repo.as_ref();
    let user = accounts::create_account(repo, payload).await?;
    let token = auth::issue_token(&state.config, user.id)?;
    let user = accounts::user_profile(repo, state.storage.as_ref(), user).await?;
    Ok((StatusCode::CREATED, Json(AuthResponse { user, token })))
}

/// login
///
/// [Public Route] Exchanges username and password for a bearer token.
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = AuthResponse),
        (status = 401, description = "Invalid credentials or disabled account")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let repo = state.repo.as_ref();
    let user = accounts::authenticate(repo, payload).await?;
    let token = auth::issue_token(&state.config, user.id)?;
    let user = accounts::user_profile(repo, state.storage.as_ref(), user).await?;
    Ok(Json(AuthResponse { user, token }))
}

/// get_me
///
/// [Authenticated Route] The caller's own account.
#[utoipa::path(
    get,
    path = "/auth/me",
    responses((status = 200, description = "Current user", body = UserProfile))
)]
pub async fn get_me(user: AuthUser, State(state): State<AppState>) -> Result<Json<UserProfile>, AppError> {
    Ok(Json(
        accounts::profile(state.repo.as_ref(), state.storage.as_ref(), &user.viewer()).await?,
    ))
}

#[utoipa::path(
    get,
    path = "/auth/profile",
    responses((status = 200, description = "Own profile", body = UserProfile))
)]
pub async fn get_profile(user: AuthUser, State(state): State<AppState>) -> Result<Json<UserProfile>, AppError> {
    Ok(Json(
        accounts::profile(state.repo.as_ref(), state.storage.as_ref(), &user.viewer()).await?,
    ))
}

/// update_profile
///
/// [Authenticated Route] Partial update of names, phone, email and avatar.
#[utoipa::path(
    patch,
    path = "/auth/profile",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Profile updated", body = UserProfile),
        (status = 400, description = "Validation error")
    )
)]
pub async fn update_profile(
    user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<Json<UserProfile>, AppError> {
    Ok(Json(
        accounts::update_profile(state.repo.as_ref(), state.storage.as_ref(), &user.viewer(), payload).await?,
    ))
}

/// get_public_user
///
/// [Public Route] Public view of an active account.
#[utoipa::path(
    get,
    path = "/users/{id}",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "Public profile", body = PublicUser),
        (status = 404, description = "No such active user")
    )
)]
pub async fn get_public_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PublicUser>, AppError> {
    Ok(Json(
        accounts::public_profile(state.repo.as_ref(), state.storage.as_ref(), id).await?,
    ))
}

// --- Catalog ---

#[utoipa::path(
    get,
    path = "/categories",
    responses((status = 200, description = "All categories by name", body = [Category]))
)]
pub async fn list_categories(State(state): State<AppState>) -> Result<Json<Vec<Category>>, AppError> {
    Ok(Json(catalog::list_categories(state.repo.as_ref()).await?))
}

/// create_category
///
/// [Admin Route] Staff only.
#[utoipa::path(
    post,
    path = "/admin/categories",
    request_body = CreateCategoryRequest,
    responses(
        (status = 201, description = "Created", body = Category),
        (status = 403, description = "Not staff")
    )
)]
pub async fn create_category(
    user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateCategoryRequest>,
) -> Result<(StatusCode, Json<Category>), AppError> {
    let category = catalog::create_category(state.repo.as_ref(), &user.viewer(), payload).await?;
    Ok((StatusCode::CREATED, Json(category)))
}

/// delete_category
///
/// [Admin Route] Staff only; 409 while listings still use the category.
#[utoipa::path(
    delete,
    path = "/admin/categories/{id}",
    params(("id" = Uuid, Path, description = "Category id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 409, description = "Category is in use")
    )
)]
pub async fn delete_category(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    catalog::delete_category(state.repo.as_ref(), &user.viewer(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Listings ---

/// list_listings
///
/// [Public Route] Anonymous callers see approved listings; signed-in users also see their own;
/// moderators and staff see everything.
#[utoipa::path(
    get,
    path = "/listings",
    params(ListingQuery),
    responses(
        (status = 200, description = "One page of listings", body = Page<ListingView>),
        (status = 404, description = "Page out of range")
    )
)]
pub async fn list_listings(
    user: MaybeAuthUser,
    State(state): State<AppState>,
    Query(query): Query<ListingQuery>,
) -> Result<Json<Page<ListingView>>, AppError> {
    let page = query.page()?;
    let filter = query.filter();
    let result = listings::list_listings(
        state.repo.as_ref(),
        state.storage.as_ref(),
        &user.viewer(),
        &filter,
        page,
    )
    .await?;
    Ok(Json(result))
}

/// get_listing
///
/// [Public Route] 404 when the listing does not exist or is not visible to the caller.
#[utoipa::path(
    get,
    path = "/listings/{id}",
    params(("id" = Uuid, Path, description = "Listing id")),
    responses(
        (status = 200, description = "Listing", body = ListingView),
        (status = 404, description = "Not found")
    )
)]
pub async fn get_listing(
    user: MaybeAuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ListingView>, AppError> {
    let view = listings::get_listing(state.repo.as_ref(), state.storage.as_ref(), &user.viewer(), id).await?;
    Ok(Json(view))
}

/// my_listings
///
/// [Authenticated Route] The caller's listings in every status.
#[utoipa::path(
    get,
    path = "/listings/my",
    params(PageQuery),
    responses((status = 200, description = "Own listings", body = Page<ListingView>))
)]
pub async fn my_listings(
    user: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<ListingView>>, AppError> {
    let page = query.page()?;
    let result = listings::my_listings(state.repo.as_ref(), state.storage.as_ref(), &user.viewer(), page).await?;
    Ok(Json(result))
}

/// create_listing
///
/// [Authenticated Route] New listings start in `pending`.
#[utoipa::path(
    post,
    path = "/listings",
    request_body = CreateListingRequest,
    responses(
        (status = 201, description = "Created", body = ListingView),
        (status = 400, description = "Validation error")
    )
)]
pub async fn create_listing(
    user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateListingRequest>,
) -> Result<(StatusCode, Json<ListingView>), AppError> {
    let view = listings::create_listing(state.repo.as_ref(), state.storage.as_ref(), &user.viewer(), payload).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// update_listing
///
/// [Authenticated Route] Author only. The listing returns to `pending`.
#[utoipa::path(
    patch,
    path = "/listings/{id}",
    params(("id" = Uuid, Path, description = "Listing id")),
    request_body = UpdateListingRequest,
    responses(
        (status = 200, description = "Updated", body = ListingView),
        (status = 400, description = "Validation error"),
        (status = 403, description = "Not the author"),
        (status = 404, description = "Not found"),
        (status = 409, description = "Concurrent modification")
    )
)]
pub async fn update_listing(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateListingRequest>,
) -> Result<Json<ListingView>, AppError> {
    let view = listings::update_listing(
        state.repo.as_ref(),
        state.storage.as_ref(),
        &user.viewer(),
        id,
        payload,
    )
    .await?;
    Ok(Json(view))
}

/// delete_listing
///
/// [Authenticated Route] Author only.
#[utoipa::path(
    delete,
    path = "/listings/{id}",
    params(("id" = Uuid, Path, description = "Listing id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not the author"),
        (status = 404, description = "Not found")
    )
)]
pub async fn delete_listing(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    listings::delete_listing(state.repo.as_ref(), state.storage.as_ref(), &user.viewer(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Uploads ---

/// get_presigned_url
///
/// [Authenticated Route] Returns a 10-minute PUT URL bound to the declared image type, plus the
/// object key to submit with a listing or as the avatar. The key lives under the caller's id.
#[utoipa::path(
    post,
    path = "/upload/presigned",
    request_body = PresignedUrlRequest,
    responses(
        (status = 200, description = "Presigned URL", body = PresignedUrlResponse),
        (status = 400, description = "Not an accepted image type")
    )
)]
pub async fn get_presigned_url(
    user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<PresignedUrlRequest>,
) -> Result<Json<PresignedUrlResponse>, AppError> {
    let extension = image_extension(&payload.file_type).ok_or_else(|| unsupported_image("file_type"))?;
    let resource_key = images::new_object_key(payload.purpose.key_prefix(), user.id, extension);

    let upload_url = state
        .storage
        .get_presigned_upload_url(&resource_key, &payload.file_type)
        .await?;
    tracing::debug!(user_id = %user.id, key = %resource_key, filename = %payload.filename, "presigned upload issued");
    Ok(Json(PresignedUrlResponse {
        upload_url,
        resource_key,
    }))
}

/// upload_image
///
/// [Authenticated Route] Stores the raw request body as an image under the caller's id. The body
/// size is capped by the route's body limit.
#[utoipa::path(
    post,
    path = "/upload/images",
    params(UploadQuery),
    request_body(content = Vec<u8>, content_type = "image/*"),
    responses(
        (status = 201, description = "Stored", body = UploadResponse),
        (status = 400, description = "Empty body or unsupported type"),
        (status = 413, description = "Image too large")
    )
)]
pub async fn upload_image(
    user: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let extension = image_extension(content_type).ok_or_else(|| unsupported_image("content_type"))?;
    if body.is_empty() {
        return Err(AppError::field("body", ErrorCode::Required, "The image body is empty."));
    }

    let resource_key = images::new_object_key(query.purpose.key_prefix(), user.id, extension);
    state
        .storage
        .put_object(&resource_key, content_type, body.to_vec())
        .await?;
    tracing::info!(user_id = %user.id, key = %resource_key, bytes = body.len(), "image uploaded");
    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            url: state.storage.object_url(&resource_key),
            resource_key,
        }),
    ))
}

// --- Moderation ---

/// admin_list_listings
///
/// [Admin Route] Moderators and staff; `status` narrows the queue and must name a real status.
#[utoipa::path(
    get,
    path = "/admin/listings",
    params(ListingQuery),
    responses(
        (status = 200, description = "Review queue", body = Page<ListingView>),
        (status = 400, description = "Unknown status"),
        (status = 403, description = "Not a moderator")
    )
)]
pub async fn admin_list_listings(
    user: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<ListingQuery>,
) -> Result<Json<Page<ListingView>>, AppError> {
    let result = moderation::review_queue(state.repo.as_ref(), state.storage.as_ref(), &user.viewer(), &query).await?;
    Ok(Json(result))
}

/// moderate_listing
///
/// [Admin Route] Moves a listing to `approved` or `rejected`.
#[utoipa::path(
    patch,
    path = "/admin/listings/{id}/moderate",
    params(("id" = Uuid, Path, description = "Listing id")),
    request_body = ModerateRequest,
    responses(
        (status = 200, description = "Moderated", body = ListingView),
        (status = 400, description = "Invalid target status"),
        (status = 403, description = "Not a moderator"),
        (status = 404, description = "Not found")
    )
)]
pub async fn moderate_listing(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ModerateRequest>,
) -> Result<Json<ListingView>, AppError> {
    let view = moderation::moderate(
        state.repo.as_ref(),
        state.storage.as_ref(),
        &user.viewer(),
        id,
        payload,
    )
    .await?;
    Ok(Json(view))
}

#[utoipa::path(
    get,
    path = "/admin/listings/{id}/moderation",
    params(("id" = Uuid, Path, description = "Listing id")),
    responses(
        (status = 200, description = "Audit trail, newest first", body = [ModerationRecord]),
        (status = 403, description = "Not a moderator"),
        (status = 404, description = "Not found")
    )
)]
pub async fn moderation_history(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ModerationRecord>>, AppError> {
    Ok(Json(moderation::history(state.repo.as_ref(), &user.viewer(), id).await?))
}

// --- Account administration ---

/// list_users
///
/// [Admin Route] Staff only. Every account, including deactivated ones.
#[utoipa::path(
    get,
    path = "/admin/users",
    params(UserQuery),
    responses(
        (status = 200, description = "Users", body = Page<User>),
        (status = 403, description = "Not staff")
    )
)]
pub async fn list_users(
    user: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<Page<User>>, AppError> {
    let page = query.page()?;
    let result = accounts::list_users(state.repo.as_ref(), &user.viewer(), &query.filter(), page).await?;
    Ok(Json(result))
}

/// set_user_active
///
/// [Admin Route] Staff only.
#[utoipa::path(
    patch,
    path = "/admin/users/{id}",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = SetUserActiveRequest,
    responses(
        (status = 200, description = "Updated", body = User),
        (status = 403, description = "Not staff"),
        (status = 404, description = "Not found")
    )
)]
pub async fn set_user_active(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SetUserActiveRequest>,
) -> Result<Json<User>, AppError> {
    let updated = accounts::set_user_active(state.repo.as_ref(), &user.viewer(), id, payload.is_active).await?;
    Ok(Json(updated))
}

/// delete_user
///
/// [Admin Route] Staff only; removes the user's listings as well.
#[utoipa::path(
    delete,
    path = "/admin/users/{id}",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not staff"),
        (status = 404, description = "Not found")
    )
)]
pub async fn delete_user(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    accounts::delete_user(state.repo.as_ref(), state.storage.as_ref(), &user.viewer(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}
