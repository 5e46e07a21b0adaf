//! Identity store operations: registration, login, profiles and account administration.

use uuid::Uuid;

use crate::{
    auth,
    config::AdminSeed,
    error::{AppError, ErrorCode, FieldErrors},
    filters::{PageRequest, UserFilter},
    images::{self, AVATAR_KEY_PREFIX},
    listings::purge_blobs,
    models::{
        LoginRequest, NewUser, Page, ProfileChanges, PublicUser, RegisterRequest,
        UpdateProfileRequest, User, UserProfile,
    },
    policy::{self, Roles, Viewer},
    repository::Repository,
    storage::StorageService,
    validation::{self, NAME_MAX_LEN},
};

async fn hash_in_background(password: String) -> Result<String, AppError> {
    tokio::task::spawn_blocking(move || auth::hash_password(&password))
        .await
        .map_err(|e| AppError::Infrastructure(format!("hashing task failed: {e}")))?
}

/// create_account
///
/// Registers a regular user. See `create_account_with_roles`.
pub async fn create_account(repo: &dyn Repository, req: RegisterRequest) -> Result<User, AppError> {
    create_account_with_roles(repo, req, Roles::default()).await
}

/// create_account_with_roles
///
/// Validates every field and reports all failures together. Uniqueness is checked up front for
/// friendly errors and enforced again by the store's unique constraints.
pub async fn create_account_with_roles(
    repo: &dyn Repository,
    req: RegisterRequest,
    roles: Roles,
) -> Result<User, AppError> {
    let mut errors = FieldErrors::new();
    let username = validation::required_text("username", &req.username, Some(NAME_MAX_LEN), &mut errors);
    validation::validate_email("email", &req.email, &mut errors);
    let email = req.email.trim().to_string();
    let first_name = validation::required_text("first_name", &req.first_name, Some(NAME_MAX_LEN), &mut errors);
    let last_name = validation::required_text("last_name", &req.last_name, Some(NAME_MAX_LEN), &mut errors);
    let phone = validation::normalize_optional_phone("phone", req.phone.as_deref(), &mut errors);

    if req.password != req.password_confirm {
        errors.add("password_confirm", ErrorCode::PasswordMismatch, "Passwords do not match.");
    }
    validation::validate_password(&req.password, &username, &mut errors);

    if !username.is_empty() && repo.username_exists(&username).await? {
        errors.add("username", ErrorCode::DuplicateUsername, "A user with that username already exists.");
    }
    if !email.is_empty() && repo.email_exists(&email, None).await? {
        errors.add("email", ErrorCode::DuplicateEmail, "A user with this email already exists.");
    }
    errors.into_result()?;

    let password_hash = hash_in_background(req.password).await?;
    let user = repo
        .create_user(NewUser {
            username,
            email,
            password_hash,
            first_name,
            last_name,
            phone,
            roles,
        })
        .await?;
    tracing::info!(user_id = %user.id, username = %user.username, "account created");
    Ok(user)
}

/// authenticate
///
/// Checks the password first, so a disabled account is only revealed to someone who knows it.
pub async fn authenticate(repo: &dyn Repository, req: LoginRequest) -> Result<User, AppError> {
    let credentials = repo
        .get_credentials(req.username.trim())
        .await?
        .ok_or(AppError::InvalidCredentials)?;

    let stored_hash = credentials.password_hash;
    let password = req.password;
    let verified = tokio::task::spawn_blocking(move || auth::verify_password(&password, &stored_hash))
        .await
        .map_err(|e| AppError::Infrastructure(format!("verification task failed: {e}")))?;

    if !verified {
        tracing::info!(username = %credentials.user.username, "login rejected");
        return Err(AppError::InvalidCredentials);
    }
    if !credentials.user.is_active {
        return Err(AppError::AccountDisabled);
    }
    Ok(credentials.user)
}

fn avatar_url(storage: &dyn StorageService, user: &User) -> Option<String> {
    user.avatar_key.as_deref().map(|key| storage.object_url(key))
}

async fn with_listing_count(
    repo: &dyn Repository,
    storage: &dyn StorageService,
    user: User,
) -> Result<UserProfile, AppError> {
    let listings_count = repo.count_approved_listings(user.id).await?;
    Ok(UserProfile {
        avatar_url: avatar_url(storage, &user),
        user,
        listings_count,
    })
}

/// profile
///
/// The caller's own account with their approved listing count.
pub async fn profile(
    repo: &dyn Repository,
    storage: &dyn StorageService,
    viewer: &Viewer,
) -> Result<UserProfile, AppError> {
    let id = viewer.require_user()?;
    let user = repo.get_user(id).await?.ok_or(AppError::Unauthorized)?;
    with_listing_count(repo, storage, user).await
}

/// Wraps a freshly created or authenticated user for the register/login response.
pub async fn user_profile(
    repo: &dyn Repository,
    storage: &dyn StorageService,
    user: User,
) -> Result<UserProfile, AppError> {
    with_listing_count(repo, storage, user).await
}

/// An empty key clears the avatar; anything else must be an avatar upload of the caller.
fn validate_avatar_key(owner: Uuid, raw: &str, errors: &mut FieldErrors) -> Option<String> {
    let key = raw.trim();
    if key.is_empty() {
        return None;
    }
    if !images::is_owned_key(AVATAR_KEY_PREFIX, owner, key) {
        errors.add("avatar_key", ErrorCode::InvalidImage, format!("'{key}' is not one of your uploaded avatars."));
    }
    Some(key.to_string())
}

/// update_profile
///
/// Absent fields stay unchanged; an empty phone or avatar key clears it. A replaced avatar blob
/// is purged after the update commits.
pub async fn update_profile(
    repo: &dyn Repository,
    storage: &dyn StorageService,
    viewer: &Viewer,
    req: UpdateProfileRequest,
) -> Result<UserProfile, AppError> {
    let id = viewer.require_user()?;
    let mut errors = FieldErrors::new();

    let first_name = req
        .first_name
        .map(|v| validation::required_text("first_name", &v, Some(NAME_MAX_LEN), &mut errors));
    let last_name = req
        .last_name
        .map(|v| validation::required_text("last_name", &v, Some(NAME_MAX_LEN), &mut errors));
    let phone = req
        .phone
        .map(|v| validation::normalize_optional_phone("phone", Some(&v), &mut errors));
    let avatar_key = req.avatar_key.map(|v| validate_avatar_key(id, &v, &mut errors));
    let email = match req.email {
        Some(raw) => {
            validation::validate_email("email", &raw, &mut errors);
            let email = raw.trim().to_string();
            if !email.is_empty() && repo.email_exists(&email, Some(id)).await? {
                errors.add("email", ErrorCode::DuplicateEmail, "A user with this email already exists.");
            }
            Some(email)
        }
        None => None,
    };
    errors.into_result()?;

    let outcome = repo
        .update_profile(
            id,
            ProfileChanges {
                first_name,
                last_name,
                phone,
                email,
                avatar_key,
            },
        )
        .await?;
    if let Some(old) = outcome.removed_avatar {
        tracing::info!(user_id = %id, "avatar replaced");
        purge_blobs(storage, &[old]).await;
    }
    with_listing_count(repo, storage, outcome.user).await
}

/// public_profile
///
/// Deactivated accounts are indistinguishable from missing ones.
pub async fn public_profile(
    repo: &dyn Repository,
    storage: &dyn StorageService,
    id: Uuid,
) -> Result<PublicUser, AppError> {
    let user = repo
        .get_user(id)
        .await?
        .filter(|u| u.is_active)
        .ok_or(AppError::NotFound)?;
    let listings_count = repo.count_approved_listings(user.id).await?;
    Ok(PublicUser {
        avatar_url: avatar_url(storage, &user),
        id: user.id,
        username: user.username,
        first_name: user.first_name,
        last_name: user.last_name,
        date_joined: user.date_joined,
        listings_count,
    })
}

/// list_users
///
/// Staff-only directory of every account, active or not.
pub async fn list_users(
    repo: &dyn Repository,
    viewer: &Viewer,
    filter: &UserFilter,
    page: PageRequest,
) -> Result<Page<User>, AppError> {
    policy::authorize_administration(viewer)?;
    let (users, count) = repo.search_users(filter, page).await?;
    page.into_page(users, count)
}

/// set_user_active
///
/// Staff-only. Deactivation keeps the user's listings; it only blocks login and token use.
pub async fn set_user_active(
    repo: &dyn Repository,
    viewer: &Viewer,
    id: Uuid,
    is_active: bool,
) -> Result<User, AppError> {
    let staff_id = policy::authorize_administration(viewer)?;
    let user = repo.set_user_active(id, is_active).await?;
    tracing::info!(user_id = %id, by = %staff_id, is_active, "account activation changed");
    Ok(user)
}

/// delete_user
///
/// Staff-only. Cascades to the user's listings and images, then purges their blobs.
pub async fn delete_user(
    repo: &dyn Repository,
    storage: &dyn StorageService,
    viewer: &Viewer,
    id: Uuid,
) -> Result<(), AppError> {
    let staff_id = policy::authorize_administration(viewer)?;
    let removed_keys = repo.delete_user(id).await?;
    tracing::info!(user_id = %id, by = %staff_id, images = removed_keys.len(), "account deleted");
    purge_blobs(storage, &removed_keys).await;
    Ok(())
}

/// bootstrap_admin
///
/// Creates the configured staff account unless the username is already taken.
pub async fn bootstrap_admin(repo: &dyn Repository, seed: &AdminSeed) -> Result<Option<User>, AppError> {
    if repo.username_exists(&seed.username).await? {
        return Ok(None);
    }
    let req = RegisterRequest {
        username: seed.username.clone(),
        email: seed.email.clone(),
        password: seed.password.clone(),
        password_confirm: seed.password.clone(),
        first_name: seed.username.clone(),
        last_name: "Admin".to_string(),
        phone: None,
    };
    let roles = Roles {
        is_staff: true,
        is_moderator: true,
    };
    create_account_with_roles(repo, req, roles).await.map(Some)
}
