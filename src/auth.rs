use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{StatusCode, header, request::Parts},
};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::{AppConfig, Env},
    error::AppError,
    models::{TokenResponse, User},
    policy::{Roles, Viewer},
    repository::RepositoryState,
};

/// Claims
///
/// Payload of the HS256 bearer tokens this service issues on register and login.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (sub): the user id.
    pub sub: Uuid,
    /// Expiration Time (exp): tokens are rejected after this timestamp.
    pub exp: usize,
    /// Issued At (iat).
    pub iat: usize,
}

/// AuthUser Extractor Result
///
/// The resolved identity of an authenticated request. Role flags are read from the database on
/// every request, so a demotion or deactivation takes effect immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub id: Uuid,
    pub is_staff: bool,
    pub is_moderator: bool,
}

impl AuthUser {
    pub fn viewer(&self) -> Viewer {
        Viewer::user(
            self.id,
            Roles {
                is_staff: self.is_staff,
                is_moderator: self.is_moderator,
            },
        )
    }
}

impl From<&User> for AuthUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            is_staff: user.is_staff,
            is_moderator: user.is_moderator,
        }
    }
}

/// MaybeAuthUser
///
/// Optional identity for endpoints that anonymous callers may use. A request without credentials
/// resolves to `None`; credentials that are present but invalid are still rejected with 401.
#[derive(Debug, Clone, Copy)]
pub struct MaybeAuthUser(pub Option<AuthUser>);

impl MaybeAuthUser {
    pub fn viewer(&self) -> Viewer {
        self.0.as_ref().map_or(Viewer::Anonymous, AuthUser::viewer)
    }
}

/// Loads the user behind an id and refuses deleted or deactivated accounts.
async fn active_user(repo: &RepositoryState, user_id: Uuid) -> Result<AuthUser, StatusCode> {
    match repo.get_user(user_id).await {
        Ok(Some(user)) if user.is_active => Ok(AuthUser::from(&user)),
        Ok(_) => Err(StatusCode::UNAUTHORIZED),
        Err(e) => {
            tracing::error!(error = %e, "identity lookup failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Resolves the request identity, if any credentials were supplied.
///
/// 1. Local bypass: in `Env::Local` an `x-user-id` header naming an existing user is accepted.
/// 2. Bearer token: decoded with the configured secret, expiry always validated.
/// 3. Database lookup: the user must still exist and be active.
async fn resolve(parts: &Parts, repo: &RepositoryState, config: &AppConfig) -> Result<Option<AuthUser>, StatusCode> {
    if config.env == Env::Local {
        let bypass = parts
            .headers
            .get("x-user-id")
            .and_then(|value| value.to_str().ok())
            .and_then(|raw| Uuid::parse_str(raw).ok());
        if let Some(user_id) = bypass {
            if let Ok(user) = active_user(repo, user_id).await {
                return Ok(Some(user));
            }
        }
    }

    let Some(auth_header) = parts.headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let token = auth_header
        .to_str()
        .ok()
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let claims = decode_token(config, token)?;
    active_user(repo, claims.sub).await.map(Some)
}

fn decode_token(config: &AppConfig, token: &str) -> Result<Claims, StatusCode> {
    let decoding_key = DecodingKey::from_secret(config.jwt_secret.as_bytes());
    let mut validation = Validation::default();
    validation.validate_exp = true;

    decode::<Claims>(token, &decoding_key, &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => tracing::debug!("rejected expired token"),
                other => tracing::debug!(reason = ?other, "rejected malformed token"),
            }
            StatusCode::UNAUTHORIZED
        })
}

/// AuthUser Extractor Implementation
///
/// Requires an identity. Rejection: 401 for missing or invalid credentials.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let repo = RepositoryState::from_ref(state);
        let config = AppConfig::from_ref(state);
        resolve(parts, &repo, &config).await?.ok_or(StatusCode::UNAUTHORIZED)
    }
}

impl<S> FromRequestParts<S> for MaybeAuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let repo = RepositoryState::from_ref(state);
        let config = AppConfig::from_ref(state);
        resolve(parts, &repo, &config).await.map(MaybeAuthUser)
    }
}

/// issue_token
///
/// Signs a bearer token for `user_id` valid for `jwt_ttl_secs`.
pub fn issue_token(config: &AppConfig, user_id: Uuid) -> Result<TokenResponse, AppError> {
    let now = usize::try_from(Utc::now().timestamp()).unwrap_or(0);
    let ttl = usize::try_from(config.jwt_ttl_secs).unwrap_or(usize::MAX);
    let claims = Claims {
        sub: user_id,
        iat: now,
        exp: now.saturating_add(ttl),
    };
    let access = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| AppError::Infrastructure(format!("token signing failed: {e}")))?;

    Ok(TokenResponse {
        access,
        token_type: "Bearer".to_string(),
        expires_in: config.jwt_ttl_secs,
    })
}

/// Hashes a password into an argon2 PHC string. CPU-bound; call from `spawn_blocking`.
pub fn hash_password(password: &str) -> Result<String, AppError> {
    // A v4 UUID is 16 bytes from the OS random source, the recommended salt length.
    let salt = SaltString::encode_b64(Uuid::new_v4().as_bytes())
        .map_err(|e| AppError::Infrastructure(format!("salt encoding failed: {e}")))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Infrastructure(format!("password hashing failed: {e}")))
}

/// Checks a password against a stored PHC string. An unparsable hash never verifies.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "stored password hash is not a valid PHC string");
            false
        }
    }
}
