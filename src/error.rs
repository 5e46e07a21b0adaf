use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::{repository::RepoError, storage::StorageError};

/// ErrorCode
///
/// Machine-readable reason attached to every field-level validation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Required,
    TooLong,
    InvalidEmail,
    InvalidPrice,
    PhoneFormatInvalid,
    WeakPassword,
    PasswordMismatch,
    DuplicateUsername,
    DuplicateEmail,
    DuplicateSlug,
    UnknownCategory,
    TooManyImages,
    InvalidImage,
    InvalidTargetStatus,
    InvalidChoice,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    pub code: ErrorCode,
    pub message: String,
}

/// FieldErrors
///
/// Validation failures keyed by field name, serialized as
/// `{"field": [{"code": ..., "message": ...}]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<FieldError>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: &str, code: ErrorCode, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, code, message);
        errors
    }

    pub fn add(&mut self, field: &str, code: ErrorCode, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(FieldError {
            code,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, field: &str, code: ErrorCode) -> bool {
        self.0
            .get(field)
            .is_some_and(|errors| errors.iter().any(|e| e.code == code))
    }

    /// Turns the collected errors into `Err(AppError::Validation)` when any were recorded.
    pub fn into_result(self) -> Result<(), AppError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(self))
        }
    }
}

/// AppError
///
/// The error type returned by every core operation and handler. Each variant maps to exactly one
/// HTTP status so callers can tell "does not exist" apart from "not allowed".
#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed")]
    Validation(FieldErrors),
    #[error("not found")]
    NotFound,
    #[error("you do not have permission to perform this action")]
    Forbidden,
    #[error("authentication required")]
    Unauthorized,
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("user account is disabled")]
    AccountDisabled,
    #[error("the resource was modified concurrently, retry the request")]
    Conflict,
    #[error("{0}")]
    Protected(String),
    #[error("infrastructure failure: {0}")]
    Infrastructure(String),
}

impl AppError {
    pub fn field(field: &str, code: ErrorCode, message: impl Into<String>) -> Self {
        AppError::Validation(FieldErrors::single(field, code, message))
    }

    /// True when this is a validation error carrying `code` on `field`.
    pub fn has_field_error(&self, field: &str, code: ErrorCode) -> bool {
        matches!(self, AppError::Validation(errors) if errors.contains(field, code))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::Unauthorized | AppError::InvalidCredentials | AppError::AccountDisabled => {
                StatusCode::UNAUTHORIZED
            }
            AppError::Conflict | AppError::Protected(_) => StatusCode::CONFLICT,
            AppError::Infrastructure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            AppError::Validation(errors) => json!({ "errors": errors }),
            AppError::Infrastructure(detail) => {
                // Details stay in the logs; clients get a generic message.
                tracing::error!(error = %detail, "request failed on infrastructure error");
                json!({ "error": "internal server error" })
            }
            other => json!({ "error": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

impl From<RepoError> for AppError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound => AppError::NotFound,
            RepoError::Forbidden => AppError::Forbidden,
            RepoError::TooManyImages { resulting, max } => AppError::field(
                "images",
                ErrorCode::TooManyImages,
                format!("a listing may have at most {max} images, this change would leave {resulting}"),
            ),
            RepoError::InvalidImage(id) => AppError::field(
                "delete_image_ids",
                ErrorCode::InvalidImage,
                format!("image {id} does not belong to this listing"),
            ),
            RepoError::UnknownCategory => AppError::field(
                "category_id",
                ErrorCode::UnknownCategory,
                "category does not exist",
            ),
            RepoError::Duplicate(field) if field == "image_key" => AppError::field(
                "images",
                ErrorCode::InvalidImage,
                "this image is already attached to a listing",
            ),
            RepoError::Duplicate(field) => {
                let code = match field.as_str() {
                    "username" => ErrorCode::DuplicateUsername,
                    "email" => ErrorCode::DuplicateEmail,
                    _ => ErrorCode::DuplicateSlug,
                };
                AppError::field(&field, code, format!("this {field} is already taken"))
            }
            RepoError::Protected(reason) => AppError::Protected(reason),
            RepoError::Conflict => AppError::Conflict,
            RepoError::Database(e) => AppError::Infrastructure(e.to_string()),
        }
    }
}

impl From<StorageError> for AppError {
    fn from(value: StorageError) -> Self {
        AppError::Infrastructure(value.to_string())
    }
}
