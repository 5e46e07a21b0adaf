use axum::{
    Router,
    extract::{FromRef, Request},
    http::HeaderName,
    middleware::{self, Next},
    response::Response,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Pure domain rules.
pub mod error;
pub mod filters;
pub mod images;
pub mod policy;
pub mod validation;

// Core operations, one module per component.
pub mod accounts;
pub mod catalog;
pub mod listings;
pub mod moderation;

// Infrastructure and HTTP surface.
pub mod auth;
pub mod config;
pub mod handlers;
pub mod models;
pub mod repository;
pub mod storage;

// Routing segregated by access level (public, authenticated, admin).
pub mod routes;
use auth::AuthUser;
use routes::{admin, authenticated, public};

// --- Public Re-exports ---

pub use config::AppConfig;
pub use error::AppError;
pub use repository::{InMemoryRepository, PostgresRepository, RepositoryState};
pub use storage::{MockStorageService, S3StorageClient, StorageState};

/// ApiDoc
///
/// OpenAPI document aggregated from every `#[utoipa::path]` handler and `ToSchema` model, served
/// at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::register, handlers::login, handlers::get_me, handlers::get_profile,
        handlers::update_profile, handlers::get_public_user, handlers::list_categories,
        handlers::create_category, handlers::delete_category, handlers::list_listings,
        handlers::get_listing, handlers::my_listings, handlers::create_listing,
        handlers::update_listing, handlers::delete_listing, handlers::get_presigned_url,
        handlers::upload_image, handlers::admin_list_listings, handlers::moderate_listing,
        handlers::moderation_history, handlers::list_users, handlers::set_user_active,
        handlers::delete_user
    ),
    components(
        schemas(
            models::User, models::Category, models::ListingStatus, models::Listing,
            models::ListingImage, models::ModerationRecord, models::RegisterRequest,
            models::LoginRequest, models::UpdateProfileRequest, models::SetUserActiveRequest,
            models::CreateCategoryRequest, models::CreateListingRequest,
            models::UpdateListingRequest, models::ModerateRequest, models::PresignedUrlRequest,
            models::PresignedUrlResponse, models::UploadPurpose, models::UploadResponse,
            models::TokenResponse, models::UserProfile, models::AuthResponse, models::PublicUser,
            models::ImageView, models::ListingView,
        )
    ),
    tags(
        (name = "listing-board", description = "Classified listings with moderation")
    )
)]
pub struct ApiDoc;

/// AppState
///
/// Unified, cheaply clonable state shared by every request.
#[derive(Clone)]
pub struct AppState {
    /// Persistence: Postgres in deployments, in-memory in tests.
    pub repo: RepositoryState,
    /// Object storage for listing images.
    pub storage: StorageState,
    pub config: AppConfig,
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for StorageState {
    fn from_ref(app_state: &AppState) -> StorageState {
        app_state.storage.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// auth_middleware
///
/// Rejects the request with 401 unless `AuthUser` resolves; handlers behind it re-extract the
/// identity for their own use.
async fn auth_middleware(_auth_user: AuthUser, request: Request, next: Next) -> Response {
    next.run(request).await
}

/// create_router
///
/// Assembles the routing tree, the authentication layers and the observability stack.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");
    let max_image_bytes = state.config.max_image_bytes;

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::public_routes())
        .merge(
            authenticated::authenticated_routes(max_image_bytes)
                .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware)),
        )
        .nest(
            "/admin",
            admin::admin_routes()
                .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware)),
        )
        .with_state(state);

    base_router
        .layer(
            ServiceBuilder::new()
                // Every request gets an x-request-id, echoed back in the response.
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Span for one HTTP request, tagged with its request id so every log line can be correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
