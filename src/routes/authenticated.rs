use crate::{AppState, handlers};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, patch, post},
};

/// Authenticated Router Module
///
/// Every route here sits behind the authentication layer added in `create_router`. Ownership of a
/// listing is decided by the policy module, not by the route.
pub fn authenticated_routes(max_image_bytes: usize) -> Router<AppState> {
    Router::<AppState>::new()
        .route("/auth/me", get(handlers::get_me))
        // GET/PATCH /auth/profile
        .route(
            "/auth/profile",
            get(handlers::get_profile).patch(handlers::update_profile),
        )
        // GET /listings/my
        // The caller's listings in every moderation status.
        .route("/listings/my", get(handlers::my_listings))
        .route("/listings", post(handlers::create_listing))
        // PATCH/DELETE /listings/{id}
        // Author only. An edit sends the listing back to moderation.
        .route(
            "/listings/{id}",
            patch(handlers::update_listing).delete(handlers::delete_listing),
        )
        // POST /upload/presigned
        // Short-lived PUT URL for uploading an image straight to object storage.
        .route("/upload/presigned", post(handlers::get_presigned_url))
        // POST /upload/images
        // Direct upload through the API, bounded by MAX_IMAGE_BYTES.
        .route(
            "/upload/images",
            post(handlers::upload_image).layer(DefaultBodyLimit::max(max_image_bytes)),
        )
}
