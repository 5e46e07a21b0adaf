use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, patch, post},
};

/// Admin Router Module
///
/// Moderation endpoints (moderators and staff) and catalog/account administration (staff only).
/// The role check for each endpoint lives in the policy module, so a moderator calling a staff
/// endpoint gets 403.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // GET /admin/listings?status=pending
        // Review queue over every listing regardless of status.
        .route("/listings", get(handlers::admin_list_listings))
        // PATCH /admin/listings/{id}/moderate
        // Approve or reject; appends to the moderation log.
        .route("/listings/{id}/moderate", patch(handlers::moderate_listing))
        .route("/listings/{id}/moderation", get(handlers::moderation_history))
        .route("/categories", post(handlers::create_category))
        // DELETE /admin/categories/{id}
        // Refused with 409 while listings still reference the category.
        .route("/categories/{id}", axum::routing::delete(handlers::delete_category))
        // GET /admin/users?search=ivan&ordering=username
        .route("/users", get(handlers::list_users))
        .route(
            "/users/{id}",
            patch(handlers::set_user_active).delete(handlers::delete_user),
        )
}
