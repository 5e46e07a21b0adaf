use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints available without credentials. Listing reads apply the caller's visibility scope, so
/// anonymous callers only ever see approved listings.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Liveness check for load balancers.
        .route("/health", get(|| async { "ok" }))
        // POST /auth/register, /auth/login
        // Both answer with the user and a bearer token.
        .route("/auth/register", post(handlers::register))
        .route("/auth/login", post(handlers::login))
        // GET /users/{id}
        // Public profile of an active user.
        .route("/users/{id}", get(handlers::get_public_user))
        .route("/categories", get(handlers::list_categories))
        // GET /listings?search=&category=&min_price=&max_price=&ordering=&page=&page_size=
        .route("/listings", get(handlers::list_listings))
        .route("/listings/{id}", get(handlers::get_listing))
}
