//! Authentication routes

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers;

/// Creates and returns the authentication router
///
/// # Routes
/// - `GET /api/auth/:provider` - Start Google/GitHub sign-in
/// - `GET /api/auth/:provider/callback` - OAuth callback
/// - `GET /api/auth/me` - Current user or `null`
/// - `GET|POST /api/auth/logout` - Destroy the session
/// - `GET /api/auth/pending-link` - Staged account link awaiting a decision
/// - `POST /api/auth/pending-link/confirm` - Link the new provider to the existing account
/// - `POST /api/auth/pending-link/decline` - Drop the staged link
pub fn auth_routes() -> Router {
    Router::new()
        .route("/api/auth/me", get(handlers::me_handler))
        .route(
            "/api/auth/logout",
            get(handlers::logout_handler).post(handlers::logout_handler),
        )
        .route("/api/auth/pending-link", get(handlers::pending_link_handler))
        .route(
            "/api/auth/pending-link/confirm",
            post(handlers::confirm_link_handler),
        )
        .route(
            "/api/auth/pending-link/decline",
            post(handlers::decline_link_handler),
        )
        .route("/api/auth/:provider", get(handlers::oauth_start))
        .route("/api/auth/:provider/callback", get(handlers::oauth_callback))
}
