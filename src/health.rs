// src/health.rs
//! Service banner, health probes and the JSON 404 fallback

use axum::{
    extract::Extension,
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, warn};

use crate::auth::extractors::CurrentSession;
use crate::auth::pending_link::StagedLink;
use crate::common::{safe_token_log, ApiError, AppState};

const SERVICE_NAME: &str = "InfoPlus Backend API is running";

pub fn health_routes() -> Router {
    Router::new()
        .route("/", get(banner))
        .route("/api/health", get(health))
        .route("/api/db-test", get(db_test))
}

/// GET /
async fn banner(Extension(state_lock): Extension<Arc<RwLock<AppState>>>) -> Json<serde_json::Value> {
    let state = state_lock.read().await.clone();

    Json(json!({
        "message": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.environment.as_str(),
        "endpoints": {
            "health": "/api/health",
            "auth": "/api/auth",
            "chat": "/api/chat",
        },
    }))
}

/// GET /api/health
async fn health(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    CurrentSession(mut session): CurrentSession,
) -> Result<Json<serde_json::Value>, ApiError> {
    let state = state_lock.read().await.clone();

    let user = match &session.data.user_id {
        Some(user_id) => state.identity_store.find_user_by_id(user_id).await?,
        None => None,
    };
    let pending_link = matches!(
        session.data.live_pending_link(Utc::now()),
        StagedLink::Staged(_)
    );

    Ok(Json(json!({
        "status": "UP",
        "user": user,
        "session": {
            "id": safe_token_log(&session.id),
            "exists": !session.is_new,
            "authenticated": user.is_some(),
            "pendingLink": pending_link,
        },
        "environment": state.config.environment.as_str(),
    })))
}

/// GET /api/db-test
async fn db_test(Extension(state_lock): Extension<Arc<RwLock<AppState>>>) -> Response {
    let state = state_lock.read().await.clone();

    match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => Json(json!({ "database": "Connected ✅" })).into_response(),
        Err(e) => {
            error!(error = %e, "Database probe failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "database": "Failed ❌", "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// Fallback for unknown routes
pub async fn not_found(method: Method, uri: Uri) -> impl IntoResponse {
    warn!(method = %method, path = %uri.path(), "404 Not Found");
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "success": false,
            "error": format!("Endpoint {} {} not found", method, uri.path()),
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_not_found_body() {
        let response = not_found(Method::DELETE, Uri::from_static("/api/nope?x=1"))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Endpoint DELETE /api/nope not found");
    }
}
