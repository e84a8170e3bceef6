//! Session extractors for Axum

use async_trait::async_trait;
use axum::{
    extract::{Extension, FromRequestParts},
    http::request::Parts,
};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::models::User;
use super::session::Session;
use crate::common::{safe_email_log, ApiError, AppState};

pub const UNAUTHORIZED_CHAT_MESSAGE: &str = "Unauthorized: Please log in to use the AI chat.";

async fn app_state<S>(parts: &mut Parts, state: &S) -> Result<AppState, ApiError>
where
    S: Send + Sync,
{
    let Extension(state_lock): Extension<Arc<RwLock<AppState>>> =
        Extension::from_request_parts(parts, state)
            .await
            .map_err(|_| ApiError::InternalServer("missing app state".to_string()))?;

    let app_state = state_lock.read().await.clone();
    Ok(app_state)
}

/// The caller's session, new and unsaved when no valid cookie was sent
#[derive(Debug)]
pub struct CurrentSession(pub Session);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentSession
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = app_state(parts, state).await?;
        let session = app_state.sessions.load_from_headers(&parts.headers).await?;
        Ok(CurrentSession(session))
    }
}

/// Authenticated user extractor
///
/// Rejects with 401 unless the session is signed in as a user that still exists.
#[derive(Debug)]
pub struct AuthedUser {
    pub id: String,
    pub email: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = app_state(parts, state).await?;
        let session = app_state.sessions.load_from_headers(&parts.headers).await?;

        let Some(user_id) = session.data.user_id.clone() else {
            debug!(path = %parts.uri.path(), "Rejected unauthenticated request");
            return Err(ApiError::Unauthorized(UNAUTHORIZED_CHAT_MESSAGE.to_string()));
        };

        let user: Option<User> = app_state.identity_store.find_user_by_id(&user_id).await?;

        match user {
            Some(u) => {
                debug!(
                    user_id = %u.id,
                    email = %safe_email_log(&u.email),
                    "User authentication successful via extractor"
                );
                Ok(AuthedUser {
                    id: u.id,
                    email: u.email,
                })
            }
            None => {
                warn!(user_id = %user_id, "Authentication failed: session user no longer exists");
                Err(ApiError::Unauthorized(UNAUTHORIZED_CHAT_MESSAGE.to_string()))
            }
        }
    }
}
