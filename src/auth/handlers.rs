//! Authentication handlers

use axum::{
    extract::{Extension, Json, Path, Query},
    http::HeaderMap,
    response::{IntoResponse, Redirect, Response},
};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use super::cookies::{clear_session_cookie, set_session_cookie, SessionCookie};
use super::extractors::CurrentSession;
use super::identity_store::IdentityError;
use super::linking::{confirm_pending_link, decline_pending_link};
use super::models::{ConfirmLinkRequest, OAuthCallbackQuery, PendingLinkView, Provider};
use super::pending_link::{PendingLink, StagedLink};
use super::providers::OAuthError;
use super::resolver::Resolution;
use super::session::{OAuthState, Session, SessionError};
use crate::common::{generate_oauth_state, safe_email_log, ApiError, AppState};

/// Saves the session and returns the `Set-Cookie` header for it, if any
async fn persist_session(state: &AppState, session: &mut Session) -> Result<HeaderMap, ApiError> {
    let mut headers = HeaderMap::new();
    if state.sessions.save(session).await? {
        let token = state.sessions.encode_cookie_value(&session.id)?;
        let cookie = SessionCookie::new(
            token,
            state.sessions.ttl_secs(),
            state.config.environment,
        );
        set_session_cookie(&mut headers, &cookie);
    }
    Ok(headers)
}

fn parse_provider(raw: &str) -> Result<Provider, ApiError> {
    raw.parse::<Provider>()
        .map_err(|_| ApiError::NotFound(format!("Unknown auth provider '{}'", raw)))
}

fn redirect_with(headers: HeaderMap, location: &str) -> Response {
    (headers, Redirect::to(location)).into_response()
}

/// GET /api/auth/:provider
/// Starts the OAuth flow, or goes straight to the chat when already signed in
pub async fn oauth_start(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    Path(provider): Path<String>,
    CurrentSession(mut session): CurrentSession,
) -> Result<Response, ApiError> {
    let state = state_lock.read().await.clone();
    let provider = parse_provider(&provider)?;

    if session.data.is_authenticated() {
        return Ok(Redirect::to(&state.config.chat_redirect()).into_response());
    }

    let auth_provider = state.providers.get(provider)?;
    let oauth_state = generate_oauth_state();
    let location = auth_provider.authorization_url(&oauth_state);

    session.data.oauth_state = Some(OAuthState {
        provider,
        state: oauth_state,
        created_at: Utc::now(),
    });
    let headers = persist_session(&state, &mut session).await?;

    info!(provider = %provider, "🔐 Starting OAuth sign-in");
    Ok(redirect_with(headers, &location))
}

#[derive(Debug, thiserror::Error)]
enum CallbackError {
    #[error("provider returned an error: {0}")]
    Denied(String),

    #[error(transparent)]
    OAuth(#[from] OAuthError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl CallbackError {
    fn reason(&self) -> &'static str {
        match self {
            CallbackError::Denied(_) => "access_denied",
            CallbackError::OAuth(e) => e.login_error_code(),
            CallbackError::Identity(IdentityError::Validation(_)) => "profile_incomplete",
            CallbackError::Identity(_) | CallbackError::Session(_) => "auth_failed",
        }
    }
}

/// Runs the callback and returns where to send the browser
async fn complete_sign_in(
    state: &AppState,
    provider: Provider,
    query: OAuthCallbackQuery,
    session: &mut Session,
) -> Result<String, CallbackError> {
    if let Some(error) = query.error {
        return Err(CallbackError::Denied(error));
    }

    // The state is single use, whatever the outcome
    let issued = session.data.oauth_state.take();
    let state_ok = match (&issued, &query.state) {
        (Some(issued), Some(returned)) => issued.is_valid_for(provider, returned, Utc::now()),
        _ => false,
    };
    if !state_ok {
        return Err(OAuthError::InvalidState.into());
    }

    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| OAuthError::TokenExchange("missing authorization code".to_string()))?;

    let assertion = state.providers.get(provider)?.fetch_assertion(&code).await?;

    match state.resolver.resolve(&assertion).await? {
        Resolution::Login(user) | Resolution::NewUser(user) => {
            session.data.authenticate(&user.id);
            state.sessions.regenerate(session).await?;
            info!(
                user_id = %user.id,
                email = %safe_email_log(&user.email),
                provider = %provider,
                "✅ Signed in"
            );
            Ok(state.config.chat_redirect())
        }
        Resolution::PendingLink {
            existing_user,
            existing_providers,
        } => {
            session.data.stage_pending_link(PendingLink::new(
                &assertion,
                &existing_user.id,
                existing_providers,
                Utc::now(),
            ));
            Ok(state.config.link_account_redirect())
        }
    }
}

/// GET /api/auth/:provider/callback
pub async fn oauth_callback(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    Path(provider): Path<String>,
    Query(query): Query<OAuthCallbackQuery>,
    CurrentSession(mut session): CurrentSession,
) -> Response {
    let state = state_lock.read().await.clone();
    let provider = match parse_provider(&provider) {
        Ok(p) => p,
        Err(e) => return e.into_response(),
    };

    let location = match complete_sign_in(&state, provider, query, &mut session).await {
        Ok(location) => location,
        Err(e) => {
            warn!(provider = %provider, error = %e, "OAuth callback failed");
            state.config.login_failure_redirect(e.reason())
        }
    };

    match persist_session(&state, &mut session).await {
        Ok(headers) => redirect_with(headers, &location),
        Err(e) => {
            error!(error = %e, "Failed to persist session after OAuth callback");
            Redirect::to(&state.config.login_failure_redirect("auth_failed")).into_response()
        }
    }
}

/// GET /api/auth/me
pub async fn me_handler(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    CurrentSession(session): CurrentSession,
) -> Result<Json<serde_json::Value>, ApiError> {
    let state = state_lock.read().await.clone();

    let user = match &session.data.user_id {
        Some(user_id) => state.identity_store.find_user_by_id(user_id).await?,
        None => None,
    };

    Ok(Json(json!({ "user": user })))
}

/// GET|POST /api/auth/logout
pub async fn logout_handler(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    CurrentSession(session): CurrentSession,
) -> Result<Response, ApiError> {
    let state = state_lock.read().await.clone();

    if !session.is_new {
        state.sessions.destroy(&session.id).await.map_err(|e| {
            error!(error = %e, "Failed to destroy session");
            ApiError::InternalServer("Could not log out".to_string())
        })?;
    }
    if let Some(user_id) = &session.data.user_id {
        info!(user_id = %user_id, "User logged out");
    }

    let mut headers = HeaderMap::new();
    clear_session_cookie(&mut headers, state.config.environment);

    Ok((
        headers,
        Json(json!({ "success": true, "message": "Logged out successfully" })),
    )
        .into_response())
}

/// GET /api/auth/pending-link
pub async fn pending_link_handler(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    CurrentSession(mut session): CurrentSession,
) -> Result<Json<PendingLinkView>, ApiError> {
    let state = state_lock.read().await.clone();

    match session.data.live_pending_link(Utc::now()) {
        StagedLink::Staged(link) => Ok(Json(link.view())),
        StagedLink::Expired => {
            persist_session(&state, &mut session).await?;
            Err(ApiError::NotFound("The pending account link has expired".to_string()))
        }
        StagedLink::Absent => Err(ApiError::NotFound("No pending account link".to_string())),
    }
}

/// POST /api/auth/pending-link/confirm
///
/// # Request Body
/// ```json
/// { "email": "ada@example.com", "provider": "github", "providerSubjectId": "583231" }
/// ```
pub async fn confirm_link_handler(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    CurrentSession(mut session): CurrentSession,
    Json(payload): Json<ConfirmLinkRequest>,
) -> Result<Response, ApiError> {
    let state = state_lock.read().await.clone();

    let outcome = confirm_pending_link(
        state.identity_store.as_ref(),
        &mut session.data,
        &payload,
        Utc::now(),
    )
    .await;

    match outcome {
        Ok(user) => {
            state.sessions.regenerate(&mut session).await?;
            let headers = persist_session(&state, &mut session).await?;
            Ok((headers, Json(json!({ "success": true, "user": user }))).into_response())
        }
        Err(e) => {
            let headers = persist_session(&state, &mut session).await?;
            Ok((headers, ApiError::from(e)).into_response())
        }
    }
}

/// POST /api/auth/pending-link/decline
pub async fn decline_link_handler(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    CurrentSession(mut session): CurrentSession,
) -> Result<Response, ApiError> {
    let state = state_lock.read().await.clone();

    decline_pending_link(&mut session.data);
    let headers = persist_session(&state, &mut session).await?;

    Ok((headers, Json(json!({ "success": true }))).into_response())
}

