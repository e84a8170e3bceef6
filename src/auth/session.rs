//! Server-side sessions stored in the `sessions` table
//!
//! The browser only holds a signed envelope around the session id; everything
//! else (the authenticated user, a staged account link, the OAuth `state`)
//! lives in the database as JSON.

use axum::http::HeaderMap;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::cookies::get_cookie_value;
use super::models::Provider;
use super::pending_link::PendingLink;
use crate::common::{generate_session_id, safe_token_log, ApiError};

pub const SESSION_COOKIE_NAME: &str = "infoplus.sid";
pub const SESSION_TTL_DAYS: i64 = 7;
const OAUTH_STATE_TTL_MINUTES: i64 = 10;
const CLEANUP_INTERVAL_SECS: u64 = 600;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Session payload could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Session token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Database(e) => ApiError::DatabaseError(e),
            other => {
                error!(error = %other, "Session store failure");
                ApiError::InternalServer("session could not be processed".to_string())
            }
        }
    }
}

/// OAuth `state` issued when a sign-in starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthState {
    pub provider: Provider,
    pub state: String,
    pub created_at: DateTime<Utc>,
}

impl OAuthState {
    pub fn is_valid_for(&self, provider: Provider, state: &str, now: DateTime<Utc>) -> bool {
        self.provider == provider
            && self.state == state
            && now < self.created_at + Duration::minutes(OAUTH_STATE_TTL_MINUTES)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_link: Option<PendingLink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_state: Option<OAuthState>,
}

impl SessionData {
    pub fn is_empty(&self) -> bool {
        self.user_id.is_none() && self.pending_link.is_none() && self.oauth_state.is_none()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }

    /// Marks the session as signed in; any staged link is dropped
    pub fn authenticate(&mut self, user_id: &str) {
        self.user_id = Some(user_id.to_string());
        self.pending_link = None;
        self.oauth_state = None;
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub data: SessionData,
    /// True until the session has been written to the store
    pub is_new: bool,
}

impl Session {
    fn fresh() -> Self {
        Self {
            id: generate_session_id(),
            data: SessionData::default(),
            is_new: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    sub: String,
    exp: usize,
}

pub struct SessionStore {
    db: SqlitePool,
    secret: String,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(db: SqlitePool, secret: String) -> Self {
        Self {
            db,
            secret,
            ttl: Duration::days(SESSION_TTL_DAYS),
        }
    }

    pub fn ttl_secs(&self) -> i64 {
        self.ttl.num_seconds()
    }

    /// Signs the session id into the cookie value
    pub fn encode_cookie_value(&self, session_id: &str) -> Result<String, SessionError> {
        let claims = SessionClaims {
            sub: session_id.to_string(),
            exp: (Utc::now() + self.ttl).timestamp() as usize,
        };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?;

        Ok(token)
    }

    /// Returns the session id from a cookie value when the signature and expiry hold
    pub fn decode_cookie_value(&self, token: &str) -> Option<String> {
        match decode::<SessionClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        ) {
            Ok(data) => Some(data.claims.sub),
            Err(e) => {
                debug!(error = %e, token = %safe_token_log(token), "Rejected session cookie");
                None
            }
        }
    }

    /// Loads the session named by the request cookie, or starts a new one
    pub async fn load_from_headers(&self, headers: &HeaderMap) -> Result<Session, SessionError> {
        let Some(session_id) = get_cookie_value(headers, SESSION_COOKIE_NAME)
            .and_then(|token| self.decode_cookie_value(&token))
        else {
            return Ok(Session::fresh());
        };

        match self.load(&session_id).await? {
            Some(data) => Ok(Session {
                id: session_id,
                data,
                is_new: false,
            }),
            None => Ok(Session::fresh()),
        }
    }

    /// Reads a live session payload
    pub async fn load(&self, session_id: &str) -> Result<Option<SessionData>, SessionError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT sess FROM sessions WHERE sid = ? AND expire > ?")
                .bind(session_id)
                .bind(Utc::now().timestamp())
                .fetch_optional(&self.db)
                .await?;

        match row {
            Some((payload,)) => match serde_json::from_str::<SessionData>(&payload) {
                Ok(data) => Ok(Some(data)),
                Err(e) => {
                    warn!(error = %e, "Discarding unreadable session payload");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// Persists the session and extends its lifetime
    ///
    /// A new session with nothing in it is not written. Returns whether the
    /// session is stored (and so whether the client needs a cookie).
    pub async fn save(&self, session: &mut Session) -> Result<bool, SessionError> {
        if session.is_new && session.data.is_empty() {
            return Ok(false);
        }

        let payload = serde_json::to_string(&session.data)?;
        let expire = (Utc::now() + self.ttl).timestamp();

        sqlx::query(
            r#"
            INSERT INTO sessions (sid, sess, expire) VALUES (?, ?, ?)
            ON CONFLICT(sid) DO UPDATE SET sess = excluded.sess, expire = excluded.expire
            "#,
        )
        .bind(&session.id)
        .bind(&payload)
        .bind(expire)
        .execute(&self.db)
        .await?;

        session.is_new = false;
        Ok(true)
    }

    pub async fn destroy(&self, session_id: &str) -> Result<(), SessionError> {
        sqlx::query("DELETE FROM sessions WHERE sid = ?")
            .bind(session_id)
            .execute(&self.db)
            .await?;

        debug!(session = %safe_token_log(session_id), "Session destroyed");
        Ok(())
    }

    /// Moves the session to a new id, keeping its data
    ///
    /// The data is written under the new id before the old row goes, so a
    /// failed write leaves the client on its previous session.
    pub async fn regenerate(&self, session: &mut Session) -> Result<(), SessionError> {
        let previous_id = std::mem::replace(&mut session.id, generate_session_id());
        let was_new = std::mem::replace(&mut session.is_new, true);

        if let Err(e) = self.save(session).await {
            session.id = previous_id;
            session.is_new = was_new;
            return Err(e);
        }

        if !was_new {
            self.destroy(&previous_id).await?;
        }
        Ok(())
    }

    pub async fn prune_expired(&self) -> Result<u64, SessionError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expire <= ?")
            .bind(Utc::now().timestamp())
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }

    /// Start background task for pruning expired sessions
    pub fn start_cleanup_task(store: Arc<SessionStore>) {
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(CLEANUP_INTERVAL_SECS));
            loop {
                interval.tick().await;
                match store.prune_expired().await {
                    Ok(0) => {}
                    Ok(removed) => info!(removed = removed, "Pruned expired sessions"),
                    Err(e) => error!(error = %e, "Failed to prune expired sessions"),
                }
            }
        });
    }
}
