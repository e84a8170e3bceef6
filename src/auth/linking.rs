//! Completing or declining a staged account link

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::identity_store::{IdentityError, IdentityStore};
use super::models::{ConfirmLinkRequest, User};
use super::pending_link::StagedLink;
use super::session::SessionData;
use crate::common::{safe_email_log, ApiError};

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("No pending account link")]
    NoPendingLink,

    #[error("The pending account link has expired")]
    Expired,

    #[error("Link request does not match the pending account link")]
    Mismatch,

    #[error("{0}")]
    Conflict(String),

    #[error("The account to link no longer exists")]
    UserGone,

    #[error(transparent)]
    Store(IdentityError),
}

impl From<LinkError> for ApiError {
    fn from(err: LinkError) -> Self {
        match err {
            LinkError::NoPendingLink | LinkError::Expired | LinkError::UserGone => {
                ApiError::NotFound(err.to_string())
            }
            LinkError::Mismatch => ApiError::Forbidden(err.to_string()),
            LinkError::Conflict(msg) => ApiError::Conflict(msg),
            LinkError::Store(e) => e.into(),
        }
    }
}

/// Attaches the staged identity to the existing account
///
/// On success the session is authenticated as the existing user and the staged
/// link is gone. Failures that can never succeed on retry (conflicts, a
/// deleted user, expiry) also drop the staged link; a mismatched request or a
/// database failure leaves it in place. The caller persists `session` either way.
pub async fn confirm_pending_link(
    store: &dyn IdentityStore,
    session: &mut SessionData,
    request: &ConfirmLinkRequest,
    now: DateTime<Utc>,
) -> Result<User, LinkError> {
    let link = match session.live_pending_link(now) {
        StagedLink::Absent => return Err(LinkError::NoPendingLink),
        StagedLink::Expired => {
            info!("Pending link expired before confirmation");
            return Err(LinkError::Expired);
        }
        StagedLink::Staged(link) => link,
    };

    if !link.matches(request) {
        warn!(
            email = %safe_email_log(&request.email),
            provider = %request.provider,
            "Link confirmation does not match the staged link"
        );
        return Err(LinkError::Mismatch);
    }

    match store
        .link_identity(&link.existing_user_id, link.provider, &link.provider_subject_id)
        .await
    {
        Ok(_) => {}
        Err(IdentityError::Conflict(reason)) => {
            let owner = store
                .find_identity(link.provider, &link.provider_subject_id)
                .await
                .map_err(LinkError::Store)?;

            match owner {
                Some(identity) if identity.user_id == link.existing_user_id => {
                    info!(
                        user_id = %link.existing_user_id,
                        provider = %link.provider,
                        "Identity already linked to this user, treating confirm as done"
                    );
                }
                _ => {
                    warn!(
                        user_id = %link.existing_user_id,
                        provider = %link.provider,
                        reason = %reason,
                        "Pending link can no longer be applied"
                    );
                    session.clear_pending_link();
                    return Err(LinkError::Conflict(format!(
                        "This {} account cannot be linked to the existing user",
                        link.provider
                    )));
                }
            }
        }
        Err(IdentityError::UserNotFound(_)) => {
            session.clear_pending_link();
            return Err(LinkError::UserGone);
        }
        Err(e) => return Err(LinkError::Store(e)),
    }

    let user = match store
        .find_user_by_id(&link.existing_user_id)
        .await
        .map_err(LinkError::Store)?
    {
        Some(user) => user,
        None => {
            session.clear_pending_link();
            return Err(LinkError::UserGone);
        }
    };

    session.authenticate(&user.id);

    info!(
        user_id = %user.id,
        email = %safe_email_log(&user.email),
        provider = %link.provider,
        "Account link confirmed"
    );

    Ok(user)
}

/// Drops the staged link; returns whether one was present
pub fn decline_pending_link(session: &mut SessionData) -> bool {
    let had_link = session.pending_link.is_some();
    session.clear_pending_link();
    if had_link {
        info!("Pending account link declined");
    }
    had_link
}
