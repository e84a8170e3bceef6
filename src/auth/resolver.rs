//! Maps a provider assertion onto a login, a new account, or a pending link

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::identity_store::{IdentityError, IdentityStore};
use super::models::{AssertionValidator, AuthAssertion, Provider, User};
use crate::common::{safe_email_log, Validator};

/// Attempts made when a new-user insert keeps losing unique-constraint races
pub const MAX_RESOLVE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The identity is already linked; sign in as its owner
    Login(User),
    /// No identity and no user with this email; both were created
    NewUser(User),
    /// The email belongs to an account that does not have this identity yet
    PendingLink {
        existing_user: User,
        existing_providers: Vec<Provider>,
    },
}

pub struct IdentityResolver {
    store: Arc<dyn IdentityStore>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, assertion: &AuthAssertion) -> Result<Resolution, IdentityError> {
        AssertionValidator
            .validate(assertion)
            .into_result()
            .map_err(|result| {
                let messages: Vec<String> = result
                    .errors
                    .iter()
                    .map(|e| format!("{}: {}", e.field, e.message))
                    .collect();
                IdentityError::Validation(messages.join(", "))
            })?;

        for attempt in 1..=MAX_RESOLVE_ATTEMPTS {
            if let Some(user) = self
                .store
                .find_user_by_identity(assertion.provider, &assertion.provider_subject_id)
                .await?
            {
                debug!(
                    user_id = %user.id,
                    provider = %assertion.provider,
                    "Identity already linked, logging in"
                );
                return Ok(Resolution::Login(user));
            }

            if let Some(existing_user) = self.store.find_user_by_email(&assertion.email).await? {
                let existing_providers = self.store.list_providers(&existing_user.id).await?;
                info!(
                    user_id = %existing_user.id,
                    email = %safe_email_log(&assertion.email),
                    provider = %assertion.provider,
                    existing_providers = ?existing_providers,
                    "Email already registered under another provider, link required"
                );
                return Ok(Resolution::PendingLink {
                    existing_user,
                    existing_providers,
                });
            }

            match self.store.create_user_with_identity(assertion).await {
                Ok(user) => return Ok(Resolution::NewUser(user)),
                Err(IdentityError::Conflict(reason)) => {
                    warn!(
                        attempt = attempt,
                        email = %safe_email_log(&assertion.email),
                        reason = %reason,
                        "Concurrent sign-up detected, re-resolving"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(IdentityError::Conflict(format!(
            "identity could not be resolved after {} attempts",
            MAX_RESOLVE_ATTEMPTS
        )))
    }
}
