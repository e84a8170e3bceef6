//! Account link awaiting the user's decision
//!
//! At most one link is staged per session. Staging signs the session out, and
//! a staged link is only visible for [`PENDING_LINK_TTL_MINUTES`] after it was
//! created.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::models::{AuthAssertion, ConfirmLinkRequest, PendingLinkView, Provider};
use super::session::SessionData;

pub const PENDING_LINK_TTL_MINUTES: i64 = 15;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingLink {
    pub email: String,
    pub provider: Provider,
    pub provider_subject_id: String,
    pub existing_user_id: String,
    pub existing_providers: Vec<Provider>,
    pub staged_at: DateTime<Utc>,
}

impl PendingLink {
    pub fn new(
        assertion: &AuthAssertion,
        existing_user_id: &str,
        existing_providers: Vec<Provider>,
        staged_at: DateTime<Utc>,
    ) -> Self {
        Self {
            email: assertion.email.clone(),
            provider: assertion.provider,
            provider_subject_id: assertion.provider_subject_id.clone(),
            existing_user_id: existing_user_id.to_string(),
            existing_providers,
            staged_at,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.staged_at + Duration::minutes(PENDING_LINK_TTL_MINUTES)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    /// Exact match on email, provider and subject id
    pub fn matches(&self, request: &ConfirmLinkRequest) -> bool {
        self.email == request.email
            && self.provider == request.provider
            && self.provider_subject_id == request.provider_subject_id
    }

    pub fn view(&self) -> PendingLinkView {
        PendingLinkView {
            email: self.email.clone(),
            provider: self.provider,
            provider_subject_id: self.provider_subject_id.clone(),
            existing_providers: self.existing_providers.clone(),
            expires_at: self.expires_at().to_rfc3339(),
        }
    }
}

/// Outcome of looking at the staged link
#[derive(Debug, Clone, PartialEq)]
pub enum StagedLink {
    Absent,
    Expired,
    Staged(PendingLink),
}

impl SessionData {
    /// Stages a link, replacing any earlier one and signing the session out
    pub fn stage_pending_link(&mut self, link: PendingLink) {
        self.user_id = None;
        self.oauth_state = None;
        self.pending_link = Some(link);
    }

    /// Returns the staged link, dropping it from the session when it has expired
    pub fn live_pending_link(&mut self, now: DateTime<Utc>) -> StagedLink {
        match self.pending_link.take() {
            None => StagedLink::Absent,
            Some(link) if link.is_expired(now) => StagedLink::Expired,
            Some(link) => {
                self.pending_link = Some(link.clone());
                StagedLink::Staged(link)
            }
        }
    }

    pub fn clear_pending_link(&mut self) {
        self.pending_link = None;
    }
}
