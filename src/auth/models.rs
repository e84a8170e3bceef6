//! Authentication data models

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

use crate::common::{ValidationResult, Validator};

/// Supported OAuth providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    Github,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::Github => "github",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google" => Ok(Provider::Google),
            "github" => Ok(Provider::Github),
            other => Err(format!("unsupported provider '{}'", other)),
        }
    }
}

impl TryFrom<String> for Provider {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// User database model
#[derive(FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub image: Option<String>,
    pub created_at: String,
}

/// A provider account linked to a user
#[derive(FromRow, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderIdentity {
    pub id: String,
    pub user_id: String,
    #[sqlx(try_from = "String")]
    pub provider: Provider,
    pub provider_user_id: String,
    pub created_at: String,
}

/// What a provider tells us about the person who just signed in
#[derive(Debug, Clone, PartialEq)]
pub struct AuthAssertion {
    pub provider: Provider,
    pub provider_subject_id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

pub struct AssertionValidator;

impl Validator<AuthAssertion> for AssertionValidator {
    fn validate(&self, data: &AuthAssertion) -> ValidationResult {
        let mut result = ValidationResult::new();

        if data.provider_subject_id.trim().is_empty() {
            result.add_error("provider_subject_id", "must not be empty");
        }
        if data.email.trim().is_empty() {
            result.add_error("email", "must not be empty");
        } else if !data.email.contains('@') {
            result.add_error("email", "must be an email address");
        }

        result
    }
}

/// Pending link as disclosed to the frontend
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PendingLinkView {
    pub email: String,
    pub provider: Provider,
    pub provider_subject_id: String,
    pub existing_providers: Vec<Provider>,
    pub expires_at: String,
}

/// Body of `POST /api/auth/pending-link/confirm`
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmLinkRequest {
    pub email: String,
    pub provider: Provider,
    pub provider_subject_id: String,
}

/// Query string of the OAuth callbacks
#[derive(Deserialize, Debug)]
pub struct OAuthCallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}
