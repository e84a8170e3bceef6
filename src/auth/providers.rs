//! OAuth authorization-code flows for Google and GitHub

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::models::{AuthAssertion, Provider};
use crate::common::config::{AppConfig, OAuthClientConfig};
use crate::common::{safe_email_log, ApiError};

const GOOGLE_AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v3/userinfo";

const GITHUB_AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
const GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const GITHUB_USER_URL: &str = "https://api.github.com/user";
const GITHUB_EMAILS_URL: &str = "https://api.github.com/user/emails";
const GITHUB_USER_AGENT: &str = "infoplus-api";

#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("OAuth provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("OAuth token exchange failed: {0}")]
    TokenExchange(String),

    #[error("OAuth profile is incomplete: {0}")]
    Profile(String),

    #[error("OAuth state is missing or invalid")]
    InvalidState,

    #[error("OAuth provider {0} is not configured")]
    NotConfigured(Provider),
}

impl OAuthError {
    /// Short reason passed to the frontend login page
    pub fn login_error_code(&self) -> &'static str {
        match self {
            OAuthError::InvalidState => "invalid_state",
            OAuthError::Profile(_) => "profile_incomplete",
            OAuthError::Http(_) | OAuthError::TokenExchange(_) | OAuthError::NotConfigured(_) => {
                "auth_failed"
            }
        }
    }
}

impl From<OAuthError> for ApiError {
    fn from(err: OAuthError) -> Self {
        match err {
            OAuthError::InvalidState => ApiError::BadRequest(err.to_string()),
            OAuthError::Profile(msg) => ApiError::ValidationError(msg),
            OAuthError::NotConfigured(_) => ApiError::NotFound(err.to_string()),
            OAuthError::Http(_) | OAuthError::TokenExchange(_) => {
                ApiError::ServiceUnavailable(err.to_string())
            }
        }
    }
}

/// An OAuth provider able to run the authorization-code flow
#[async_trait]
pub trait AuthProvider: Send + Sync {
    fn kind(&self) -> Provider;

    /// URL the browser is sent to, carrying our `state`
    fn authorization_url(&self, state: &str) -> String;

    /// Exchanges the callback `code` and reads the user's profile
    async fn fetch_assertion(&self, code: &str) -> Result<AuthAssertion, OAuthError>;
}

fn callback_url(backend_url: &str, provider: Provider) -> String {
    format!("{}/api/auth/{}/callback", backend_url, provider)
}

fn build_authorization_url(
    base: &str,
    client_id: &str,
    redirect_uri: &str,
    scope: &str,
    state: &str,
) -> String {
    format!(
        "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
        base,
        urlencoding::encode(client_id),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(scope),
        urlencoding::encode(state)
    )
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

impl TokenResponse {
    fn into_access_token(self) -> Result<String, OAuthError> {
        match self.access_token {
            Some(token) if !token.is_empty() => Ok(token),
            _ => Err(OAuthError::TokenExchange(
                self.error_description
                    .or(self.error)
                    .unwrap_or_else(|| "no access token returned".to_string()),
            )),
        }
    }
}

// ============================================================================
// GOOGLE
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct GoogleUserInfo {
    pub sub: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
}

impl GoogleUserInfo {
    pub fn into_assertion(self) -> Result<AuthAssertion, OAuthError> {
        let email = non_blank(self.email)
            .ok_or_else(|| OAuthError::Profile("Google account has no email".to_string()))?;

        Ok(AuthAssertion {
            provider: Provider::Google,
            provider_subject_id: self.sub,
            email,
            display_name: non_blank(self.name).or_else(|| Some("User".to_string())),
            avatar_url: non_blank(self.picture),
        })
    }
}

pub struct GoogleOAuth {
    http: Client,
    client: OAuthClientConfig,
    redirect_uri: String,
}

impl GoogleOAuth {
    pub fn new(http: Client, client: OAuthClientConfig, backend_url: &str) -> Self {
        Self {
            http,
            client,
            redirect_uri: callback_url(backend_url, Provider::Google),
        }
    }
}

#[async_trait]
impl AuthProvider for GoogleOAuth {
    fn kind(&self) -> Provider {
        Provider::Google
    }

    fn authorization_url(&self, state: &str) -> String {
        build_authorization_url(
            GOOGLE_AUTHORIZE_URL,
            &self.client.client_id,
            &self.redirect_uri,
            "profile email",
            state,
        )
    }

    async fn fetch_assertion(&self, code: &str) -> Result<AuthAssertion, OAuthError> {
        let token: TokenResponse = self
            .http
            .post(GOOGLE_TOKEN_URL)
            .form(&[
                ("code", code),
                ("client_id", self.client.client_id.as_str()),
                ("client_secret", self.client.client_secret.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await?
            .json()
            .await?;
        let access_token = token.into_access_token()?;

        let response = self
            .http
            .get(GOOGLE_USERINFO_URL)
            .bearer_auth(&access_token)
            .send()
            .await?;
        if !response.status().is_success() {
            error!(http_status = %response.status(), "Google userinfo request failed");
            return Err(OAuthError::TokenExchange(format!(
                "userinfo returned {}",
                response.status()
            )));
        }

        let profile: GoogleUserInfo = response.json().await?;
        let assertion = profile.into_assertion()?;
        debug!(
            email = %safe_email_log(&assertion.email),
            "Google profile received"
        );
        Ok(assertion)
    }
}

// ============================================================================
// GITHUB
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct GitHubUser {
    pub id: u64,
    pub login: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GitHubEmail {
    pub email: String,
    pub primary: bool,
    pub verified: bool,
}

/// Picks the primary verified address, else any verified one
pub fn select_github_email(emails: &[GitHubEmail]) -> Option<String> {
    emails
        .iter()
        .find(|e| e.primary && e.verified)
        .or_else(|| emails.iter().find(|e| e.verified))
        .map(|e| e.email.clone())
}

impl GitHubUser {
    pub fn into_assertion(self, fallback_email: Option<String>) -> Result<AuthAssertion, OAuthError> {
        let email = non_blank(self.email)
            .or(fallback_email)
            .ok_or_else(|| {
                OAuthError::Profile("GitHub account has no verified email".to_string())
            })?;

        Ok(AuthAssertion {
            provider: Provider::Github,
            provider_subject_id: self.id.to_string(),
            email,
            display_name: non_blank(self.name).or(Some(self.login)),
            avatar_url: non_blank(self.avatar_url),
        })
    }
}

pub struct GitHubOAuth {
    http: Client,
    client: OAuthClientConfig,
    redirect_uri: String,
}

impl GitHubOAuth {
    pub fn new(http: Client, client: OAuthClientConfig, backend_url: &str) -> Self {
        Self {
            http,
            client,
            redirect_uri: callback_url(backend_url, Provider::Github),
        }
    }

    async fn fetch_emails(&self, access_token: &str) -> Result<Vec<GitHubEmail>, OAuthError> {
        let response = self
            .http
            .get(GITHUB_EMAILS_URL)
            .bearer_auth(access_token)
            .header(reqwest::header::USER_AGENT, GITHUB_USER_AGENT)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await?;

        if !response.status().is_success() {
            warn!(http_status = %response.status(), "GitHub email listing failed");
            return Ok(Vec::new());
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl AuthProvider for GitHubOAuth {
    fn kind(&self) -> Provider {
        Provider::Github
    }

    fn authorization_url(&self, state: &str) -> String {
        build_authorization_url(
            GITHUB_AUTHORIZE_URL,
            &self.client.client_id,
            &self.redirect_uri,
            "user:email",
            state,
        )
    }

    async fn fetch_assertion(&self, code: &str) -> Result<AuthAssertion, OAuthError> {
        let token: TokenResponse = self
            .http
            .post(GITHUB_TOKEN_URL)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[
                ("code", code),
                ("client_id", self.client.client_id.as_str()),
                ("client_secret", self.client.client_secret.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
            ])
            .send()
            .await?
            .json()
            .await?;
        let access_token = token.into_access_token()?;

        let response = self
            .http
            .get(GITHUB_USER_URL)
            .bearer_auth(&access_token)
            .header(reqwest::header::USER_AGENT, GITHUB_USER_AGENT)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await?;
        if !response.status().is_success() {
            error!(http_status = %response.status(), "GitHub user request failed");
            return Err(OAuthError::TokenExchange(format!(
                "user endpoint returned {}",
                response.status()
            )));
        }
        let profile: GitHubUser = response.json().await?;

        // Private profile emails only show up in the email listing
        let fallback_email = if non_blank(profile.email.clone()).is_none() {
            select_github_email(&self.fetch_emails(&access_token).await?)
        } else {
            None
        };

        let assertion = profile.into_assertion(fallback_email)?;
        debug!(
            email = %safe_email_log(&assertion.email),
            "GitHub profile received"
        );
        Ok(assertion)
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

pub struct ProviderRegistry {
    providers: HashMap<Provider, Arc<dyn AuthProvider>>,
}

impl ProviderRegistry {
    pub fn new(providers: Vec<Arc<dyn AuthProvider>>) -> Self {
        Self {
            providers: providers.into_iter().map(|p| (p.kind(), p)).collect(),
        }
    }

    pub fn from_config(config: &AppConfig, http: &Client) -> Self {
        let google: Arc<dyn AuthProvider> = Arc::new(GoogleOAuth::new(
            http.clone(),
            config.google.clone(),
            &config.backend_url,
        ));
        let github: Arc<dyn AuthProvider> = Arc::new(GitHubOAuth::new(
            http.clone(),
            config.github.clone(),
            &config.backend_url,
        ));
        Self::new(vec![google, github])
    }

    pub fn get(&self, provider: Provider) -> Result<Arc<dyn AuthProvider>, OAuthError> {
        self.providers
            .get(&provider)
            .cloned()
            .ok_or(OAuthError::NotConfigured(provider))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::tests::test_config;

    #[test]
    fn test_authorization_urls() {
        let config = test_config();
        let registry = ProviderRegistry::from_config(&config, &Client::new());

        let google = registry.get(Provider::Google).unwrap().authorization_url("st4te");
        assert!(google.starts_with(GOOGLE_AUTHORIZE_URL));
        assert!(google.contains("client_id=google-id"));
        assert!(google.contains("scope=profile%20email"));
        assert!(google.contains("state=st4te"));
        assert!(google.contains(
            "redirect_uri=http%3A%2F%2Flocalhost%3A4000%2Fapi%2Fauth%2Fgoogle%2Fcallback"
        ));

        let github = registry.get(Provider::Github).unwrap().authorization_url("s");
        assert!(github.starts_with(GITHUB_AUTHORIZE_URL));
        assert!(github.contains("scope=user%3Aemail"));
    }

    #[test]
    fn test_google_profile_mapping() {
        let profile: GoogleUserInfo = serde_json::from_value(serde_json::json!({
            "sub": "1098",
            "email": "ada@example.com",
            "name": "Ada",
            "picture": "https://img/ada.png"
        }))
        .unwrap();
        let assertion = profile.into_assertion().unwrap();
        assert_eq!(assertion.provider, Provider::Google);
        assert_eq!(assertion.provider_subject_id, "1098");
        assert_eq!(assertion.display_name.as_deref(), Some("Ada"));

        let no_email: GoogleUserInfo =
            serde_json::from_value(serde_json::json!({ "sub": "1" })).unwrap();
        assert!(matches!(no_email.into_assertion(), Err(OAuthError::Profile(_))));
    }

    #[test]
    fn test_github_profile_falls_back_to_login_and_email_listing() {
        let profile: GitHubUser = serde_json::from_value(serde_json::json!({
            "id": 583231,
            "login": "octocat",
            "name": null,
            "email": null,
            "avatar_url": "https://avatars/octocat"
        }))
        .unwrap();

        let emails = vec![
            GitHubEmail {
                email: "old@example.com".to_string(),
                primary: false,
                verified: true,
            },
            GitHubEmail {
                email: "octo@example.com".to_string(),
                primary: true,
                verified: true,
            },
        ];

        let assertion = profile
            .into_assertion(select_github_email(&emails))
            .unwrap();
        assert_eq!(assertion.provider_subject_id, "583231");
        assert_eq!(assertion.email, "octo@example.com");
        assert_eq!(assertion.display_name.as_deref(), Some("octocat"));
    }

    #[test]
    fn test_github_unverified_emails_ignored() {
        let emails = vec![GitHubEmail {
            email: "x@example.com".to_string(),
            primary: true,
            verified: false,
        }];
        assert_eq!(select_github_email(&emails), None);
    }

    #[test]
    fn test_token_error_is_reported() {
        let token: TokenResponse = serde_json::from_value(serde_json::json!({
            "error": "bad_verification_code",
            "error_description": "The code passed is incorrect or expired."
        }))
        .unwrap();
        match token.into_access_token() {
            Err(OAuthError::TokenExchange(msg)) => assert!(msg.contains("incorrect")),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
