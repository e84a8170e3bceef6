// src/common/config.rs
//! Environment configuration
//!
//! Every required variable is checked at startup and all problems are reported
//! together; the server refuses to start with an incomplete environment.

use std::env;
use std::fmt;

const DEFAULT_PORT: u16 = 4000;
const DEFAULT_DATABASE_URL: &str = "sqlite://infoplus.db";
const DEFAULT_OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_OPENROUTER_MODEL: &str = "xiaomi/mimo-v2-flash:free";
const DEV_ORIGINS: [&str; 2] = ["http://localhost:3000", "http://localhost:5173"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid environment configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "development" | "dev" => Some(Environment::Development),
            "production" | "prod" => Some(Environment::Production),
            "test" => Some(Environment::Test),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Test => "test",
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client credentials registered with an OAuth provider
#[derive(Clone)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: String,
}

impl fmt::Debug for OAuthClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthClientConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Hosted language model endpoint
#[derive(Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

/// API keys used by the chat tools
#[derive(Clone)]
pub struct ToolKeys {
    pub openweather_api_key: String,
    pub eodhd_api_token: String,
}

impl fmt::Debug for ToolKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ToolKeys { .. }")
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    pub port: u16,
    pub database_url: String,
    pub backend_url: String,
    pub frontend_url: String,
    pub cors_origins: Vec<String>,
    pub reset_db: bool,
    pub session_secret: String,
    pub google: OAuthClientConfig,
    pub github: OAuthClientConfig,
    pub llm: LlmConfig,
    pub tools: ToolKeys,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup (the process environment in production)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut problems = Vec::new();

        let optional = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut required = |key: &str| match optional(key) {
            Some(value) => value,
            None => {
                problems.push(format!("{} is required", key));
                String::new()
            }
        };

        let google = OAuthClientConfig {
            client_id: required("GOOGLE_CLIENT_ID"),
            client_secret: required("GOOGLE_CLIENT_SECRET"),
        };
        let github = OAuthClientConfig {
            client_id: required("GITHUB_CLIENT_ID"),
            client_secret: required("GITHUB_CLIENT_SECRET"),
        };
        let tools = ToolKeys {
            openweather_api_key: required("OPENWEATHER_API_KEY"),
            eodhd_api_token: required("EODHD_API_TOKEN"),
        };
        let llm_api_key = required("OPENROUTER_API_KEY");
        let session_secret = required("SESSION_SECRET");
        let frontend_url = required("FRONTEND_URL");

        let environment = match optional("APP_ENV") {
            Some(raw) => Environment::parse(&raw).unwrap_or_else(|| {
                problems.push(format!(
                    "APP_ENV must be one of development, production, test (got '{}')",
                    raw
                ));
                Environment::Development
            }),
            None => Environment::Development,
        };

        let port = match optional("PORT") {
            Some(raw) => raw.parse::<u16>().unwrap_or_else(|_| {
                problems.push(format!("PORT must be a valid port number (got '{}')", raw));
                DEFAULT_PORT
            }),
            None => DEFAULT_PORT,
        };

        if !frontend_url.is_empty() && !is_http_url(&frontend_url) {
            problems.push("FRONTEND_URL must be an http(s) URL".to_string());
        }

        let backend_url = optional("BACKEND_URL")
            .unwrap_or_else(|| format!("http://localhost:{}", port));
        if !is_http_url(&backend_url) {
            problems.push("BACKEND_URL must be an http(s) URL".to_string());
        }

        if !problems.is_empty() {
            return Err(ConfigError::Invalid(problems));
        }

        let frontend_url = frontend_url.trim_end_matches('/').to_string();
        let mut cors_origins = vec![frontend_url.clone()];
        let extra_origins = optional("CORS_ORIGINS").unwrap_or_default();
        for origin in extra_origins
            .split(',')
            .map(|o| o.trim().trim_end_matches('/'))
            .chain(DEV_ORIGINS)
        {
            if !origin.is_empty() && !cors_origins.iter().any(|o| o == origin) {
                cors_origins.push(origin.to_string());
            }
        }

        Ok(Self {
            environment,
            port,
            database_url: optional("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            backend_url: backend_url.trim_end_matches('/').to_string(),
            frontend_url,
            cors_origins,
            reset_db: optional("RESET_DB").is_some_and(|v| v.eq_ignore_ascii_case("true")),
            session_secret,
            google,
            github,
            llm: LlmConfig {
                api_key: llm_api_key,
                base_url: optional("OPENROUTER_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_OPENROUTER_BASE_URL.to_string())
                    .trim_end_matches('/')
                    .to_string(),
                model: optional("OPENROUTER_MODEL")
                    .unwrap_or_else(|| DEFAULT_OPENROUTER_MODEL.to_string()),
            },
            tools,
        })
    }

    /// Where the frontend lands after a successful sign-in
    pub fn chat_redirect(&self) -> String {
        format!("{}/chat", self.frontend_url)
    }

    /// Where the frontend shows the account-linking prompt
    pub fn link_account_redirect(&self) -> String {
        format!("{}/link-account", self.frontend_url)
    }

    /// Where the frontend lands after a failed sign-in
    pub fn login_failure_redirect(&self, reason: &str) -> String {
        format!(
            "{}/login?error={}",
            self.frontend_url,
            urlencoding::encode(reason)
        )
    }
}

fn is_http_url(value: &str) -> bool {
    let rest = value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"));
    matches!(rest, Some(host) if !host.is_empty())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    pub(crate) fn base_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("GOOGLE_CLIENT_ID", "google-id"),
            ("GOOGLE_CLIENT_SECRET", "google-secret"),
            ("GITHUB_CLIENT_ID", "github-id"),
            ("GITHUB_CLIENT_SECRET", "github-secret"),
            ("OPENWEATHER_API_KEY", "weather-key"),
            ("EODHD_API_TOKEN", "stock-token"),
            ("OPENROUTER_API_KEY", "router-key"),
            ("SESSION_SECRET", "session-secret"),
            ("FRONTEND_URL", "https://app.example.com/"),
        ])
    }

    pub(crate) fn test_config() -> AppConfig {
        let env = base_env();
        AppConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap()
    }

    #[test]
    fn test_defaults_applied() {
        let config = test_config();
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.port, 4000);
        assert_eq!(config.database_url, "sqlite://infoplus.db");
        assert_eq!(config.backend_url, "http://localhost:4000");
        assert_eq!(config.frontend_url, "https://app.example.com");
        assert_eq!(config.llm.model, "xiaomi/mimo-v2-flash:free");
        assert!(!config.reset_db);
        assert_eq!(config.cors_origins[0], "https://app.example.com");
        assert!(config
            .cors_origins
            .contains(&"http://localhost:5173".to_string()));
    }

    #[test]
    fn test_missing_variables_are_all_reported() {
        let mut env = base_env();
        env.remove("GITHUB_CLIENT_SECRET");
        env.remove("SESSION_SECRET");
        env.insert("OPENROUTER_API_KEY", "   ");

        let err = AppConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap_err();
        let ConfigError::Invalid(problems) = err;
        assert_eq!(problems.len(), 3);
        assert!(problems.iter().any(|p| p.contains("GITHUB_CLIENT_SECRET")));
        assert!(problems.iter().any(|p| p.contains("SESSION_SECRET")));
        assert!(problems.iter().any(|p| p.contains("OPENROUTER_API_KEY")));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut env = base_env();
        env.insert("PORT", "eighty");
        env.insert("APP_ENV", "staging");
        env.insert("FRONTEND_URL", "app.example.com");

        let err = AppConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap_err();
        let ConfigError::Invalid(problems) = err;
        assert!(problems.iter().any(|p| p.starts_with("PORT")));
        assert!(problems.iter().any(|p| p.starts_with("APP_ENV")));
        assert!(problems.iter().any(|p| p.starts_with("FRONTEND_URL")));
    }

    #[test]
    fn test_production_and_extra_origins() {
        let mut env = base_env();
        env.insert("APP_ENV", "production");
        env.insert("PORT", "8080");
        env.insert("CORS_ORIGINS", "https://admin.example.com, https://app.example.com");

        let config = AppConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert!(config.environment.is_production());
        assert_eq!(config.backend_url, "http://localhost:8080");
        let app_count = config
            .cors_origins
            .iter()
            .filter(|o| o.as_str() == "https://app.example.com")
            .count();
        assert_eq!(app_count, 1);
        assert!(config
            .cors_origins
            .contains(&"https://admin.example.com".to_string()));
    }

    #[test]
    fn test_redirect_urls() {
        let config = test_config();
        assert_eq!(config.chat_redirect(), "https://app.example.com/chat");
        assert_eq!(
            config.link_account_redirect(),
            "https://app.example.com/link-account"
        );
        assert_eq!(
            config.login_failure_redirect("auth failed"),
            "https://app.example.com/login?error=auth%20failed"
        );
    }
}
