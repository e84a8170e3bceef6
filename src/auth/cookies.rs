//! Session cookie helpers

use axum::http::{header, HeaderMap, HeaderValue};
use std::fmt::Write;

use super::session::SESSION_COOKIE_NAME;
use crate::common::config::Environment;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSitePolicy {
    Lax,
    None,
}

/// Attributes of the session cookie
#[derive(Debug, Clone)]
pub struct SessionCookie {
    pub value: String,
    pub max_age_secs: i64,
    pub secure: bool,
    pub same_site: SameSitePolicy,
}

impl SessionCookie {
    /// Cross-site frontends in production need `Secure; SameSite=None`
    pub fn new(value: String, max_age_secs: i64, environment: Environment) -> Self {
        let production = environment.is_production();
        Self {
            value,
            max_age_secs,
            secure: production,
            same_site: if production {
                SameSitePolicy::None
            } else {
                SameSitePolicy::Lax
            },
        }
    }

    /// Build the Set-Cookie header value
    pub fn build(&self) -> String {
        let mut cookie = format!("{}={}", SESSION_COOKIE_NAME, self.value);
        let _ = write!(cookie, "; Max-Age={}", self.max_age_secs);
        cookie.push_str("; Path=/; HttpOnly");

        if self.secure {
            cookie.push_str("; Secure");
        }

        match self.same_site {
            SameSitePolicy::Lax => cookie.push_str("; SameSite=Lax"),
            SameSitePolicy::None => cookie.push_str("; SameSite=None"),
        }

        cookie
    }
}

pub fn set_session_cookie(headers: &mut HeaderMap, cookie: &SessionCookie) {
    if let Ok(value) = HeaderValue::from_str(&cookie.build()) {
        headers.append(header::SET_COOKIE, value);
    }
}

pub fn clear_session_cookie(headers: &mut HeaderMap, environment: Environment) {
    let expired = SessionCookie::new(String::new(), 0, environment);
    set_session_cookie(headers, &expired);
}

/// Extract cookie value from request headers
pub fn get_cookie_value(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|cookie| {
            let (name, value) = cookie.trim().split_once('=')?;
            (name.trim() == cookie_name).then(|| value.trim().to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_development_cookie_is_lax() {
        let cookie = SessionCookie::new("abc".to_string(), 604800, Environment::Development);
        assert_eq!(
            cookie.build(),
            "infoplus.sid=abc; Max-Age=604800; Path=/; HttpOnly; SameSite=Lax"
        );
    }

    #[test]
    fn test_production_cookie_is_cross_site() {
        let built = SessionCookie::new("abc".to_string(), 60, Environment::Production).build();
        assert!(built.contains("; Secure"));
        assert!(built.ends_with("SameSite=None"));
    }

    #[test]
    fn test_clear_cookie() {
        let mut headers = HeaderMap::new();
        clear_session_cookie(&mut headers, Environment::Development);
        let value = headers.get(header::SET_COOKIE).unwrap().to_str().unwrap();
        assert!(value.starts_with("infoplus.sid=; Max-Age=0"));
    }

    #[test]
    fn test_get_cookie_value() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; infoplus.sid=token.value.sig; other=1"),
        );
        assert_eq!(
            get_cookie_value(&headers, "infoplus.sid").as_deref(),
            Some("token.value.sig")
        );
        assert_eq!(get_cookie_value(&headers, "missing"), None);
    }
}
