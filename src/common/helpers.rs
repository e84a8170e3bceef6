// Helper functions for safe logging and serialization

use serde::{Serialize, Serializer};

/// Masks email addresses for safe logging
/// Prevents sensitive data exposure while preserving debugging utility
///
/// # Example
/// ```
/// let masked = safe_email_log("user@example.com");
/// // Returns: "u***@example.com"
/// ```
pub fn safe_email_log(email: &str) -> String {
    if email.len() > 3 {
        let parts: Vec<&str> = email.split('@').collect();
        if parts.len() == 2 && !parts[0].is_empty() {
            let first = parts[0].chars().next().map(String::from).unwrap_or_default();
            format!("{}***@{}", first, parts[1])
        } else {
            "***@***.***".to_string()
        }
    } else {
        "***@***.***".to_string()
    }
}

/// Masks tokens and session ids for safe logging
/// Shows only first and last 4 characters
///
/// # Example
/// ```
/// let masked = safe_token_log("eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9");
/// // Returns: "eyJh...XVCJ9"
/// ```
pub fn safe_token_log(token: &str) -> String {
    if token.len() > 8 && token.is_ascii() {
        format!("{}...{}", &token[..4], &token[token.len() - 4..])
    } else {
        "***".to_string()
    }
}

/// Serializes a JSON column stored as TEXT back into structured JSON for API responses
pub fn serialize_json_text<S>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(raw) => match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(json) => json.serialize(serializer),
            Err(_) => raw.serialize(serializer),
        },
        None => serializer.serialize_none(),
    }
}

/// Truncates a string to at most `max_chars` characters without splitting a code point
pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_email_log() {
        assert_eq!(safe_email_log("user@example.com"), "u***@example.com");
        assert_eq!(safe_email_log("a@b"), "***@***.***");
        assert_eq!(safe_email_log("not-an-email"), "***@***.***");
        assert_eq!(safe_email_log("élodie@example.fr"), "é***@example.fr");
    }

    #[test]
    fn test_safe_token_log() {
        assert_eq!(safe_token_log("ABCDEFGHJKMNPQRS"), "ABCD...PQRS");
        assert_eq!(safe_token_log("short"), "***");
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello world", 5), "hello");
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 40), "hi");
    }

    #[test]
    fn test_serialize_json_text() {
        #[derive(Serialize)]
        struct Row {
            #[serde(serialize_with = "serialize_json_text")]
            payload: Option<String>,
        }

        let row = Row {
            payload: Some(r#"[{"name":"getWeather"}]"#.to_string()),
        };
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["payload"][0]["name"], "getWeather");

        let empty = Row { payload: None };
        assert!(serde_json::to_value(&empty).unwrap()["payload"].is_null());
    }
}
