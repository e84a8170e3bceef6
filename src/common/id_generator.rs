// src/common/id_generator.rs
//! Crockford Base32 ID Generator
//!
//! Generates human-readable, prefixed IDs using Crockford Base32 encoding.
//! Format: PREFIX_XXXXXXXXXXXX (e.g., U_K7NP3X8MWQT2 for users)
//!
//! Session ids and OAuth state values use the same alphabet without a prefix
//! and with enough characters to be unguessable.

use rand::Rng;

/// Crockford Base32 alphabet (excludes I, L, O, U to avoid confusion)
const CROCKFORD_ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Random characters in an entity id (60 bits)
const ENTITY_ID_LENGTH: usize = 12;

/// Random characters in a session id (160 bits)
pub const SESSION_ID_LENGTH: usize = 32;

/// Random characters in an OAuth state value (120 bits)
pub const OAUTH_STATE_LENGTH: usize = 24;

/// Entity type prefixes for ID generation
#[derive(Debug, Clone, Copy)]
pub enum EntityPrefix {
    /// User (U_)
    User,
    /// Linked provider identity (P_)
    Identity,
    /// Chat message (M_)
    Message,
}

impl EntityPrefix {
    /// Get the string prefix for this entity type
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityPrefix::User => "U",
            EntityPrefix::Identity => "P",
            EntityPrefix::Message => "M",
        }
    }
}

/// Generate a random Crockford Base32 string of specified length
fn generate_crockford_string(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..32);
            CROCKFORD_ALPHABET[idx] as char
        })
        .collect()
}

/// Generate a prefixed ID using Crockford Base32 encoding
///
/// Returns a string in format "PREFIX_XXXXXXXXXXXX" (e.g., "U_K7NP3X8MWQT2")
pub fn generate_id(prefix: EntityPrefix) -> String {
    format!(
        "{}_{}",
        prefix.as_str(),
        generate_crockford_string(ENTITY_ID_LENGTH)
    )
}

/// Generate a raw Crockford Base32 string without prefix
pub fn generate_raw_id(length: usize) -> String {
    generate_crockford_string(length)
}

/// Generate a User ID (U_XXXXXXXXXXXX)
pub fn generate_user_id() -> String {
    generate_id(EntityPrefix::User)
}

/// Generate a provider identity ID (P_XXXXXXXXXXXX)
pub fn generate_identity_id() -> String {
    generate_id(EntityPrefix::Identity)
}

/// Generate a Message ID (M_XXXXXXXXXXXX)
pub fn generate_message_id() -> String {
    generate_id(EntityPrefix::Message)
}

/// Generate a session id
pub fn generate_session_id() -> String {
    generate_raw_id(SESSION_ID_LENGTH)
}

/// Generate an OAuth `state` value
pub fn generate_oauth_state() -> String {
    generate_raw_id(OAUTH_STATE_LENGTH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_id_format() {
        let user_id = generate_user_id();
        assert!(user_id.starts_with("U_"));
        assert_eq!(user_id.len(), 2 + ENTITY_ID_LENGTH);

        let identity_id = generate_identity_id();
        assert!(identity_id.starts_with("P_"));
        assert!(generate_message_id().starts_with("M_"));
    }

    #[test]
    fn test_crockford_alphabet_only() {
        let id = generate_session_id();
        assert_eq!(id.len(), SESSION_ID_LENGTH);

        for c in id.chars() {
            assert!(
                CROCKFORD_ALPHABET.contains(&(c as u8)),
                "Character '{}' not in Crockford alphabet",
                c
            );
        }

        // Verify no ambiguous characters
        assert!(!id.contains('I'));
        assert!(!id.contains('L'));
        assert!(!id.contains('O'));
        assert!(!id.contains('U'));
    }

    #[test]
    fn test_uniqueness() {
        let mut ids = HashSet::new();
        for _ in 0..1000 {
            let id = generate_user_id();
            assert!(ids.insert(id), "Duplicate ID generated");
        }
    }

    #[test]
    fn test_raw_id() {
        let raw = generate_oauth_state();
        assert_eq!(raw.len(), OAUTH_STATE_LENGTH);
        assert!(!raw.contains('_')); // No prefix separator
    }
}
