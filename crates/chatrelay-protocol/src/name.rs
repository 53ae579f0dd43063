//! Display-name rules shared by the relay and the client.

use serde::{Deserialize, Serialize};

use crate::legacy::{DELIMITER, RESERVED_PREFIX};
use crate::ProtocolError;

/// Length limits and character rules for display names.
///
/// Lengths are counted in characters, not bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamePolicy {
    /// Shortest accepted name.
    pub min_len: usize,
    /// Longest accepted name.
    pub max_len: usize,
}

impl Default for NamePolicy {
    fn default() -> Self {
        Self {
            min_len: 3,
            max_len: 24,
        }
    }
}

impl NamePolicy {
    /// Strips the spaces users tend to type around (and inside) a name.
    pub fn normalize(&self, raw: &str) -> String {
        raw.chars().filter(|c| *c != ' ').collect()
    }

    /// Checks a (normalized) name against the policy.
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidName`] with a user-facing reason.
    pub fn validate(&self, name: &str) -> Result<(), ProtocolError> {
        let len = name.chars().count();
        if len == 0 {
            return Err(invalid("a display name is required"));
        }
        if len < self.min_len {
            return Err(invalid(format!(
                "must be at least {} characters",
                self.min_len
            )));
        }
        if len > self.max_len {
            return Err(invalid(format!(
                "must not exceed {} characters",
                self.max_len
            )));
        }
        if name.contains(DELIMITER) {
            return Err(invalid(format!("must not contain '{DELIMITER}'")));
        }
        if name.chars().any(char::is_whitespace) {
            return Err(invalid("must not contain whitespace"));
        }
        if name.starts_with(RESERVED_PREFIX) {
            return Err(invalid(format!(
                "must not start with '{RESERVED_PREFIX}'"
            )));
        }
        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> ProtocolError {
    ProtocolError::InvalidName(reason.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let policy = NamePolicy::default();
        assert_eq!(policy.min_len, 3);
        assert_eq!(policy.max_len, 24);
    }

    #[test]
    fn test_normalize_strips_spaces() {
        let policy = NamePolicy::default();
        assert_eq!(policy.normalize("  Al ice "), "Alice");
    }

    #[test]
    fn test_validate_accepts_ordinary_names() {
        let policy = NamePolicy::default();
        assert!(policy.validate("Alice").is_ok());
        assert!(policy.validate("Bob").is_ok());
        assert!(policy.validate(&"x".repeat(24)).is_ok());
        assert!(policy.validate("Zoë").is_ok());
    }

    #[test]
    fn test_validate_enforces_length() {
        let policy = NamePolicy::default();
        assert!(matches!(policy.validate(""), Err(ProtocolError::InvalidName(_))));
        assert!(policy.validate("Al").is_err());
        assert!(policy.validate(&"x".repeat(25)).is_err());
    }

    #[test]
    fn test_validate_counts_chars_not_bytes() {
        let policy = NamePolicy {
            min_len: 1,
            max_len: 3,
        };
        // Three chars, six bytes.
        assert!(policy.validate("äöü").is_ok());
    }

    #[test]
    fn test_validate_rejects_reserved_content() {
        let policy = NamePolicy::default();
        assert!(policy.validate("Ali»ce").is_err());
        assert!(policy.validate("$$_U_ADD_USER_$$").is_err());
        assert!(policy.validate("Al\tice").is_err());
    }

    #[test]
    fn test_error_message_is_user_facing() {
        let err = NamePolicy::default().validate("Al").unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid display name: must be at least 3 characters"
        );
    }
}
