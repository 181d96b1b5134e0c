use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of generated session identifiers
const GENERATED_LEN: usize = 8;

/// Opaque per-conversation identity, used both as a storage key and a request-routing key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh short identifier
    pub fn generate() -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self(id[..GENERATED_LEN].to_string())
    }

    /// Parse an existing identifier (e.g. from the command line or the routing path)
    pub fn parse(id: impl Into<String>) -> Result<Self, SessionIdError> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Ids end up in URL paths and storage keys, so only URL-safe characters are allowed
    fn validate(id: &str) -> Result<(), SessionIdError> {
        if id.is_empty() {
            return Err(SessionIdError::Empty);
        }

        if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(SessionIdError::InvalidFormat);
        }
        Ok(())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for SessionId {
    type Error = SessionIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl TryFrom<&str> for SessionId {
    type Error = SessionIdError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

/// Errors that can occur when parsing a SessionId
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionIdError {
    #[error("session id cannot be empty")]
    Empty,
    #[error("session id may only contain ASCII letters, digits, '-' and '_'")]
    InvalidFormat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_valid() {
        let id = SessionId::generate();
        assert_eq!(id.as_str().len(), GENERATED_LEN);
        assert!(SessionId::parse(id.as_str()).is_ok());
    }

    #[test]
    fn test_generate_is_unique() {
        assert_ne!(SessionId::generate(), SessionId::generate());
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert_eq!(SessionId::parse(""), Err(SessionIdError::Empty));
    }

    #[test]
    fn test_parse_rejects_path_characters() {
        assert_eq!(SessionId::parse("../etc"), Err(SessionIdError::InvalidFormat));
        assert_eq!(SessionId::parse("a b"), Err(SessionIdError::InvalidFormat));
        assert!(SessionId::parse("Ab3_x-9").is_ok());
    }

    #[test]
    fn test_serde_roundtrip_validates() {
        let id = SessionId::parse("k2Xq").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"k2Xq\"");

        let bad: Result<SessionId, _> = serde_json::from_str("\"no/slashes\"");
        assert!(bad.is_err());
    }
}
