//! Core identifier types for stratum.
//!
//! Identifiers are opaque strings chosen either by the master (generated from a
//! UUID v4) or by the component that registers the entity. All of them share the
//! same validation rules, so they are declared through one macro.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Validate the textual form shared by every identifier.
///
/// # Errors
///
/// Returns an error if the value is empty, is `.` or `..`, or contains a path
/// separator, whitespace, or a control character.
pub fn validate_id(value: &str) -> Result<(), IdError> {
    if value.is_empty() {
        return Err(IdError::Empty);
    }

    if value == "." || value == ".." {
        return Err(IdError::Reserved(value.to_string()));
    }

    if let Some(c) = value
        .chars()
        .find(|c| *c == '/' || *c == '\\' || c.is_whitespace() || c.is_control())
    {
        return Err(IdError::InvalidCharacter(c));
    }

    Ok(())
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            #[doc = concat!("Create a `", stringify!($name), "` from a string, validating it.")]
            ///
            /// # Errors
            ///
            /// Returns an error if the value is not a valid identifier.
            pub fn new(value: impl Into<String>) -> Result<Self, IdError> {
                let value = value.into();
                validate_id(&value)?;
                Ok(Self(value))
            }

            #[doc = concat!("Generate a new random `", stringify!($name), "`.")]
            #[must_use]
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            /// Return the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id! {
    /// Identifier of a framework (a scheduler registered with the master).
    FrameworkId
}

string_id! {
    /// Identifier of an agent (a node advertising resources).
    AgentId
}

string_id! {
    /// Identifier of an offer or inverse offer.
    OfferId
}

string_id! {
    /// Identifier of a task, unique within its framework.
    TaskId
}

string_id! {
    /// Identifier of an executor, unique within its framework.
    ExecutorId
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The identifier is empty.
    #[error("ID must not be empty")]
    Empty,

    /// The identifier is a reserved path component.
    #[error("'{0}' is disallowed as an ID")]
    Reserved(String),

    /// The identifier contains a forbidden character.
    #[error("ID must not contain {0:?}")]
    InvalidCharacter(char),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framework_id_roundtrip() {
        let id = FrameworkId::new("framework-1").unwrap();
        assert_eq!(id.as_str(), "framework-1");
        assert_eq!(id.to_string(), "framework-1");
        assert_eq!(FrameworkId::from_str("framework-1").unwrap(), id);
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(AgentId::new(""), Err(IdError::Empty));
    }

    #[test]
    fn rejects_reserved() {
        assert!(matches!(TaskId::new(".."), Err(IdError::Reserved(_))));
        assert!(matches!(TaskId::new("."), Err(IdError::Reserved(_))));
    }

    #[test]
    fn rejects_separators_and_whitespace() {
        assert_eq!(OfferId::new("a/b"), Err(IdError::InvalidCharacter('/')));
        assert_eq!(OfferId::new("a b"), Err(IdError::InvalidCharacter(' ')));
        assert_eq!(OfferId::new("a\\b"), Err(IdError::InvalidCharacter('\\')));
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = FrameworkId::generate();
        let b = FrameworkId::generate();
        assert_ne!(a, b);
        assert!(validate_id(a.as_str()).is_ok());
    }

    #[test]
    fn serde_uses_plain_string() {
        let id = AgentId::new("agent-7").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"agent-7\"");
        let parsed: AgentId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn serde_rejects_invalid() {
        let result: Result<ExecutorId, _> = serde_json::from_str("\"\"");
        assert!(result.is_err());
    }

    #[test]
    fn ordering_is_lexicographic() {
        let a = OfferId::new("a").unwrap();
        let b = OfferId::new("b").unwrap();
        assert!(a < b);
    }
}
