//! Identifier types with validation.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    /// An alias was claimed by two different identities.
    #[error("alias {alias} is claimed by both {first} and {second}")]
    AliasConflict {
        alias: String,
        first: String,
        second: String,
    },

    /// An alias has the same name as a canonical identity.
    #[error("alias {alias} collides with an existing identity")]
    AliasShadowsIdentity { alias: String },
}

/// Generates a validated string ID newtype with common trait implementations.
macro_rules! define_string_id {
    (
        $(#[$meta:meta])*
        $name:ident, $field_name:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new ID after validation.
            ///
            /// Surrounding whitespace is trimmed; an empty result is rejected.
            pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
                let id = id.into();
                let trimmed = id.trim();
                if trimmed.is_empty() {
                    return Err(ValidationError::Empty { field: $field_name });
                }
                if trimmed.len() == id.len() {
                    return Ok(Self(id));
                }
                Ok(Self(trimmed.to_string()))
            }

            /// Returns the ID as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

define_string_id!(
    /// A validated identity key.
    ///
    /// Identities own activity history. They are opaque, stable and non-empty.
    IdentityId, "identity"
);

define_string_id!(
    /// An alternative name that resolves to exactly one [`IdentityId`].
    Alias, "alias"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_rejects_empty() {
        assert!(IdentityId::new("").is_err());
        assert!(IdentityId::new("   ").is_err());
        assert!(IdentityId::new("alice").is_ok());
    }

    #[test]
    fn identity_trims_whitespace() {
        let id = IdentityId::new("  alice ").unwrap();
        assert_eq!(id.as_str(), "alice");
    }

    #[test]
    fn identity_serde_roundtrip() {
        let id = IdentityId::new("alice").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"alice\"");
        let parsed: IdentityId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn identity_serde_rejects_empty() {
        let result: Result<IdentityId, _> = serde_json::from_str("\"\"");
        assert!(result.is_err());
    }

    #[test]
    fn alias_as_ref() {
        let alias = Alias::new("ali").unwrap();
        let s: &str = alias.as_ref();
        assert_eq!(s, "ali");
    }

    #[test]
    fn empty_error_names_field() {
        let err = Alias::new("").unwrap_err();
        assert_eq!(err.to_string(), "alias cannot be empty");
    }
}
