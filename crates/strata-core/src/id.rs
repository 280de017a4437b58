use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Stable identity of a resource within a desired-state document.
///
/// Lowercase ASCII letters, digits, `-` and `_`, starting with a letter and at
/// most [`ResourceId::MAX_LEN`] characters. Deserialisation goes through the
/// same check, so a malformed id in a document is rejected on parse.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId(String);

impl ResourceId {
    pub const MAX_LEN: usize = 63;

    pub fn new(id: impl Into<String>) -> Result<Self, CoreError> {
        let id = id.into();
        let invalid = |reason: &str| CoreError::InvalidId {
            id: id.clone(),
            reason: reason.to_string(),
        };

        let Some(first) = id.chars().next() else {
            return Err(invalid("must not be empty"));
        };
        if id.len() > Self::MAX_LEN {
            return Err(invalid("longer than 63 characters"));
        }
        if !first.is_ascii_lowercase() {
            return Err(invalid("must start with a lowercase letter"));
        }
        if let Some(bad) = id
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '_'))
        {
            return Err(invalid(&format!("unexpected character {bad:?}")));
        }

        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ResourceId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ResourceId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for ResourceId {
    type Error = CoreError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.0
    }
}

/// Opaque identity assigned by a provider adapter on create (an ARN, a
/// namespaced object name, ...). The engine only stores and hands it back.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderHandle(String);

impl ProviderHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}
