use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Explicit provider configuration handed to every adapter call. Adapters
/// must not fall back to process-wide region or credential settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderContext {
    pub region: String,
    /// Override for the provider API endpoint (local emulators, private
    /// endpoints).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub credentials: CredentialSource,
    /// Tags stamped on every resource the adapters create.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl ProviderContext {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            endpoint: None,
            credentials: CredentialSource::DefaultChain,
            tags: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialSource {
    Inline {
        access_key_id: String,
        secret_access_key: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        session_token: Option<String>,
    },
    Profile {
        profile_name: String,
    },
    #[default]
    DefaultChain,
}

impl CredentialSource {
    /// One-line description that is safe to log.
    pub fn describe(&self) -> String {
        match self {
            Self::Inline {
                access_key_id,
                session_token,
                ..
            } => {
                let label = if session_token.is_some() {
                    "temporary"
                } else {
                    "inline"
                };
                format!("{label} ({})", redact_access_key(access_key_id))
            }
            Self::Profile { profile_name } => format!("profile {profile_name}"),
            Self::DefaultChain => "default chain".to_string(),
        }
    }
}

fn redact_access_key(key: &str) -> String {
    if key.len() <= 8 {
        return "****".to_string();
    }
    let prefix = &key[..4];
    let suffix = &key[key.len() - 4..];
    format!("{prefix}...{suffix}")
}
