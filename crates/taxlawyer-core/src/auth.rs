//! Login authorization for federated sign-in.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The only accepted identity provider.
pub const GOOGLE_PROVIDER: &str = "google";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub identifier: String,
    pub metadata: UserMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMetadata {
    pub provider: String,
    pub name: Option<String>,
    pub picture: Option<String>,
}

fn claim<'a>(raw: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    raw.get(key).and_then(|v| v.as_str())
}

/// Decide whether a login assertion is accepted.
///
/// Rejects any provider other than Google. When `allowed_domain` is set (and
/// non-empty) the hosted-domain claim `hd` must equal it. The identifier is
/// the lowercased `email` claim, falling back to `default_identifier`.
pub fn authorize(
    provider_id: &str,
    raw_user_data: &Map<String, Value>,
    default_identifier: &str,
    allowed_domain: Option<&str>,
) -> Option<User> {
    if provider_id != GOOGLE_PROVIDER {
        tracing::debug!(provider_id, "login rejected: unsupported provider");
        return None;
    }
    if let Some(domain) = allowed_domain.filter(|d| !d.is_empty()) {
        if claim(raw_user_data, "hd") != Some(domain) {
            tracing::debug!(allowed_domain = domain, "login rejected: hosted domain mismatch");
            return None;
        }
    }
    let identifier = claim(raw_user_data, "email")
        .filter(|e| !e.is_empty())
        .unwrap_or(default_identifier)
        .to_lowercase();
    Some(User {
        identifier,
        metadata: UserMetadata {
            provider: GOOGLE_PROVIDER.to_string(),
            name: claim(raw_user_data, "name").map(str::to_string),
            picture: claim(raw_user_data, "picture").map(str::to_string),
        },
    })
}
