//! Environment-backed configuration, read once at startup.

use crate::env;
use std::path::PathBuf;
use taxlawyer_core::dispatch::{DEFAULT_MODEL, DEFAULT_SEARCH_COUNT};
use taxlawyer_core::{Error, Result};

pub const GEMINI_KEY_VARS: &[&str] = &["GEMINI_API_KEY", "TAXLAWYER_GEMINI_API_KEY"];
pub const BRAVE_KEY_VARS: &[&str] = &["BRAVE_API_KEY", "BRAVE_SEARCH_API_KEY"];
pub const ALLOWED_DOMAIN_VAR: &str = "GOOGLE_ALLOWED_DOMAIN";
pub const ENV_FILE_VAR: &str = "TAXLAWYER_ENV_FILE";

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_BRAVE_ENDPOINT: &str = "https://api.search.brave.com/res/v1/web/search";

fn first_env(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| env(k))
}

#[derive(Clone)]
pub struct Settings {
    pub gemini_api_key: String,
    pub brave_api_key: String,
    /// Hosted-domain restriction for Google sign-in.
    pub allowed_domain: Option<String>,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub brave_endpoint: String,
    pub search_count: usize,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("gemini_api_key", &"<redacted>")
            .field("brave_api_key", &"<redacted>")
            .field("allowed_domain", &self.allowed_domain)
            .field("gemini_model", &self.gemini_model)
            .field("gemini_base_url", &self.gemini_base_url)
            .field("brave_endpoint", &self.brave_endpoint)
            .field("search_count", &self.search_count)
            .finish()
    }
}

impl Settings {
    /// Read configuration from the process environment.
    ///
    /// Fails with every missing required key named at once.
    pub fn from_env() -> Result<Self> {
        let gemini = first_env(GEMINI_KEY_VARS);
        let brave = first_env(BRAVE_KEY_VARS);
        let (gemini_api_key, brave_api_key) = match (gemini, brave) {
            (Some(g), Some(b)) => (g, b),
            (g, b) => {
                let mut missing = Vec::new();
                if g.is_none() {
                    missing.push(GEMINI_KEY_VARS.join(" or "));
                }
                if b.is_none() {
                    missing.push(BRAVE_KEY_VARS.join(" or "));
                }
                return Err(Error::NotConfigured(format!(
                    "missing {}",
                    missing.join(", ")
                )));
            }
        };

        let search_count = env("TAXLAWYER_SEARCH_COUNT")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(DEFAULT_SEARCH_COUNT)
            .clamp(1, 20);

        Ok(Self {
            gemini_api_key,
            brave_api_key,
            allowed_domain: env(ALLOWED_DOMAIN_VAR),
            gemini_model: env("TAXLAWYER_GEMINI_MODEL")
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            gemini_base_url: env("TAXLAWYER_GEMINI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string()),
            brave_endpoint: env("TAXLAWYER_BRAVE_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_BRAVE_ENDPOINT.to_string()),
            search_count,
        })
    }
}

/// Which credentials are present. Booleans only; never values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CredentialStatus {
    pub gemini_configured: bool,
    pub brave_configured: bool,
    pub allowed_domain_configured: bool,
}

pub fn credential_status() -> CredentialStatus {
    CredentialStatus {
        gemini_configured: first_env(GEMINI_KEY_VARS).is_some(),
        brave_configured: first_env(BRAVE_KEY_VARS).is_some(),
        allowed_domain_configured: env(ALLOWED_DOMAIN_VAR).is_some(),
    }
}

/// Load the opt-in env file named by `TAXLAWYER_ENV_FILE`.
///
/// Variables already set in the process environment win.
pub fn load_env_file() -> Result<Option<PathBuf>> {
    let Some(p) = env(ENV_FILE_VAR) else {
        return Ok(None);
    };
    let path = PathBuf::from(p);
    dotenvy::from_path(&path)
        .map_err(|e| Error::NotConfigured(format!("env file {}: {e}", path.display())))?;
    Ok(Some(path))
}
