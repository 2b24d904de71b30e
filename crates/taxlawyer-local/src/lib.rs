use std::time::Duration;
use taxlawyer_core::{Error, Result};

pub mod gemini;
pub mod search;
pub mod settings;

pub use gemini::GeminiStreamer;
pub use search::BraveSearchProvider;
pub use settings::Settings;

pub const USER_AGENT: &str = "TaxLawyerUg/1.0";

/// Trimmed, non-empty value of an environment variable.
pub(crate) fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Shared HTTP client for both providers.
///
/// Only the connect phase is bounded here. The search call sets its own
/// per-request timeout; completion streams run until the provider ends them.
pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| Error::NotConfigured(format!("http client: {e}")))
}
