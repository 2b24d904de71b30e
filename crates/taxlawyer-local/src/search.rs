use crate::settings::{Settings, DEFAULT_BRAVE_ENDPOINT};
use serde::Deserialize;
use std::time::{Duration, Instant};
use taxlawyer_core::{Error, Result, SearchProvider, SearchQuery, Source};

/// Fixed budget for one search request.
pub const SEARCH_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone)]
pub struct BraveSearchProvider {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl BraveSearchProvider {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            endpoint: DEFAULT_BRAVE_ENDPOINT.to_string(),
        }
    }

    /// Point at a different endpoint (proxies, fixtures).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn from_settings(client: reqwest::Client, settings: &Settings) -> Self {
        Self::new(client, settings.brave_api_key.clone()).with_endpoint(settings.brave_endpoint.clone())
    }
}

#[derive(Debug, Deserialize)]
struct BraveWebSearchResponse {
    web: Option<BraveWeb>,
}

#[derive(Debug, Deserialize)]
struct BraveWeb {
    results: Option<Vec<BraveWebResult>>,
}

#[derive(Debug, Deserialize)]
struct BraveWebResult {
    url: Option<String>,
    title: Option<String>,
    description: Option<String>,
}

/// At most `k` sources; entries without a url are skipped.
fn normalize(parsed: BraveWebSearchResponse, k: usize) -> Vec<Source> {
    parsed
        .web
        .and_then(|w| w.results)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|r| {
            let url = r.url.filter(|u| !u.trim().is_empty())?;
            Some(Source {
                title: r.title.unwrap_or_default(),
                url,
                snippet: r.description.unwrap_or_default(),
            })
        })
        .take(k)
        .collect()
}

#[async_trait::async_trait]
impl SearchProvider for BraveSearchProvider {
    fn name(&self) -> &'static str {
        "brave"
    }

    fn display_name(&self) -> &'static str {
        "Brave"
    }

    async fn search(&self, q: &SearchQuery) -> Result<Vec<Source>> {
        let t0 = Instant::now();
        let resp = self
            .client
            .get(&self.endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .header("X-Subscription-Token", &self.api_key)
            .query(&[("q", q.query.as_str())])
            // Brave uses `count` for result count.
            .query(&[("count", q.count.to_string())])
            .timeout(SEARCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            // The body usually says which parameter was rejected (e.g. 422).
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::search_provider(status.as_u16(), &body));
        }

        let parsed: BraveWebSearchResponse = resp
            .json()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;
        let out = normalize(parsed, q.count);
        tracing::debug!(
            results = out.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "brave search"
        );
        Ok(out)
    }
}
