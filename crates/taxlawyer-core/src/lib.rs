//! Backend-agnostic core of the `taxlawyer` assistant.
//!
//! This crate contains no network IO. Search and completion backends plug in
//! through [`SearchProvider`] and [`CompletionProvider`]; `taxlawyer-local`
//! ships the reqwest-based implementations.

use serde::{Deserialize, Serialize};

pub mod auth;
pub mod classifier;
pub mod commands;
pub mod dispatch;
pub mod prompt;
pub mod session;

pub use classifier::Classifier;
pub use commands::Command;
pub use dispatch::{Assistant, AssistantConfig, Emitter, Mode, TurnEvent, TurnInput, TurnOutcome};
pub use session::Session;

/// How much of a failed provider response body is kept for diagnostics.
pub const ERROR_BODY_MAX_CHARS: usize = 500;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("search provider HTTP {status}: {body}")]
    SearchProvider { status: u16, body: String },
    #[error("search failed: {0}")]
    Search(String),
    #[error("completion failed: {0}")]
    Completion(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),
    #[error("invalid thread: {0}")]
    InvalidThread(String),
}

impl Error {
    /// Non-2xx search response. The body is clipped to [`ERROR_BODY_MAX_CHARS`].
    pub fn search_provider(status: u16, body: &str) -> Self {
        Error::SearchProvider {
            status,
            body: clip_chars(body, ERROR_BODY_MAX_CHARS),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// First `max` characters of `s` (char-boundary safe).
pub fn clip_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// One normalized web search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Full query text, site filter included.
    pub query: String,
    /// Requested result count (`k`). Providers never return more.
    pub count: usize,
}

#[async_trait::async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Label used when showing sources to the user.
    fn display_name(&self) -> &'static str {
        self.name()
    }

    async fn search(&self, q: &SearchQuery) -> Result<Vec<Source>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub system_instruction: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

/// Ordered text increments from a streaming completion.
///
/// Backends push into the sending half from their own task; an `Err` item ends
/// the stream from the consumer's point of view.
#[derive(Debug)]
pub struct ChunkStream {
    rx: tokio::sync::mpsc::Receiver<Result<String>>,
}

impl ChunkStream {
    pub fn channel(buffer: usize) -> (tokio::sync::mpsc::Sender<Result<String>>, Self) {
        let (tx, rx) = tokio::sync::mpsc::channel(buffer.max(1));
        (tx, Self { rx })
    }

    pub async fn next(&mut self) -> Option<Result<String>> {
        self.rx.recv().await
    }
}

#[async_trait::async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn stream(&self, req: &CompletionRequest) -> Result<ChunkStream>;
}
