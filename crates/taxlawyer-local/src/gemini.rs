//! Gemini streaming completion (`streamGenerateContent`, SSE).
//!
//! The request is established and read on a spawned task. Text increments are
//! pushed through a bounded channel in arrival order, so the caller only ever
//! awaits the next chunk and can forward it immediately.
//!
//! There is no timeout on the stream body: it runs until Gemini closes it.

use crate::settings::{Settings, DEFAULT_GEMINI_BASE_URL};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use taxlawyer_core::{
    clip_chars, ChunkStream, CompletionProvider, CompletionRequest, Error, Result,
    ERROR_BODY_MAX_CHARS,
};
use tokio::sync::{mpsc, oneshot};

/// Chunks buffered between the stream task and the consumer.
const CHUNK_BUFFER: usize = 64;

#[derive(Debug, Clone)]
pub struct GeminiStreamer {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiStreamer {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn from_settings(client: reqwest::Client, settings: &Settings) -> Self {
        Self::new(client, settings.gemini_api_key.clone())
            .with_base_url(settings.gemini_base_url.clone())
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{model}:streamGenerateContent?alt=sse",
            self.base_url.trim_end_matches('/')
        )
    }
}

#[derive(Debug, Serialize)]
struct ReqPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct ReqContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<ReqPart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenCfg {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiReq {
    contents: Vec<ReqContent>,
    system_instruction: ReqContent,
    generation_config: GenCfg,
}

impl From<&CompletionRequest> for GeminiReq {
    fn from(req: &CompletionRequest) -> Self {
        Self {
            contents: vec![ReqContent {
                role: Some("user".to_string()),
                parts: vec![ReqPart {
                    text: req.prompt.clone(),
                }],
            }],
            system_instruction: ReqContent {
                role: None,
                parts: vec![ReqPart {
                    text: req.system_instruction.clone(),
                }],
            },
            generation_config: GenCfg {
                temperature: req.temperature,
                max_output_tokens: req.max_output_tokens,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

/// Text carried by one SSE `data:` payload, if any.
///
/// Only `candidates[0].content.parts[0].text` is read.
fn event_text(data: &str) -> Result<Option<String>> {
    let ev: StreamEvent = serde_json::from_str(data)
        .map_err(|e| Error::Completion(format!("bad stream event: {e}")))?;
    if let Some(err) = ev.error {
        return Err(Error::Completion(format!("gemini stream error: {err}")));
    }
    Ok(ev
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|c| c.parts.into_iter().next())
        .and_then(|p| p.text))
}

/// Upper bound on bytes held for one unfinished SSE event.
const MAX_SSE_BUFFER_SIZE: usize = 1_000_000;

/// Incremental `text/event-stream` decoder yielding `data` payloads.
///
/// Bytes are buffered until a full line is available, so multi-byte
/// characters split across network chunks decode correctly.
#[derive(Debug)]
pub(crate) struct SseDecoder {
    buf: Vec<u8>,
    // Prefix of `buf` already known to hold no newline.
    scanned: usize,
    data: Vec<String>,
    limit: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_limit(MAX_SSE_BUFFER_SIZE)
    }
}

impl SseDecoder {
    pub(crate) fn with_limit(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            data: Vec::new(),
            limit,
        }
    }

    /// Feed body bytes; returns the payloads completed by them.
    ///
    /// Fails once an unfinished event grows past the limit.
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>> {
        self.buf.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(rel) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') {
            let pos = self.scanned + rel;
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            self.scanned = 0;
            let line = String::from_utf8_lossy(&line);
            self.line(line.trim_end_matches(['\n', '\r']), &mut out);
        }
        self.scanned = self.buf.len();

        let pending = self.buf.len() + self.data.iter().map(String::len).sum::<usize>();
        if pending > self.limit {
            return Err(Error::Completion(format!(
                "SSE event exceeded {} bytes without completing",
                self.limit
            )));
        }
        Ok(out)
    }

    /// Flush whatever is left once the body ends.
    pub(crate) fn finish(&mut self) -> Vec<String> {
        self.scanned = 0;
        let mut out = Vec::new();
        if !self.buf.is_empty() {
            let rest = std::mem::take(&mut self.buf);
            let rest = String::from_utf8_lossy(&rest);
            self.line(rest.trim_end_matches('\r'), &mut out);
        }
        self.dispatch(&mut out);
        out
    }

    fn line(&mut self, line: &str, out: &mut Vec<String>) {
        if line.is_empty() {
            self.dispatch(out);
            return;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            self.data
                .push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
        }
        // `event:`, `id:`, `retry:` and comments carry nothing we use.
    }

    fn dispatch(&mut self, out: &mut Vec<String>) {
        if self.data.is_empty() {
            return;
        }
        let payload = self.data.join("\n");
        self.data.clear();
        if payload != "[DONE]" {
            out.push(payload);
        }
    }
}

/// Send one payload's text downstream. `false` means stop reading.
async fn forward_payload(
    tx: &mpsc::Sender<Result<String>>,
    data: &str,
    chunks: &mut usize,
) -> bool {
    match event_text(data) {
        Ok(Some(text)) => {
            *chunks += 1;
            // Receiver gone: the turn was dropped.
            tx.send(Ok(text)).await.is_ok()
        }
        Ok(None) => true,
        Err(e) => {
            let _ = tx.send(Err(e)).await;
            false
        }
    }
}

async fn forward_events(resp: reqwest::Response, tx: mpsc::Sender<Result<String>>) {
    let mut body = resp.bytes_stream();
    let mut decoder = SseDecoder::default();
    let mut chunks = 0usize;

    while let Some(next) = body.next().await {
        let bytes = match next {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, "gemini stream transport error");
                let _ = tx.send(Err(Error::Completion(e.to_string()))).await;
                return;
            }
        };
        let payloads = match decoder.push(&bytes) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "gemini stream dropped");
                let _ = tx.send(Err(e)).await;
                return;
            }
        };
        for data in payloads {
            if !forward_payload(&tx, &data, &mut chunks).await {
                return;
            }
        }
    }
    for data in decoder.finish() {
        if !forward_payload(&tx, &data, &mut chunks).await {
            return;
        }
    }
    tracing::debug!(chunks, "gemini stream finished");
}

#[async_trait::async_trait]
impl CompletionProvider for GeminiStreamer {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn stream(&self, req: &CompletionRequest) -> Result<ChunkStream> {
        let body = GeminiReq::from(req);
        let request = self
            .client
            .post(self.endpoint(&req.model))
            .header("x-goog-api-key", &self.api_key)
            .json(&body);

        let (tx, stream) = ChunkStream::channel(CHUNK_BUFFER);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();
        let model = req.model.clone();

        tokio::spawn(async move {
            let resp = match request.send().await {
                Ok(r) => r,
                Err(e) => {
                    let _ = ready_tx.send(Err(Error::Completion(e.to_string())));
                    return;
                }
            };
            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                let _ = ready_tx.send(Err(Error::Completion(format!(
                    "gemini streamGenerateContent HTTP {status}: {}",
                    clip_chars(&text, ERROR_BODY_MAX_CHARS)
                ))));
                return;
            }
            tracing::debug!(model = %model, "gemini stream established");
            if ready_tx.send(Ok(())).is_err() {
                return;
            }
            forward_events(resp, tx).await;
        });

        ready_rx
            .await
            .map_err(|_| Error::Completion("stream task ended before responding".to_string()))??;
        Ok(stream)
    }
}
