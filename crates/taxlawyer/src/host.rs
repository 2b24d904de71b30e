//! Terminal host: stands in for the chat framework that owns sessions and
//! renders turn events.

use std::io::Write;
use std::sync::Arc;
use taxlawyer_core::{Assistant, AssistantConfig, Command, Emitter, TurnEvent, TurnInput};
use taxlawyer_local::{BraveSearchProvider, GeminiStreamer, Settings};

/// Build an assistant from startup settings plus CLI overrides.
pub fn build_assistant(
    settings: &Settings,
    model: Option<String>,
    count: Option<usize>,
) -> taxlawyer_core::Result<Assistant> {
    let client = taxlawyer_local::http_client()?;
    let search = BraveSearchProvider::from_settings(client.clone(), settings);
    let completion = GeminiStreamer::from_settings(client, settings);
    let config = AssistantConfig {
        model: model.unwrap_or_else(|| settings.gemini_model.clone()),
        search_count: count.unwrap_or(settings.search_count).clamp(1, 20),
        ..AssistantConfig::default()
    };
    Ok(Assistant::new(Arc::new(search), Arc::new(completion), config))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplLine {
    Empty,
    Quit,
    Starters,
    Turn(TurnInput),
}

/// Map one line of terminal input onto the command surface.
///
/// `/search <q>` is the WebSearch command, `/toggle` the GroundToggle command.
/// Anything else (including `web: ...`) is passed through as text.
pub fn parse_repl_line(line: &str) -> ReplLine {
    let line = line.trim();
    if line.is_empty() {
        return ReplLine::Empty;
    }
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((h, r)) => (h, r.trim()),
        None => (line, ""),
    };
    match head {
        "/quit" | "/exit" => ReplLine::Quit,
        "/starters" => ReplLine::Starters,
        "/toggle" => ReplLine::Turn(TurnInput::command(Command::GroundToggle, rest)),
        "/search" => ReplLine::Turn(TurnInput::command(Command::WebSearch, rest)),
        _ => ReplLine::Turn(TurnInput::text(line)),
    }
}

/// Renders turn events as a plain-text transcript.
pub struct TerminalEmitter<W: Write> {
    out: W,
}

impl<W: Write> TerminalEmitter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write(&mut self, s: &str) {
        if let Err(e) = self.out.write_all(s.as_bytes()).and_then(|_| self.out.flush()) {
            tracing::warn!(error = %e, "failed to write to terminal");
        }
    }
}

impl<W: Write> Emitter for TerminalEmitter<W> {
    fn emit(&mut self, event: TurnEvent) {
        match event {
            TurnEvent::GroundingToggled { message, .. } => self.write(&format!("{message}\n")),
            TurnEvent::SearchStarted { .. } => self.write("(searching the web…)\n"),
            TurnEvent::Sources { markdown, .. } => self.write(&format!("{markdown}\n\n")),
            TurnEvent::SearchFailed { message } => self.write(&format!("⚠️ {message}\n")),
            TurnEvent::AnswerChunk { text } => self.write(&text),
            TurnEvent::AnswerDone { .. } => self.write("\n"),
            TurnEvent::Suggestion { message, action } => self.write(&format!(
                "\n{message}\n  {} → type `{}<your question>`\n",
                action.label, action.prefill
            )),
        }
    }
}
