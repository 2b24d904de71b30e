//! Prompt assembly.
//!
//! Everything here is a pure function of its inputs: the same history,
//! question and sources always produce the same bytes.

use crate::{ConversationTurn, Role, Source};

pub const SYSTEM_PROMPT: &str = "You are 'Tax Lawyer (Uganda)', an assistant for tax accountants and lawyers in Uganda. \
Always: (1) state assumptions, (2) ask for missing facts, (3) prefer Ugandan tax law sources \
(Income Tax Act, VAT Act, Tax Procedures Code, practice notes), (4) cite section numbers \
when you know them, (5) flag uncertainty and advise verification, (6) avoid definitive legal conclusions. \
Make answers concise but informative, and use bullet points or numbered lists for clarity, unless the user prefers a different style.";

/// Trailing turns of history carried into each prompt.
pub const HISTORY_WINDOW: usize = 8;

/// Snippet preview length in the sources message.
pub const SNIPPET_PREVIEW_CHARS: usize = 160;

const CONTEXT_HEADER: &str = "Context from authoritative Uganda web sources:";

const CLOSING_INSTRUCTIONS: &str = "Instructions:\n\
- Answer for Uganda context; prefer statutes/official guidance.\n\
- Use bracket refs like [1], [2] that map to the numbered sources above.\n\
- If unsure, say what to verify.\n";

/// The trailing [`HISTORY_WINDOW`] turns.
pub fn history_window(history: &[ConversationTurn]) -> &[ConversationTurn] {
    &history[history.len().saturating_sub(HISTORY_WINDOW)..]
}

/// `User: …` / `Assistant: …` lines for the history window. Empty turns are skipped.
pub fn render_history(history: &[ConversationTurn]) -> String {
    history_window(history)
        .iter()
        .filter(|t| !t.text.is_empty())
        .map(|t| {
            let who = match t.role {
                Role::User => "User",
                Role::Model => "Assistant",
            };
            format!("{who}: {}", t.text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Numbered `[n] title — url` blocks, 1-based, separated by a blank line.
pub fn render_context(sources: &[Source]) -> String {
    sources
        .iter()
        .enumerate()
        .map(|(i, s)| format!("[{}] {} — {}\n{}", i + 1, s.title, s.url, s.snippet))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn compose_prompt(
    system: &str,
    history: &[ConversationTurn],
    question: &str,
    sources: &[Source],
) -> String {
    let mut out = String::new();
    out.push_str(system);
    out.push_str("\n\n");

    let hist = render_history(history);
    if !hist.is_empty() {
        out.push_str("Conversation so far:\n");
        out.push_str(&hist);
        out.push_str("\n\n");
    }

    out.push_str("User question:\n");
    out.push_str(question);
    out.push_str("\n\n");

    if !sources.is_empty() {
        out.push_str(CONTEXT_HEADER);
        out.push('\n');
        out.push_str(&render_context(sources));
        out.push_str("\n\n");
    }

    out.push_str(CLOSING_INSTRUCTIONS);
    out
}

/// The "Sources" message shown to the user ahead of a grounded answer.
pub fn render_sources_markdown(provider: &str, sources: &[Source]) -> String {
    let bullets = sources
        .iter()
        .map(|s| {
            let preview: String = s.snippet.chars().take(SNIPPET_PREVIEW_CHARS).collect();
            format!("- [{}]({}) — {}…", s.title, s.url, preview)
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!("**Sources ({provider}):**\n{bullets}")
}
