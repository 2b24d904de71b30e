//! Per-conversation state owned by the host and lent to each turn.

use crate::{ConversationTurn, Error, Result, Role};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    history: Vec<ConversationTurn>,
    ground_always: bool,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    pub fn ground_always(&self) -> bool {
        self.ground_always
    }

    /// Flip the thread toggle; returns the new value.
    pub fn toggle_grounding(&mut self) -> bool {
        self.ground_always = !self.ground_always;
        self.ground_always
    }

    /// Append a completed question/answer pair.
    pub fn record_exchange(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        self.history.push(ConversationTurn::user(question));
        self.history.push(ConversationTurn::model(answer));
    }

    /// Rebuild history from a persisted thread.
    ///
    /// Only `message` steps count. A step is a user turn when its author is
    /// `user_identifier`, otherwise a model turn.
    pub fn resume(thread: &ThreadRecord, user_identifier: &str) -> Self {
        let history = thread
            .steps
            .iter()
            .filter(|s| s.kind.as_deref() == Some("message"))
            .map(|s| {
                let role = if s.author.as_deref() == Some(user_identifier) {
                    Role::User
                } else {
                    Role::Model
                };
                let text = s
                    .output
                    .as_deref()
                    .filter(|o| !o.is_empty())
                    .or(s.input.as_deref())
                    .unwrap_or_default()
                    .to_string();
                ConversationTurn { role, text }
            })
            .collect();
        Self {
            history,
            ground_always: false,
        }
    }
}

/// A thread as persisted by the host chat framework.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreadRecord {
    #[serde(default)]
    pub steps: Vec<ThreadStep>,
}

impl ThreadRecord {
    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| Error::InvalidThread(e.to_string()))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreadStep {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
}
