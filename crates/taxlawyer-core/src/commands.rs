//! Command surface published to the host: composer commands, the `web:`
//! prefix, and the conversation starters.

use serde::{Deserialize, Serialize};

/// Literal prefix that forces grounding for one turn (matched case-insensitively).
pub const WEB_PREFIX: &str = "web:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    /// Search the web before answering this turn.
    WebSearch,
    /// Flip the per-thread "always ground" toggle.
    GroundToggle,
}

impl Command {
    pub fn id(self) -> &'static str {
        match self {
            Command::WebSearch => "WebSearch",
            Command::GroundToggle => "GroundToggle",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "WebSearch" => Some(Command::WebSearch),
            "GroundToggle" => Some(Command::GroundToggle),
            _ => None,
        }
    }

    pub fn spec(self) -> CommandSpec {
        match self {
            Command::WebSearch => CommandSpec {
                id: self.id(),
                icon: "search",
                description: "Search the Web (Brave)",
            },
            Command::GroundToggle => CommandSpec {
                id: self.id(),
                icon: "globe",
                description: "Always ground this thread",
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandSpec {
    pub id: &'static str,
    pub icon: &'static str,
    pub description: &'static str,
}

/// Commands the host should show in its composer, in display order.
pub fn commands() -> Vec<CommandSpec> {
    vec![Command::WebSearch.spec(), Command::GroundToggle.spec()]
}

/// If `text` starts with [`WEB_PREFIX`] (any case), the trimmed remainder.
pub fn strip_web_prefix(text: &str) -> Option<&str> {
    let head = text.get(..WEB_PREFIX.len())?;
    if !head.eq_ignore_ascii_case(WEB_PREFIX) {
        return None;
    }
    Some(text[WEB_PREFIX.len()..].trim())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Starter {
    pub label: &'static str,
    pub message: &'static str,
    pub icon: &'static str,
}

pub fn starters() -> Vec<Starter> {
    vec![
        Starter {
            label: "🔎 Search the Web",
            message: "web: ",
            icon: "/public/search.svg",
        },
        Starter {
            label: "VAT threshold in Uganda",
            message: "What is the VAT threshold in Uganda?",
            icon: "/public/idea.svg",
        },
        Starter {
            label: "Register for EFRIS",
            message: "How do I register for EFRIS?",
            icon: "/public/learn.svg",
        },
        Starter {
            label: "PAYE tax rates",
            message: "What are the PAYE tax rates?",
            icon: "/public/terminal.svg",
        },
        Starter {
            label: "Documents for tax registration",
            message: "What documents are needed for tax registration?",
            icon: "/public/write.svg",
        },
        Starter {
            label: "Penalties for late tax filing",
            message: "What are the penalties for late tax filing?",
            icon: "/public/alert.svg",
        },
        Starter {
            label: "Withholding tax in Uganda",
            message: "How does withholding tax work in Uganda?",
            icon: "/public/info.svg",
        },
    ]
}
