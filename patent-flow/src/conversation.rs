use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::params::{ParsedParams, SearchParameters};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message of the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// Dialog phases, in the order a successful session walks through them
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// Waiting for the user to supply missing slots
    #[default]
    Collecting,
    /// An extraction call is in flight
    Extracting,
    /// Parameters are complete and shown back to the user for a yes/no
    AwaitingConfirmation,
    /// Slot filling is done; the corpus can be queried
    Complete,
    /// A ranking of the retrieved records exists
    Ranking,
    /// Explanations for the top ranked records exist
    Explaining,
}

/// Per-session dialog state. Owned by exactly one session and only replaced
/// through [`crate::dialog::DialogStateMachine`] transitions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    turns: Vec<Turn>,
    pub params: SearchParameters,
    pub phase: Phase,
    pub topics_suggested: bool,
    /// Descriptions of the current IPC codes, keyed by code
    #[serde(default)]
    pub ipc_notes: BTreeMap<String, String>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append-only view of the conversation.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.turns.push(Turn::user(text));
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.turns.push(Turn::assistant(text));
    }

    /// Merges an extraction into the parameters. Notes are kept only for codes
    /// still present after the merge.
    pub fn apply_extraction(&mut self, mut update: ParsedParams) {
        let notes = std::mem::take(&mut update.ipc_notes);
        self.params.merge(update);
        self.ipc_notes.extend(notes);
        let codes = &self.params.ipc_codes;
        self.ipc_notes.retain(|code, _| codes.contains(code));
    }

    pub fn last_user_text(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|turn| turn.role == Role::User)
            .map(|turn| turn.text.as_str())
    }
}
