//! Generative text client: instruction plus conversation in, raw text out.
//!
//! The client never retries. Callers decide whether a failure is worth a
//! visible re-ask, because a second call to a non-deterministic model can
//! change what the conversation means.

use std::time::Duration;

use async_trait::async_trait;
use rig::completion::{Chat, Message};
use rig::prelude::*;
use rig::providers::openrouter;
use tracing::{debug, error};

use crate::{
    conversation::{Role, Turn},
    error::{FlowError, Result},
};

/// Stateless text-generation capability.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// One outbound call. Empty responses are a [`FlowError::GenerationFailure`].
    async fn complete(&self, instruction: &str, turns: &[Turn]) -> Result<String>;
}

/// Convert a conversation turn into the rig message type
pub fn to_rig_message(turn: &Turn) -> Message {
    match turn.role {
        Role::User => Message::user(turn.text.clone()),
        Role::Assistant => Message::assistant(turn.text.clone()),
    }
}

pub fn to_rig_messages(turns: &[Turn]) -> Vec<Message> {
    turns.iter().map(to_rig_message).collect()
}

/// Splits turns into the prompt sent now and the history preceding it.
///
/// With no trailing user turn there is nothing to answer, so the instruction
/// itself becomes the prompt and the whole conversation is history.
fn split_prompt<'a>(instruction: &'a str, turns: &'a [Turn]) -> (&'a str, &'a [Turn], bool) {
    match turns.split_last() {
        Some((last, history)) if last.role == Role::User => (last.text.as_str(), history, true),
        _ => (instruction, turns, false),
    }
}

/// [`TextGenerator`] backed by a rig agent on OpenRouter.
pub struct RigTextGenerator {
    client: openrouter::Client,
    model: String,
    temperature: f64,
    timeout: Duration,
}

impl RigTextGenerator {
    pub fn new(api_key: &str, model: impl Into<String>) -> Self {
        Self {
            client: openrouter::Client::new(api_key),
            model: model.into(),
            temperature: 0.2,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl TextGenerator for RigTextGenerator {
    async fn complete(&self, instruction: &str, turns: &[Turn]) -> Result<String> {
        let (prompt, history, uses_preamble) = split_prompt(instruction, turns);

        let mut builder = self.client.agent(&self.model).temperature(self.temperature);
        if uses_preamble {
            builder = builder.preamble(instruction);
        }
        let agent = builder.build();

        debug!(
            model = %self.model,
            history_len = history.len(),
            "Sending completion request"
        );

        let response = tokio::time::timeout(
            self.timeout,
            agent.chat(prompt.to_string(), to_rig_messages(history)),
        )
        .await
        .map_err(|_| {
            error!(model = %self.model, timeout_secs = self.timeout.as_secs(), "Completion timed out");
            FlowError::GenerationFailure(format!(
                "no response within {} seconds",
                self.timeout.as_secs()
            ))
        })?
        .map_err(|e| FlowError::GenerationFailure(e.to_string()))?;

        let response = response.trim().to_string();
        if response.is_empty() {
            return Err(FlowError::GenerationFailure(
                "the text service returned an empty response".to_string(),
            ));
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_is_last_user_turn() {
        let turns = vec![
            Turn::user("逆浸透膜の機械学習"),
            Turn::assistant("Which countries?"),
            Turn::user("JP, Sony, 2021-01-01"),
        ];

        let (prompt, history, uses_preamble) = split_prompt("extract", &turns);
        assert_eq!(prompt, "JP, Sony, 2021-01-01");
        assert_eq!(history.len(), 2);
        assert!(uses_preamble);
    }

    #[test]
    fn test_instruction_is_prompt_without_user_turn() {
        let (prompt, history, uses_preamble) = split_prompt("summarize this abstract", &[]);
        assert_eq!(prompt, "summarize this abstract");
        assert!(history.is_empty());
        assert!(!uses_preamble);
    }

    #[test]
    fn test_batch_conversion() {
        let turns = vec![Turn::user("Hello"), Turn::assistant("Hi")];
        assert_eq!(to_rig_messages(&turns).len(), 2);
    }
}
