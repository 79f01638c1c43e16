//! Slot-filling dialog.
//!
//! Every transition consumes a [`ConversationState`] and hands back the next
//! one together with the assistant reply. Nothing here keeps per-session
//! state of its own, so one machine serves every session.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::{
    conversation::{ConversationState, Phase},
    error::FlowError,
    extractor::ParameterExtractor,
    llm::TextGenerator,
    policy::{CompletenessPolicy, Slot},
};

const TOPIC_SUGGESTION_PROMPT: &str = r#"You are a patent research assistant.
For the technology area or keywords the user gives, suggest 2 to 4 closely related technical fields or sub-topics, written as a short numbered list in the user's language.
Do NOT mention IPC codes or any other patent classification numbers. Stay strictly technical.

EXAMPLE for "逆浸透膜の機械学習":
1. 逆浸透膜プロセスにおける運転条件最適化のための機械学習アルゴリズム開発
2. センサー収集データを用いた膜汚染検知および予測技術
3. AIを活用した膜製造工程での材料選定と品質管理
"#;

const TOPIC_FOLLOW_UP: &str =
    "Which of these would you like to investigate? Feel free to describe a more specific technical theme.";

const AFFIRMATIVE_REPLIES: &[&str] = &[
    "yes", "y", "ok", "okay", "confirm", "go", "sure", "はい", "お願いします", "ok です",
];

/// What a transition did, for callers that need to react to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Sub-topics were suggested; no extraction ran
    TopicsSuggested,
    /// The merged parameters still lack these slots
    NeedsMore(Vec<Slot>),
    /// Parameters are complete and shown back for confirmation
    AwaitingConfirmation,
    /// Slot filling finished on this turn
    Completed,
    /// The extractor reply was unusable and the user was asked to rephrase
    ReformatRequested,
    /// An external call failed; the message says so
    Failed(&'static str),
    /// Search parameters were already complete; the turn is a relevance query
    RelevanceQuery,
}

/// Result of feeding one user turn to the machine.
#[derive(Debug)]
pub struct Transition {
    pub state: ConversationState,
    pub reply: String,
    pub outcome: TurnOutcome,
}

pub struct DialogStateMachine {
    extractor: ParameterExtractor,
    generator: Arc<dyn TextGenerator>,
    policy: CompletenessPolicy,
}

impl DialogStateMachine {
    pub fn new(generator: Arc<dyn TextGenerator>, policy: CompletenessPolicy) -> Self {
        Self {
            extractor: ParameterExtractor::new(Arc::clone(&generator)),
            generator,
            policy,
        }
    }

    /// Feeds one user turn through the machine.
    ///
    /// Once slot filling is complete the turn is only recorded and reported
    /// as [`TurnOutcome::RelevanceQuery`] with an empty reply; ranking belongs
    /// to the caller, which reports back through [`Self::ranked`].
    pub async fn on_user_turn(&self, mut state: ConversationState, text: &str) -> Transition {
        match state.phase {
            Phase::Complete | Phase::Ranking | Phase::Explaining => {
                state.push_user(text);
                Transition {
                    state,
                    reply: String::new(),
                    outcome: TurnOutcome::RelevanceQuery,
                }
            }
            Phase::AwaitingConfirmation if is_affirmative(text) => {
                state.push_user(text);
                state.phase = Phase::Complete;
                let reply = "Search parameters confirmed.".to_string();
                state.push_assistant(reply.clone());
                info!("Search parameters confirmed by user");
                Transition {
                    state,
                    reply,
                    outcome: TurnOutcome::Completed,
                }
            }
            Phase::Collecting | Phase::Extracting | Phase::AwaitingConfirmation => {
                self.collect(state, text).await
            }
        }
    }

    async fn collect(&self, mut state: ConversationState, text: &str) -> Transition {
        state.push_user(text);

        if self.policy.suggest_topics_first && !state.topics_suggested {
            return self.suggest_topics(state).await;
        }

        state.phase = Phase::Extracting;
        let (reply, outcome) = match self.extractor.extract(&state).await {
            Ok(parsed) => {
                state.apply_extraction(parsed);
                let missing = self.policy.missing(&state.params);
                if !missing.is_empty() {
                    state.phase = Phase::Collecting;
                    info!(missing = ?missing, "Parameters incomplete, asking follow-up");
                    (
                        follow_up_message(&state, &missing),
                        TurnOutcome::NeedsMore(missing),
                    )
                } else if self.policy.require_confirmation {
                    state.phase = Phase::AwaitingConfirmation;
                    (
                        confirmation_message(&state),
                        TurnOutcome::AwaitingConfirmation,
                    )
                } else {
                    state.phase = Phase::Complete;
                    info!("Search parameters complete");
                    (completion_message(&state), TurnOutcome::Completed)
                }
            }
            Err(FlowError::ExtractionParseFailure { reason, raw }) => {
                state.phase = Phase::Collecting;
                warn!(reason = %reason, raw = %raw, "Extraction output unusable, asking user to reformat");
                (
                    reformat_request(&self.policy.missing(&state.params)),
                    TurnOutcome::ReformatRequested,
                )
            }
            Err(e) => {
                state.phase = Phase::Collecting;
                error!(error = %e, kind = e.kind(), "Extraction call failed");
                (
                    format!("Sorry, the assistant service is unavailable right now ({e}). Please send your message again."),
                    TurnOutcome::Failed(e.kind()),
                )
            }
        };

        state.push_assistant(reply.clone());
        Transition {
            state,
            reply,
            outcome,
        }
    }

    async fn suggest_topics(&self, mut state: ConversationState) -> Transition {
        let (reply, outcome) = match self
            .generator
            .complete(TOPIC_SUGGESTION_PROMPT, state.turns())
            .await
        {
            Ok(topics) => {
                state.topics_suggested = true;
                (
                    format!("{topics}\n\n{TOPIC_FOLLOW_UP}"),
                    TurnOutcome::TopicsSuggested,
                )
            }
            Err(e) => {
                error!(error = %e, "Topic suggestion failed");
                (
                    format!("Sorry, the assistant service is unavailable right now ({e}). Please send your message again."),
                    TurnOutcome::Failed(e.kind()),
                )
            }
        };
        state.phase = Phase::Collecting;
        state.push_assistant(reply.clone());
        Transition {
            state,
            reply,
            outcome,
        }
    }

    /// Adds an assistant message without changing phase.
    pub fn respond(&self, mut state: ConversationState, reply: &str) -> ConversationState {
        state.push_assistant(reply);
        state
    }

    /// A ranking was produced for the latest relevance query.
    pub fn ranked(&self, mut state: ConversationState, reply: &str) -> ConversationState {
        state.phase = Phase::Ranking;
        state.push_assistant(reply);
        state
    }

    /// Explanations were produced for the current ranking.
    pub fn explained(&self, mut state: ConversationState) -> ConversationState {
        state.phase = Phase::Explaining;
        state
    }

    /// The corpus had no match; parameters are kept so the user can relax one.
    pub fn reopen(&self, mut state: ConversationState, reply: &str) -> ConversationState {
        state.phase = Phase::Collecting;
        state.push_assistant(reply);
        state
    }
}

fn is_affirmative(text: &str) -> bool {
    let normalized = text
        .trim()
        .trim_end_matches(['.', '!', '。', '！'])
        .trim()
        .to_lowercase();
    AFFIRMATIVE_REPLIES.contains(&normalized.as_str())
}

fn combined_example(slots: &[Slot]) -> String {
    slots
        .iter()
        .map(|slot| slot.example())
        .collect::<Vec<_>>()
        .join(", ")
}

fn follow_up_message(state: &ConversationState, missing: &[Slot]) -> String {
    let mut message = String::new();
    if !state.params.ipc_codes.is_empty() {
        message.push_str("Suggested IPC codes:\n");
        for code in &state.params.ipc_codes {
            match state.ipc_notes.get(code) {
                Some(note) => message.push_str(&format!("- {code}: {note}\n")),
                None => message.push_str(&format!("- {code}\n")),
            }
        }
        message.push('\n');
    }
    message.push_str("To search the patent corpus I still need:\n");
    for slot in missing {
        message.push_str(&format!("- {} (e.g. {})\n", slot.label(), slot.example()));
    }
    message.push_str(&format!(
        "You can answer in one line, separated by commas, for example: {}",
        combined_example(missing)
    ));
    message
}

fn reformat_request(missing: &[Slot]) -> String {
    if missing.is_empty() {
        return "Sorry, I could not interpret that. Please restate the values you want to change, for example: JP, Sony, 2021-01-01".to_string();
    }
    let labels = missing
        .iter()
        .map(|slot| slot.key())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Sorry, I could not interpret that. Please give {labels} separated by commas, for example: {}",
        combined_example(missing)
    )
}

fn confirmation_message(state: &ConversationState) -> String {
    format!(
        "These are the search parameters:\n```json\n{}\n```\nReply \"yes\" to run the search, or tell me what to change.",
        state.params.to_pretty_json()
    )
}

fn completion_message(state: &ConversationState) -> String {
    format!(
        "These are the final search parameters:\n```json\n{}\n```",
        state.params.to_pretty_json()
    )
}
