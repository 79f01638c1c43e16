//! Session orchestration: dialog turns, corpus search, ranking and explanations.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    conversation::{ConversationState, Phase},
    corpus::{CorpusQuery, CorpusSource, DEFAULT_RESULT_CAP, PatentRecord, normalize_rows},
    dialog::{DialogStateMachine, TurnOutcome},
    embedding::Embedder,
    error::Result,
    explain::{Explanation, ExplanationGenerator, MAX_EXPLANATIONS},
    llm::TextGenerator,
    policy::CompletenessPolicy,
    ranker::{Ranking, SimilarityRanker},
};

/// Everything one user's search session owns.
#[derive(Debug, Clone)]
pub struct PatentSession {
    id: String,
    state: ConversationState,
    records: Vec<PatentRecord>,
    ranking: Option<Ranking>,
    explanations: Option<Vec<Explanation>>,
}

impl PatentSession {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: ConversationState::new(),
            records: Vec::new(),
            ranking: None,
            explanations: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn records(&self) -> &[PatentRecord] {
        &self.records
    }

    pub fn ranking(&self) -> Option<&Ranking> {
        self.ranking.as_ref()
    }

    pub fn explanations(&self) -> Option<&[Explanation]> {
        self.explanations.as_deref()
    }
}

impl Default for PatentSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Assistant answer to one user turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnReply {
    pub message: String,
    pub phase: Phase,
}

/// Stateless entry point shared by every session.
pub struct PatentFinder {
    dialog: DialogStateMachine,
    corpus: Arc<dyn CorpusSource>,
    ranker: SimilarityRanker,
    explainer: ExplanationGenerator,
    result_cap: usize,
}

impl PatentFinder {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        embedder: Arc<dyn Embedder>,
        corpus: Arc<dyn CorpusSource>,
        policy: CompletenessPolicy,
    ) -> Self {
        Self {
            dialog: DialogStateMachine::new(Arc::clone(&generator), policy),
            corpus,
            ranker: SimilarityRanker::new(embedder),
            explainer: ExplanationGenerator::new(generator),
            result_cap: DEFAULT_RESULT_CAP,
        }
    }

    pub fn with_result_cap(mut self, result_cap: usize) -> Self {
        self.result_cap = result_cap.max(1);
        self
    }

    pub fn with_explainer(mut self, explainer: ExplanationGenerator) -> Self {
        self.explainer = explainer;
        self
    }

    /// Runs one user turn to completion and returns what to show the user.
    ///
    /// External failures never escape as errors: they are logged and turned
    /// into the reply message, leaving the session usable for the next turn.
    pub async fn submit_turn(&self, session: &mut PatentSession, text: &str) -> TurnReply {
        let state = std::mem::take(&mut session.state);
        let transition = self.dialog.on_user_turn(state, text).await;
        info!(
            session_id = %session.id,
            phase = ?transition.state.phase,
            outcome = ?transition.outcome,
            "Dialog turn processed"
        );

        let message = match transition.outcome {
            TurnOutcome::Completed => {
                session.state = transition.state;
                let search_message = self.search(session).await;
                format!("{}\n\n{search_message}", transition.reply)
            }
            TurnOutcome::RelevanceQuery => {
                session.state = transition.state;
                self.relevance_query(session, text).await
            }
            _ => {
                session.state = transition.state;
                transition.reply
            }
        };

        TurnReply {
            message,
            phase: session.state.phase,
        }
    }

    /// Fetches and normalizes records for the session's complete parameters.
    /// Returns the message that was appended to the conversation.
    async fn search(&self, session: &mut PatentSession) -> String {
        let query = CorpusQuery::build(&session.state.params, self.result_cap);
        let state = std::mem::take(&mut session.state);

        match self.fetch_records(&query).await {
            Ok(records) if records.is_empty() => {
                info!(session_id = %session.id, "Corpus search returned no records");
                let message = "No patents matched these parameters. Tell me which criterion to relax, \
                               for example a later date, another country or other IPC codes."
                    .to_string();
                session.records.clear();
                session.state = self.dialog.reopen(state, &message);
                message
            }
            Ok(records) => {
                info!(session_id = %session.id, records = records.len(), "Corpus search completed");
                let message = format!(
                    "Found {} patents. Describe the technology you are interested in and I will rank them by relevance.",
                    records.len()
                );
                session.records = records;
                session.ranking = None;
                session.explanations = None;
                session.state = self.dialog.respond(state, &message);
                message
            }
            Err(e) => {
                error!(session_id = %session.id, error = %e, kind = e.kind(), "Corpus search failed");
                let message = format!("The patent search failed ({e}). Send any message to try again.");
                session.records.clear();
                session.state = self.dialog.respond(state, &message);
                message
            }
        }
    }

    async fn fetch_records(&self, query: &CorpusQuery) -> Result<Vec<PatentRecord>> {
        let rows = self.corpus.fetch(query).await?;
        Ok(normalize_rows(rows))
    }

    async fn relevance_query(&self, session: &mut PatentSession, text: &str) -> String {
        // A previous search failed; retry it before ranking.
        let mut retried = None;
        if session.records.is_empty() {
            let search_message = self.search(session).await;
            if session.records.is_empty() {
                return search_message;
            }
            retried = Some(search_message);
        }

        let state = std::mem::take(&mut session.state);
        let message = match self.ranker.rank(text, &session.records).await {
            Ok(ranking) => {
                let message = ranking_message(&ranking);
                session.state = self.dialog.ranked(state, &message);
                session.ranking = Some(ranking);
                session.explanations = None;
                message
            }
            Err(e) => {
                error!(session_id = %session.id, error = %e, kind = e.kind(), "Ranking failed");
                let message = format!("Ranking failed ({e}). Send your description again to retry.");
                session.state = self.dialog.respond(state, &message);
                message
            }
        };

        match retried {
            Some(search_message) => format!("{search_message}\n\n{message}"),
            None => message,
        }
    }

    pub fn ranked_results(&self, session: &PatentSession) -> Option<Ranking> {
        session.ranking.clone()
    }

    /// Explains the top `n` ranked records. `None` until a ranking exists.
    pub async fn explanations(
        &self,
        session: &mut PatentSession,
        n: usize,
    ) -> Option<Vec<Explanation>> {
        let ranking = session.ranking.as_ref()?;
        let explanations = self.explainer.explain(&ranking.results, n).await;

        let state = std::mem::take(&mut session.state);
        session.state = self.dialog.explained(state);
        session.explanations = Some(explanations.clone());
        Some(explanations)
    }
}

fn ranking_message(ranking: &Ranking) -> String {
    let mut message = String::new();
    if !ranking.has_signal {
        warn!("Ranking produced without any abstract text");
        message.push_str(
            "All retrieved abstracts are empty, so this order does not reflect relevance.\n",
        );
    }
    message.push_str(&format!(
        "Ranked {} patents by similarity to \"{}\":\n",
        ranking.results.len(),
        ranking.query
    ));
    for result in ranking.results.iter().take(MAX_EXPLANATIONS) {
        let title = if result.record.title.is_empty() {
            "(untitled)"
        } else {
            result.record.title.as_str()
        };
        message.push_str(&format!(
            "{}. {} {} (similarity {:.3})\n",
            result.rank, result.record.id, title, result.similarity
        ));
    }
    message.trim_end().to_string()
}
