use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::{llm::TextGenerator, ranker::RankedResult};

/// Hard upper bound on explanations per request.
pub const MAX_EXPLANATIONS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Explanation {
    pub id: String,
    pub title: String,
    pub summary: String,
    /// The summary is an error placeholder, not generated text
    pub failed: bool,
}

/// Writes lay summaries of ranked abstracts, one generator call per record.
pub struct ExplanationGenerator {
    generator: Arc<dyn TextGenerator>,
    language: String,
    summary_chars: usize,
}

impl ExplanationGenerator {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            generator,
            language: "Japanese".to_string(),
            summary_chars: 200,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_summary_chars(mut self, summary_chars: usize) -> Self {
        self.summary_chars = summary_chars;
        self
    }

    fn instruction(&self, abstract_text: &str) -> String {
        format!(
            "The following is a patent abstract. Explain it in {language} in about {chars} characters, \
             so that a non-specialist can follow it. Rephrase technical terms in plain words.\n---\n{abstract_text}",
            language = self.language,
            chars = self.summary_chars,
        )
    }

    /// Explains the top `n` results, with `n` clamped to `[1, min(10, len)]`.
    ///
    /// A failed call yields a placeholder for that record only; the batch
    /// always has one entry per selected result.
    pub async fn explain(&self, ranked: &[RankedResult], n: usize) -> Vec<Explanation> {
        if ranked.is_empty() {
            return Vec::new();
        }
        let count = n.clamp(1, ranked.len().min(MAX_EXPLANATIONS));

        let mut explanations = Vec::with_capacity(count);
        for result in &ranked[..count] {
            let record = &result.record;
            let explanation = match self
                .generator
                .complete(&self.instruction(&record.abstract_text), &[])
                .await
            {
                Ok(summary) => Explanation {
                    id: record.id.clone(),
                    title: record.title.clone(),
                    summary,
                    failed: false,
                },
                Err(e) => {
                    error!(id = %record.id, error = %e, "Explanation failed");
                    Explanation {
                        id: record.id.clone(),
                        title: record.title.clone(),
                        summary: format!("Summary unavailable: {e}"),
                        failed: true,
                    }
                }
            };
            explanations.push(explanation);
        }

        info!(
            requested = n,
            produced = explanations.len(),
            failed = explanations.iter().filter(|e| e.failed).count(),
            "Explanations generated"
        );
        explanations
    }
}
