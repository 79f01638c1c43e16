use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    corpus::PatentRecord,
    embedding::{Embedder, cosine_similarity},
    error::{FlowError, Result},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub record: PatentRecord,
    pub similarity: f32,
    /// 1-based
    pub rank: usize,
}

/// One ranking pass. A new query produces a new `Ranking`; nothing is updated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ranking {
    pub query: String,
    pub results: Vec<RankedResult>,
    /// False when every abstract was empty, so the order carries no meaning
    pub has_signal: bool,
}

pub struct SimilarityRanker {
    embedder: Arc<dyn Embedder>,
}

impl SimilarityRanker {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }

    /// Orders `records` by cosine similarity between the query and each abstract.
    ///
    /// The query and every abstract go out in a single embedding batch, with
    /// the query at index 0. Empty abstracts are embedded like any other text.
    pub async fn rank(&self, query: &str, records: &[PatentRecord]) -> Result<Ranking> {
        if records.is_empty() {
            return Ok(Ranking {
                query: query.to_string(),
                results: Vec::new(),
                has_signal: false,
            });
        }

        let has_signal = records.iter().any(|r| !r.abstract_text.trim().is_empty());
        if !has_signal {
            warn!(records = records.len(), "All abstracts are empty, ranking has no signal");
        }

        let mut texts = Vec::with_capacity(records.len() + 1);
        texts.push(query.to_string());
        texts.extend(records.iter().map(|r| r.abstract_text.clone()));

        let vectors = self.embedder.embed(&texts).await?;
        if vectors.len() != texts.len() {
            return Err(FlowError::EmbeddingFailure(format!(
                "expected {} embeddings, received {}",
                texts.len(),
                vectors.len()
            )));
        }
        let (query_vector, abstract_vectors) = vectors
            .split_first()
            .ok_or_else(|| FlowError::EmbeddingFailure("no query embedding returned".into()))?;
        if let Some(bad) = abstract_vectors
            .iter()
            .find(|v| v.len() != query_vector.len())
        {
            return Err(FlowError::EmbeddingFailure(format!(
                "embedding dimension mismatch: query has {}, abstract has {}",
                query_vector.len(),
                bad.len()
            )));
        }

        let mut scored: Vec<(PatentRecord, f32)> = records
            .iter()
            .cloned()
            .zip(
                abstract_vectors
                    .iter()
                    .map(|v| cosine_similarity(query_vector, v)),
            )
            .collect();
        // sort_by is stable, so ties (including 0.0 vs -0.0) keep corpus order
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

        let results: Vec<RankedResult> = scored
            .into_iter()
            .enumerate()
            .map(|(i, (record, similarity))| RankedResult {
                record,
                similarity,
                rank: i + 1,
            })
            .collect();

        info!(
            results = results.len(),
            top_similarity = results.first().map(|r| r.similarity).unwrap_or(0.0),
            "Records ranked"
        );
        Ok(Ranking {
            query: query.to_string(),
            results,
            has_signal,
        })
    }
}
