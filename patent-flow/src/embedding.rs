use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::info;

use crate::error::{FlowError, Result};

/// Stateless text-embedding capability.
///
/// The returned vectors are index-aligned with `texts` and share one dimension.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Cosine similarity in `[-1, 1]`. Zero-norm or mismatched vectors score 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a > 0.0 && norm_b > 0.0 {
        let similarity = dot / (norm_a * norm_b);
        if similarity.is_finite() {
            // adding 0.0 folds -0.0 into 0.0
            similarity.clamp(-1.0, 1.0) + 0.0
        } else {
            0.0
        }
    } else {
        0.0
    }
}

/// [`Embedder`] for any OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbedder {
    client: Client,
    api_key: String,
    url: String,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(
        api_key: impl Into<String>,
        api_base: &str,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FlowError::Config(format!("could not build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            url: format!("{}/embeddings", api_base.trim_end_matches('/')),
            model: model.into(),
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        // The endpoint rejects empty strings; a single space embeds the same "no content".
        let input: Vec<&str> = texts
            .iter()
            .map(|t| if t.trim().is_empty() { " " } else { t.as_str() })
            .collect();
        let body = serde_json::json!({
            "model": self.model,
            "input": input,
        });

        let res = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| FlowError::EmbeddingFailure(e.to_string()))?;
        let json: Value = res
            .error_for_status()
            .map_err(|e| FlowError::EmbeddingFailure(e.to_string()))?
            .json()
            .await
            .map_err(|e| FlowError::EmbeddingFailure(e.to_string()))?;

        let vectors = parse_embedding_response(json)?;
        if vectors.len() != texts.len() {
            return Err(FlowError::EmbeddingFailure(format!(
                "expected {} embeddings, received {}",
                texts.len(),
                vectors.len()
            )));
        }
        info!(
            count = vectors.len(),
            dimensions = vectors.first().map(Vec::len).unwrap_or(0),
            "Texts embedded"
        );
        Ok(vectors)
    }
}

fn parse_embedding_response(json: Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|v| v.as_array())
        .ok_or_else(|| {
            FlowError::EmbeddingFailure("embedding response is missing the data array".into())
        })?;

    let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
    for (fallback_index, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(fallback_index);
        let embedding = item
            .get("embedding")
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                FlowError::EmbeddingFailure("embedding item is missing its vector".into())
            })?;
        let mut vector = Vec::with_capacity(embedding.len());
        for value in embedding {
            let number = value.as_f64().ok_or_else(|| {
                FlowError::EmbeddingFailure("embedding values must be numeric".into())
            })?;
            vector.push(number as f32);
        }
        indexed.push((index, vector));
    }

    indexed.sort_by_key(|(index, _)| *index);

    Ok(indexed.into_iter().map(|(_, vector)| vector).collect())
}

#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbedder;

#[cfg(feature = "local-embeddings")]
mod local {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use tracing::info;

    use super::Embedder;
    use crate::error::{FlowError, Result};

    /// [`Embedder`] running AllMiniLML6V2 in-process through fastembed.
    pub struct LocalEmbedder {
        model: Arc<Mutex<TextEmbedding>>,
    }

    impl LocalEmbedder {
        pub fn try_new() -> Result<Self> {
            let model = TextEmbedding::try_new(
                InitOptions::new(EmbeddingModel::AllMiniLML6V2).with_show_download_progress(true),
            )
            .map_err(|e| FlowError::Config(format!("could not load embedding model: {e}")))?;
            Ok(Self {
                model: Arc::new(Mutex::new(model)),
            })
        }
    }

    #[async_trait]
    impl Embedder for LocalEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let input = texts.to_vec();
            let model = Arc::clone(&self.model);

            // Off-load the ONNX inference to a blocking thread so the runtime keeps scheduling.
            let embeddings = tokio::task::spawn_blocking(move || {
                let mut model = model
                    .lock()
                    .map_err(|_| FlowError::EmbeddingFailure("embedding model lock poisoned".into()))?;
                model
                    .embed(input, None)
                    .map_err(|e| FlowError::EmbeddingFailure(e.to_string()))
            })
            .await
            .map_err(|e| FlowError::EmbeddingFailure(e.to_string()))??;

            info!(count = embeddings.len(), "Texts embedded locally");
            Ok(embeddings)
        }
    }
}
