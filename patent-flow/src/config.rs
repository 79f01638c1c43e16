//! Environment configuration, read once at startup.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::{
    corpus::DEFAULT_RESULT_CAP,
    error::{FlowError, Result},
    policy::CompletenessPolicy,
};

#[derive(Debug, Clone, PartialEq)]
pub enum EmbeddingConfig {
    /// OpenAI-compatible `/embeddings` endpoint
    OpenAi {
        api_key: String,
        api_base: String,
        model: String,
        timeout: Duration,
    },
    /// In-process fastembed model
    Local,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CorpusConfig {
    Postgres { database_url: String, table: String },
    JsonFile(PathBuf),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlowConfig {
    pub openrouter_api_key: String,
    pub completion_model: String,
    pub temperature: f64,
    pub generation_timeout: Duration,
    pub embedding: EmbeddingConfig,
    pub policy: CompletenessPolicy,
    pub result_cap: usize,
    pub corpus: CorpusConfig,
    pub explanation_language: String,
    pub summary_chars: usize,
    pub port: u16,
}

impl FlowConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &str| get(key).ok_or_else(|| FlowError::Config(format!("{key} not set")));

        let openrouter_api_key = required("OPENROUTER_API_KEY")?;

        let embedding = match get("EMBEDDING_PROVIDER").as_deref().unwrap_or("openai") {
            "openai" => EmbeddingConfig::OpenAi {
                api_key: get("EMBEDDING_API_KEY")
                    .or_else(|| get("OPENAI_API_KEY"))
                    .ok_or_else(|| {
                        FlowError::Config("EMBEDDING_API_KEY or OPENAI_API_KEY not set".into())
                    })?,
                api_base: get("EMBEDDING_API_BASE")
                    .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
                model: get("EMBEDDING_MODEL")
                    .unwrap_or_else(|| "text-embedding-ada-002".to_string()),
                timeout: Duration::from_secs(parse_or(&get, "EMBEDDING_TIMEOUT_SECS", 60)?),
            },
            "local" => EmbeddingConfig::Local,
            other => {
                return Err(FlowError::Config(format!(
                    "EMBEDDING_PROVIDER must be openai or local, got {other}"
                )));
            }
        };

        let policy_name = get("DIALOG_POLICY").unwrap_or_else(|| "full".to_string());
        let policy = CompletenessPolicy::from_name(&policy_name)
            .ok_or_else(|| FlowError::Config(format!("unknown DIALOG_POLICY: {policy_name}")))?
            .with_confirmation(parse_bool(&get, "REQUIRE_CONFIRMATION")?)
            .with_topic_suggestion(parse_bool(&get, "SUGGEST_TOPICS")?);

        let corpus = match (get("CORPUS_DATABASE_URL"), get("CORPUS_JSON_PATH")) {
            (Some(database_url), _) => CorpusConfig::Postgres {
                database_url,
                table: get("CORPUS_TABLE").unwrap_or_else(|| "patent_publications".to_string()),
            },
            (None, Some(path)) => CorpusConfig::JsonFile(PathBuf::from(path)),
            (None, None) => {
                return Err(FlowError::Config(
                    "CORPUS_DATABASE_URL or CORPUS_JSON_PATH not set".into(),
                ));
            }
        };

        let result_cap: usize = parse_or(&get, "RESULT_CAP", DEFAULT_RESULT_CAP)?;
        if result_cap == 0 {
            return Err(FlowError::Config("RESULT_CAP must be positive".into()));
        }

        Ok(Self {
            openrouter_api_key,
            completion_model: get("COMPLETION_MODEL")
                .unwrap_or_else(|| "openai/gpt-4.1".to_string()),
            temperature: parse_or(&get, "TEMPERATURE", 0.2)?,
            generation_timeout: Duration::from_secs(parse_or(&get, "GENERATION_TIMEOUT_SECS", 60)?),
            embedding,
            policy,
            result_cap,
            corpus,
            explanation_language: get("EXPLANATION_LANGUAGE")
                .unwrap_or_else(|| "Japanese".to_string()),
            summary_chars: parse_or(&get, "SUMMARY_CHARS", 200)?,
            port: parse_or(&get, "PORT", 3000)?,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| FlowError::Config(format!("invalid {key} value {raw:?}: {e}"))),
        None => Ok(default),
    }
}

fn parse_bool<G>(get: &G, key: &str) -> Result<bool>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.to_ascii_lowercase()).as_deref() {
        None | Some("0" | "false" | "no" | "off") => Ok(false),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some(other) => Err(FlowError::Config(format!("invalid {key} value {other:?}"))),
    }
}
