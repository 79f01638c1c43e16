use thiserror::Error;

/// Errors raised by patent-flow components.
///
/// An empty corpus result is not part of this enum: zero rows is
/// a valid outcome that callers render as "no matches".
#[derive(Error, Debug)]
pub enum FlowError {
    /// Transport, auth, deadline or empty-response failure from the text service
    #[error("Text generation failed: {0}")]
    GenerationFailure(String),

    /// Same as [`FlowError::GenerationFailure`], for the embedding service
    #[error("Embedding failed: {0}")]
    EmbeddingFailure(String),

    /// The text service answered, but not with a usable structured object
    #[error("Could not parse extraction output: {reason}")]
    ExtractionParseFailure { reason: String, raw: String },

    /// Corpus collaborator error
    #[error("Corpus query failed: {0}")]
    QueryFailure(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl FlowError {
    /// Short, stable name of the failure kind, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            FlowError::GenerationFailure(_) => "generation_failure",
            FlowError::EmbeddingFailure(_) => "embedding_failure",
            FlowError::ExtractionParseFailure { .. } => "extraction_parse_failure",
            FlowError::QueryFailure(_) => "query_failure",
            FlowError::SessionNotFound(_) => "session_not_found",
            FlowError::Config(_) => "config",
        }
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;
