pub mod config;
pub mod conversation;
pub mod corpus;
pub mod dialog;
pub mod embedding;
pub mod error;
pub mod explain;
pub mod extractor;
pub mod llm;
pub mod params;
pub mod policy;
pub mod ranker;
pub mod runner;
pub mod session;
pub mod storage;

// Re-export commonly used types
pub use config::{CorpusConfig, EmbeddingConfig, FlowConfig};
pub use conversation::{ConversationState, Phase, Role, Turn};
pub use corpus::{
    CorpusQuery, CorpusSource, InMemoryCorpus, PatentRecord, PostgresCorpus, Predicate, RawRow,
    normalize_rows,
};
pub use dialog::{DialogStateMachine, Transition, TurnOutcome};
#[cfg(feature = "local-embeddings")]
pub use embedding::LocalEmbedder;
pub use embedding::{Embedder, OpenAiEmbedder, cosine_similarity};
pub use error::{FlowError, Result};
pub use explain::{Explanation, ExplanationGenerator};
pub use extractor::{ParameterExtractor, parse_extraction};
pub use llm::{RigTextGenerator, TextGenerator};
pub use params::{ParsedParams, SearchParameters};
pub use policy::{CompletenessPolicy, Slot};
pub use ranker::{RankedResult, Ranking, SimilarityRanker};
pub use runner::SessionRunner;
pub use session::{PatentFinder, PatentSession, TurnReply};
pub use storage::{InMemorySessionStorage, SessionHandle, SessionStorage};
