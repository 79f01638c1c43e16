use std::sync::Arc;

use anyhow::Context as _;
use patent_flow::{
    CorpusConfig, CorpusSource, Embedder, EmbeddingConfig, ExplanationGenerator, FlowConfig,
    InMemoryCorpus, InMemorySessionStorage, OpenAiEmbedder, PatentFinder, PostgresCorpus,
    RigTextGenerator, SessionRunner, TextGenerator,
};
use tracing::info;

fn create_embedder(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn Embedder>> {
    match config {
        EmbeddingConfig::OpenAi {
            api_key,
            api_base,
            model,
            timeout,
        } => {
            info!(model = %model, api_base = %api_base, "Using remote embeddings");
            Ok(Arc::new(OpenAiEmbedder::new(
                api_key.as_str(),
                api_base,
                model.as_str(),
                *timeout,
            )?))
        }
        EmbeddingConfig::Local => create_local_embedder(),
    }
}

#[cfg(feature = "local-embeddings")]
fn create_local_embedder() -> anyhow::Result<Arc<dyn Embedder>> {
    info!("Using local fastembed embeddings");
    Ok(Arc::new(patent_flow::LocalEmbedder::try_new()?))
}

#[cfg(not(feature = "local-embeddings"))]
fn create_local_embedder() -> anyhow::Result<Arc<dyn Embedder>> {
    anyhow::bail!("EMBEDDING_PROVIDER=local requires the local-embeddings feature")
}

async fn create_corpus(config: &CorpusConfig) -> anyhow::Result<Arc<dyn CorpusSource>> {
    match config {
        CorpusConfig::Postgres {
            database_url,
            table,
        } => {
            info!(table = %table, "Using PostgreSQL corpus");
            let corpus = PostgresCorpus::connect(database_url, table)
                .await
                .context("Failed to connect to the patent corpus")?;
            Ok(Arc::new(corpus))
        }
        CorpusConfig::JsonFile(path) => {
            info!(path = %path.display(), "Using JSON file corpus");
            Ok(Arc::new(InMemoryCorpus::from_json_file(path)?))
        }
    }
}

/// Wires the generator, embedder and corpus named by `config` into a runner
/// backed by in-memory session storage.
pub async fn create_session_runner(config: &FlowConfig) -> anyhow::Result<SessionRunner> {
    let generator: Arc<dyn TextGenerator> = Arc::new(
        RigTextGenerator::new(&config.openrouter_api_key, config.completion_model.as_str())
            .with_temperature(config.temperature)
            .with_timeout(config.generation_timeout),
    );
    let embedder = create_embedder(&config.embedding)?;
    let corpus = create_corpus(&config.corpus).await?;

    let explainer = ExplanationGenerator::new(Arc::clone(&generator))
        .with_language(config.explanation_language.as_str())
        .with_summary_chars(config.summary_chars);

    let finder = PatentFinder::new(generator, embedder, corpus, config.policy.clone())
        .with_result_cap(config.result_cap)
        .with_explainer(explainer);

    info!(
        model = %config.completion_model,
        required = ?config.policy.required(),
        confirmation = config.policy.require_confirmation,
        result_cap = config.result_cap,
        "Patent search workflow ready"
    );

    Ok(SessionRunner::new(
        Arc::new(finder),
        Arc::new(InMemorySessionStorage::new()),
    ))
}
