use std::sync::Arc;

use common::{
    llm::{gateway::OpenAiGateway, judge::LlmJudge},
    notifier::Notifier,
    storage::{db::SurrealDbClient, vector::VectorStore},
    utils::{config::get_config, embedding::EmbeddingProvider},
};
use ingestion_pipeline::{
    facts::FactService, run_worker_loop, services::DefaultPipelineServices, IngestionPipeline,
    IngestionTuning,
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Standalone worker binary for deployments that separate the tiers; the
/// server binary also runs an in-process worker by default.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );

    db.ensure_initialized(config.embedding_dimensions as usize)
        .await?;

    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));

    let embedder = Arc::new(EmbeddingProvider::from_config(&config, openai_client));
    let gateway = Arc::new(OpenAiGateway::from_config(&config, Arc::clone(&db)));
    let notifier = Arc::new(Notifier::new());
    let vectors = VectorStore::new(Arc::clone(&db));

    let services = Arc::new(DefaultPipelineServices::new(
        Arc::clone(&gateway) as _,
        Arc::clone(&embedder),
    ));
    let facts = Arc::new(FactService::new(
        Arc::clone(&db),
        vectors.clone(),
        Arc::clone(&embedder),
        Arc::new(LlmJudge::new(Arc::clone(&gateway) as _)),
    ));
    let tuning = IngestionTuning {
        llm_concurrency: config.llm_concurrency,
        ..IngestionTuning::default()
    };
    let pipeline = Arc::new(IngestionPipeline::new(
        Arc::clone(&db),
        vectors,
        services,
        facts,
        notifier,
        tuning,
    ));

    run_worker_loop(db, pipeline).await
}
