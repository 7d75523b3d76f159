use std::sync::Arc;

use api_router::{api_routes_v1, api_state::ApiState};
use axum::Router;
use common::{
    llm::{gateway::OpenAiGateway, judge::LlmJudge},
    notifier::Notifier,
    storage::{db::SurrealDbClient, vector::VectorStore},
    utils::{
        config::{get_config, AppConfig},
        embedding::EmbeddingProvider,
    },
};
use ingestion_pipeline::{
    facts::FactService, run_worker_loop, services::DefaultPipelineServices, IngestionPipeline,
    IngestionTuning,
};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
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

    let (api_state, pipeline) = build_services(&config, Arc::clone(&db));

    info!(
        embedding_backend = api_state.embedder.backend_label(),
        embedding_dimension = api_state.embedder.dimension(),
        "embedding provider initialized"
    );

    // Worker tier: the task loop shares the process with the request tier.
    let worker_db = Arc::clone(&db);
    tokio::spawn(async move {
        if let Err(e) = run_worker_loop(worker_db, pipeline).await {
            error!("Worker process error: {}", e);
        }
    });

    let app = Router::new()
        .nest("/api/v1", api_routes_v1(&api_state))
        .with_state(api_state);

    let serve_address = format!("0.0.0.0:{}", config.http_port);
    info!("Starting server listening on {serve_address}");
    let listener = tokio::net::TcpListener::bind(serve_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Wires the shared service graph both tiers run on.
fn build_services(
    config: &AppConfig,
    db: Arc<SurrealDbClient>,
) -> (ApiState, Arc<IngestionPipeline>) {
    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));

    let embedder = Arc::new(EmbeddingProvider::from_config(config, openai_client));
    let gateway = Arc::new(OpenAiGateway::from_config(config, Arc::clone(&db)));
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
        Arc::clone(&notifier),
        tuning,
    ));

    let api_state = ApiState::new(
        db,
        config.clone(),
        embedder,
        gateway,
        notifier,
    );

    (api_state, pipeline)
}
