use common::{
    storage::db::SurrealDbClient,
    utils::{config::get_config, embedding::EmbeddingProvider},
};
use ingestion_pipeline::{run_worker_loop, MessagePipeline};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    // Get config
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

    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));

    let embedding_provider = Arc::new(EmbeddingProvider::from_config(
        &config,
        Some(Arc::clone(&openai_client)),
    )?);
    info!(
        embedding_backend = embedding_provider.backend_label(),
        embedding_dimension = embedding_provider.dimension(),
        "Embedding provider initialized"
    );

    // Indexes must match the provider's dimension before any vector lands
    db.ensure_initialized(embedding_provider.dimension()).await?;

    let pipeline = Arc::new(MessagePipeline::new(
        Arc::clone(&db),
        Arc::clone(&openai_client),
        config.clone(),
        Arc::clone(&embedding_provider),
    )?);

    info!(
        workers = config.worker_concurrency,
        "Starting pipeline workers"
    );
    let mut workers = Vec::with_capacity(config.worker_concurrency);
    for _ in 0..config.worker_concurrency {
        let worker_db = Arc::clone(&db);
        let worker_pipeline = Arc::clone(&pipeline);
        workers.push(tokio::spawn(async move {
            if let Err(e) = run_worker_loop(worker_db, worker_pipeline).await {
                error!("Worker process error: {}", e);
            }
        }));
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping workers");
    for worker in &workers {
        worker.abort();
    }

    Ok(())
}
