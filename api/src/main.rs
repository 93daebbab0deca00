mod acquisition;
mod aggregate;
mod config;
mod domain;
mod error;
mod frames;
mod logging;
mod models;
mod pipeline;
mod process;
mod routes;
mod services;
mod store;
mod worker;

use apalis_sql::postgres::PostgresStorage;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use config::Config;
use pipeline::Pipeline;
use services::inference::InferenceClient;
use store::{InMemoryJobStore, JobStore, PgJobStore};
use worker::{JobQueue, WorkerContext};

const DB_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const DB_MAX_CONNECTIONS: u32 = 5;

pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn JobStore>,
    pub queue: JobQueue,
    pub inference: InferenceClient,
}

/// Connect to Postgres when configured. Unreachable databases fall back to
/// in-memory mode with a warning.
async fn connect_database(config: &Config) -> Option<PgPool> {
    let url = config.database_url.as_deref()?;
    match PgPoolOptions::new()
        .max_connections(DB_MAX_CONNECTIONS)
        .acquire_timeout(DB_CONNECT_TIMEOUT)
        .connect(url)
        .await
    {
        Ok(pool) => Some(pool),
        Err(e) => {
            tracing::warn!(error = %e, "Database unavailable, running in in-memory mode");
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init();

    let config = Arc::new(Config::from_env());
    for dir in [config.uploads_dir(), config.downloads_dir(), config.temp_dir.join("frames")] {
        tokio::fs::create_dir_all(&dir).await?;
    }

    let pipeline = Pipeline::from_config(config.clone())?;
    let inference = InferenceClient::new(config.ai_service_url.clone(), config.ai_service_timeout);

    let (store, queue): (Arc<dyn JobStore>, JobQueue) = match connect_database(&config).await {
        Some(pool) => {
            let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool.clone()).await?);
            PostgresStorage::setup(&pool).await?;
            let storage = PostgresStorage::new(pool);
            let ctx = WorkerContext::new(pipeline, store.clone(), config.worker_concurrency);
            tokio::spawn(worker::run_analysis_worker(
                storage.clone(),
                ctx,
                config.worker_concurrency,
            ));
            (store, JobQueue::Durable(storage))
        }
        None => {
            if config.database_url.is_none() {
                tracing::info!("DATABASE_URL not set, running in in-memory mode");
            }
            let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
            let ctx = WorkerContext::new(pipeline, store.clone(), config.worker_concurrency);
            (store, JobQueue::Local(ctx))
        }
    };

    tokio::spawn(worker::run_retention_sweeper(store.clone(), config.job_retention));

    tracing::info!(
        store = store.backend(),
        queue = queue.backend(),
        concurrency = config.worker_concurrency,
        ai_service = %config.ai_service_url,
        "Job processing ready"
    );

    let state = Arc::new(AppState {
        config: config.clone(),
        store,
        queue,
        inference,
    });
    let app = routes::build_app(state)?;

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
