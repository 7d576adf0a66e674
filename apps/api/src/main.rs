mod artifacts;
mod config;
mod db;
mod errors;
mod generation;
mod jobs;
mod llm_client;
mod models;
mod profiles;
mod render;
mod routes;
mod state;
#[cfg(test)]
mod test_support;

use anyhow::Result;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::artifacts::S3ArtifactStore;
use crate::config::Config;
use crate::db::create_pool;
use crate::jobs::notify::RedisNotifier;
use crate::jobs::orchestrator::{Collaborators, Orchestrator};
use crate::jobs::store::PgRunStore;
use crate::llm_client::LlmClient;
use crate::profiles::PgProfileStore;
use crate::render::compiler::ProcessCompiler;
use crate::render::converter::PandocConverter;
use crate::render::DocumentRenderer;
use crate::routes::build_router;
use crate::state::AppState;

/// Upper bound on a single language-model HTTP call.
const LLM_TIMEOUT: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting ATS API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;

    // Initialize Redis
    let redis = redis::Client::open(config.redis_url.clone())?;
    info!("Redis client initialized");

    // Initialize S3 / MinIO
    let s3 = build_s3_client(&config).await;
    info!("S3 client initialized");

    // Initialize LLM client
    let llm = LlmClient::new(config.anthropic_api_key.clone(), LLM_TIMEOUT)?;
    info!("LLM client initialized (model: {})", llm_client::MODEL);

    let pipeline = config.pipeline.clone();
    let compiler = ProcessCompiler::from_settings(&pipeline.compiler);
    info!(
        program = %pipeline.compiler.program,
        timeout_secs = pipeline.compiler.timeout.as_secs(),
        sandboxed = !pipeline.compiler.sandbox_wrapper.is_empty(),
        "Document compiler configured"
    );

    let deps = Collaborators {
        runs: Arc::new(PgRunStore::new(db.clone())),
        profiles: Arc::new(PgProfileStore::new(db)),
        artifacts: Arc::new(S3ArtifactStore::new(s3, config.s3_bucket.clone())),
        notifier: Arc::new(RedisNotifier::new(redis)),
        llm: Arc::new(llm),
        renderer: DocumentRenderer::new(Arc::new(compiler), pipeline.compiler.clone()),
        converter: Arc::new(PandocConverter::default()),
    };
    info!(
        workers = pipeline.worker_concurrency,
        target_score = pipeline.target_score,
        max_iterations = pipeline.max_iterations,
        "Pipeline orchestrator ready"
    );

    // Build app state
    let state = AppState {
        orchestrator: Orchestrator::new(deps, pipeline),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins once the frontend host is fixed

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Constructs an S3 client configured for MinIO (local) or AWS (production).
async fn build_s3_client(config: &Config) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        &config.aws_access_key_id,
        &config.aws_secret_access_key,
        None,
        None,
        "ats-static",
    );

    let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(credentials)
        .endpoint_url(&config.s3_endpoint)
        .load()
        .await;

    aws_sdk_s3::Client::new(&s3_config)
}
