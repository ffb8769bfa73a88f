//! Survey Sentinel
//!
//! Fraud detection and review service for field survey submissions.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      SURVEY SENTINEL                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐  ┌───────────────┐  ┌──────────────────────┐  │
//! │  │  API      │  │  Fraud Engine │  │  Scoring Workers     │  │
//! │  │  (Axum)   │  │  (5 rules)    │  │  (bounded queue)     │  │
//! │  └─────┬─────┘  └───────┬───────┘  └──────────┬───────────┘  │
//! │        └────────────────┼─────────────────────┘              │
//! │                         ▼                                    │
//! │                  ┌─────────────┐                             │
//! │                  │ PostgreSQL  │                             │
//! │                  └─────────────┘                             │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod config;
mod db;
mod engine;
mod error;
mod handlers;
mod models;
mod review;
mod worker;

use anyhow::Context;
use axum::{
    routing::{get, post, put},
    Router,
};
use std::net::SocketAddr;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use error::{AppError, AppResult};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "survey_sentinel=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env();

    tracing::info!("Survey Sentinel starting...");
    tracing::info!(
        "Database: {}",
        config.database_url.split('@').last().unwrap_or("***")
    );

    // Initialize database pool and schema
    let pool = db::create_pool(&config.database_url)
        .await
        .context("Failed to create database pool")?;

    tracing::info!("Running database migrations...");
    db::run_migrations(&pool)
        .await
        .context("Failed to run migrations")?;

    // Scoring queue and workers
    let (queue, rx) = worker::ScoreQueue::new(config.queue_capacity);
    worker::spawn_workers(pool.clone(), queue.clone(), rx, config.worker_concurrency);

    // Build application state
    let state = AppState {
        pool,
        config: config.clone(),
        queue,
    };

    // Build router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("🚀 Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind listener")?;
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: sqlx::PgPool,
    pub config: config::Config,
    pub queue: worker::ScoreQueue,
}

/// Create the main router with all routes
fn create_router(state: AppState) -> Router {
    let public_routes = Router::new().route("/health", get(handlers::health::check));

    let api_routes = Router::new()
        // Scoring trigger
        .route("/api/v1/score", post(handlers::score::trigger))
        // Detections (supervisor review)
        .route("/api/v1/detections", get(handlers::detections::list))
        .route("/api/v1/detections/clusters", get(handlers::detections::clusters))
        .route(
            "/api/v1/detections/bulk-review",
            post(handlers::detections::bulk_review),
        )
        .route("/api/v1/detections/:id", get(handlers::detections::get))
        .route(
            "/api/v1/detections/:id/review",
            put(handlers::detections::review),
        )
        // Assessor (final review)
        .route("/api/v1/assessor/queue", get(handlers::assessor::queue))
        .route("/api/v1/assessor/completed", get(handlers::assessor::completed))
        .route("/api/v1/assessor/stats", get(handlers::assessor::stats))
        .route(
            "/api/v1/assessor/recent-activity",
            get(handlers::assessor::recent_activity),
        )
        .route("/api/v1/assessor/:id/review", put(handlers::assessor::review))
        // Threshold configuration
        .route("/api/v1/thresholds", get(handlers::thresholds::list))
        .route("/api/v1/thresholds/:rule_key", put(handlers::thresholds::update));

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
