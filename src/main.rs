pub mod config;
pub mod diagnosis;
pub mod error;
pub mod health;
pub mod media_ingestion;
pub mod presenter;
pub mod processing;
pub mod request_counter;

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::diagnosis::{DiagnosisProvider, GeminiClient};
use crate::health::health_check;
use crate::media_ingestion::handle_diagnosis_upload;
use crate::processing::ImageProcessor;
use crate::request_counter::RequestCounter;

// Headroom for multipart boundaries and headers on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<dyn DiagnosisProvider>,
    pub image_processor: ImageProcessor,
    pub request_counter: RequestCounter,
    pub max_upload_bytes: usize,
}

pub fn app(state: AppState) -> Router {
    let body_limit = state.max_upload_bytes + MULTIPART_OVERHEAD_BYTES;

    Router::new()
        .route("/", get(presenter::index))
        .route("/health", get(health_check))
        .route("/api/diagnose", post(handle_diagnosis_upload))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("leafdoc=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env().context("Invalid configuration")?;
    tracing::info!(
        "Using model {} at {} (timeout {}s, max upload {} bytes, max dimension {}px)",
        config.model,
        config.endpoint,
        config.request_timeout.as_secs(),
        config.max_upload_bytes,
        config.max_image_dimension
    );

    let provider = GeminiClient::new(&config).context("Failed to build Gemini client")?;
    let request_counter = RequestCounter::new();

    let state = AppState {
        provider: Arc::new(provider),
        image_processor: ImageProcessor::new(config.max_image_dimension),
        request_counter: request_counter.clone(),
        max_upload_bytes: config.max_upload_bytes,
    };

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    request_counter.print_summary();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
