mod classifier;
mod config;
mod emotion;
mod error;
mod roberta_classifier;
mod server;
mod types;

use axum::routing::get;
use axum_prometheus::PrometheusMetricLayer;
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;

use config::Config;
use roberta_classifier::{RobertaClassifier, RobertaLoadConfig};
use server::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,emotion_server=debug".into()),
        )
        .init();

    let config = Config::parse();
    tracing::info!("Starting emotion server with config: {:?}", config);

    let load_config = RobertaLoadConfig {
        model_id: config.model_id.clone(),
        model_path: config.model_path.clone(),
        revision: config.model_revision.clone(),
        use_pth: config.use_pth,
        cpu: config.cpu_only,
        max_sequence_length: config.max_sequence_length,
        id2label: config.parse_id2label(),
    };

    tracing::info!("Loading emotion model...");
    let classifier = RobertaClassifier::load(load_config).await?;
    tracing::info!("Model loaded successfully");

    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();

    let app = server::router(AppState::new(Arc::new(classifier)))
        .route("/metrics", get(|| async move { metric_handle.render() }))
        .layer(prometheus_layer);

    let listener = TcpListener::bind(&config.server_address()).await?;
    tracing::info!("Server running on http://{}", config.server_address());

    axum::serve(listener, app).await?;
    Ok(())
}
