use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use enhancer_backend::handlers;
use enhancer_backend::models::config::AppConfig;
use enhancer_backend::services::enhance::{EnhanceService, EnhanceSettings};
use enhancer_backend::services::inference::InferenceGate;
use enhancer_backend::services::onnx::load_models;
use enhancer_backend::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    handlers::health::init_start_time();

    tracing::info!(
        device = ?config.device,
        max_inflight = config.max_inflight_inference,
        tile_size = config.tile_size,
        tile_padding = config.tile_padding,
        "Loading models"
    );
    let models = tokio::task::spawn_blocking({
        let config = config.clone();
        move || load_models(&config)
    })
    .await??;

    let gate = InferenceGate::new(config.max_inflight_inference, config.inference_wait());
    let enhance = EnhanceService::new(EnhanceSettings::from(&config), models, gate);

    let config = Arc::new(config);
    let state = Arc::new(AppState {
        config: config.clone(),
        enhance,
    });
    let app = build_router(state);

    let addr = config.listen_addr.clone();
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install CTRL+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining connections...");
}
