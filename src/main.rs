use std::net::SocketAddr;
use std::sync::Arc;
use facematch_backend::engine::{EngineConfig, FaceEngine};
use facematch_backend::utils::config::Config;
use facematch_backend::utils::logging;
use facematch_backend::AppState;
use tracing::info;

#[cfg(feature = "facial-recognition")]
async fn start_engine(cfg: &Config) -> Arc<dyn FaceEngine> {
    use facematch_backend::engine::onnx::OnnxEngine;

    let onnx = Arc::new(OnnxEngine::new(cfg.models_dir.clone(), cfg.use_gpu));
    if cfg.auto_download {
        if let Err(e) = onnx.download_models().await {
            tracing::warn!("Face model auto-download failed: {:#}", e);
        }
    } else {
        info!("Face model auto-download disabled.");
    }
    // Load sessions now so the first request does not pay for it; failures
    // resurface per request as engine errors.
    let preload = onnx.clone();
    let pinned = EngineConfig::pinned().model;
    match tokio::task::spawn_blocking(move || preload.preload(pinned)).await {
        Ok(Ok(())) => info!("Face models ready ({})", pinned),
        Ok(Err(e)) => tracing::warn!("Face models not loaded: {:#}", e),
        Err(e) => tracing::warn!("Face model preload task failed: {}", e),
    }
    onnx
}

#[cfg(not(feature = "facial-recognition"))]
async fn start_engine(_cfg: &Config) -> Arc<dyn FaceEngine> {
    tracing::warn!("Built without facial-recognition; verify requests will fail (model {})", EngineConfig::pinned().model);
    Arc::new(facematch_backend::engine::UnavailableEngine)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::from_env();
    logging::init(cfg.engine_quiet);
    info!("staging uploads in {:?}, max dimension {}", cfg.staging_dir, cfg.max_dimension);

    let engine = start_engine(&cfg).await;
    let addr = SocketAddr::from((cfg.host, cfg.port));
    let state = Arc::new(AppState::new(cfg, engine)?);
    let app = facematch_backend::api::routes::router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening" = %addr);
    axum::serve(listener, app).await?;
    Ok(())
}
