pub mod utils;
pub mod error;
pub mod models;
pub mod engine;
pub mod pipeline;
pub mod api;

use std::sync::Arc;

use engine::{EngineConfig, FaceEngine};
use pipeline::staging::StagingArea;
use pipeline::verify::Verifier;
use pipeline::Pipeline;
use utils::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pipeline: Pipeline,
}

impl AppState {
    /// Creates the staging directory and pins the engine configuration.
    pub fn new(config: Config, engine: Arc<dyn FaceEngine>) -> std::io::Result<Self> {
        let staging = StagingArea::new(&config.staging_dir)?;
        let verifier = Verifier::new(engine, EngineConfig::pinned());
        let pipeline = Pipeline::new(staging, verifier, config.max_dimension);
        Ok(Self {
            config: Arc::new(config),
            pipeline,
        })
    }
}
