pub mod engine;
mod error;
mod labels;
mod pipeline;
pub mod server;
mod types;

pub use error::ClassifierError;
pub use labels::Labels;
pub use pipeline::{ImagePreprocessor, Pipeline, Postprocessor, Preprocessor, SoftmaxRanker};
pub use types::{Config, InputSpec, Prediction, Ranked};

use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use crate::engine::{Engine, EngineFactory};
use crate::server::AppState;

/// Starts the classifier service (callable from main.rs).
///
/// The model artifact and label vocabulary are loaded before the listener
/// binds; if either fails the process never starts accepting requests.
pub async fn run_server() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cfg = Config::load()?;
    let spec = cfg.input_spec();
    info!(
        "starting classifier: backend={}, input={}x{}x{}",
        cfg.model.backend, spec.channels, spec.height, spec.width
    );

    // Label vocabulary, index-aligned with the model output
    let labels = Arc::new(Labels::from_file(&cfg.model.labels_path)?);
    labels.ensure_matches(cfg.output_classes())?;

    // Model handle: created exactly once, shared read-only afterwards
    let engine: Arc<dyn Engine> = Arc::from(EngineFactory::create(&cfg)?);
    info!("engine ready: {} ({} classes)", engine.name(), labels.len());

    let pipeline = Pipeline::new(
        ImagePreprocessor::new(spec.clone()),
        SoftmaxRanker::new(Arc::clone(&labels), cfg.server.topk),
    );

    let state = Arc::new(AppState {
        engine,
        pipeline,
        spec,
        model_name: cfg.model_name(),
        timeout: cfg.request_timeout(),
    });

    let app = server::router(state, cfg.server.max_body_bytes);
    let listener = TcpListener::bind((cfg.server.host.as_str(), cfg.server.port)).await?;
    info!("listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
