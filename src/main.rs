//! Fruit classifier service - HTTP inference entrypoint.
//!
//! This binary is a thin wrapper around the fruit-classifier library.
//! Configuration is read from classifier.toml in the current directory
//! (override with CLASSIFIER_CONFIG).

use fruit_classifier::run_server;

/// Main entry point for the classifier service.
///
/// Loads the model and label vocabulary, then serves HTTP until the process
/// is terminated. A startup failure exits nonzero before any port is bound.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    run_server().await
}
