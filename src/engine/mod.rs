use ndarray::ArrayD;

use crate::error::ClassifierError;
use crate::types::Config;

#[cfg(feature = "onnx")]
pub mod onnx;
#[cfg(feature = "torch")]
pub mod torch;

/// A loaded classifier model.
///
/// Created exactly once at startup and shared read-only across request
/// tasks for the process lifetime. Implementations that wrap a backend
/// session that is not safe for concurrent invocation must gate it behind
/// an internal mutex; `infer` therefore takes `&self`.
pub trait Engine: Send + Sync {
    fn name(&self) -> &'static str;
    fn infer(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>, ClassifierError>;
}

pub struct EngineFactory;

impl EngineFactory {
    pub fn create(cfg: &Config) -> Result<Box<dyn Engine>, ClassifierError> {
        match cfg.model.backend.as_str() {
            #[cfg(feature = "onnx")]
            "onnx" => Ok(Box::new(crate::engine::onnx::OnnxEngine::new(cfg)?)),

            #[cfg(feature = "torch")]
            "torch" => Ok(Box::new(crate::engine::torch::TorchEngine::new(cfg)?)),

            other => Err(ClassifierError::Startup(format!(
                "backend '{other}' not supported (build with features: onnx, torch)"
            ))),
        }
    }
}
