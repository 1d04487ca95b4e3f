//! ONNX Runtime engine (CPU, optionally CUDA) for `ort = 2.0.0-rc.10`.
//!
//! Notes on ort v2:
//! - `SessionBuilder::new()` + `commit_from_file` to load the artifact.
//! - The CUDA execution provider is only registered when the `onnx-cuda`
//!   feature is enabled.
//! - `Session::run` takes `&mut self`, so the session sits behind a mutex;
//!   concurrent requests queue on that lock for the inference step only.

use std::path::Path;
use std::sync::Mutex;

use ndarray::ArrayD;
use ort::{
    session::{builder::GraphOptimizationLevel, builder::SessionBuilder, Session},
    value::{DynValue, Tensor},
};

use crate::engine::Engine;
use crate::error::ClassifierError;
use crate::types::Config;

pub struct OnnxEngine {
    session: Mutex<Session>,
    input_names: Vec<String>,
    output_names: Vec<String>,
    input_shapes: Vec<Vec<usize>>,
    output_shapes: Vec<Vec<usize>>,
}

impl OnnxEngine {
    pub fn new(cfg: &Config) -> Result<Self, ClassifierError> {
        let model_path = Path::new(&cfg.model.model_path);
        if !model_path.is_file() {
            return Err(ClassifierError::Startup(format!(
                "model artifact not found: {}",
                cfg.model.model_path
            )));
        }

        let mut builder = SessionBuilder::new()
            .map_err(|e| ClassifierError::Startup(format!("session builder: {e}")))?;
        builder = builder
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| ClassifierError::Startup(format!("optimization level: {e}")))?;

        #[cfg(feature = "onnx-cuda")]
        {
            builder = builder
                .with_execution_providers([
                    ort::execution_providers::CUDAExecutionProvider::default(),
                ])
                .map_err(|e| ClassifierError::Startup(format!("cuda provider: {e}")))?;
        }

        let session = builder.commit_from_file(model_path).map_err(|e| {
            ClassifierError::Startup(format!(
                "cannot load ONNX model {}: {e}",
                cfg.model.model_path
            ))
        })?;

        Ok(Self {
            session: Mutex::new(session),
            input_names: cfg.model.input_names.clone(),
            output_names: cfg.model.output_names.clone(),
            input_shapes: cfg.model.input_shapes.clone(),
            output_shapes: cfg.model.output_shapes.clone(),
        })
    }
}

impl Engine for OnnxEngine {
    fn name(&self) -> &'static str {
        "onnx"
    }

    fn infer(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>, ClassifierError> {
        let expected_in = &self.input_shapes[0];
        if input.shape() != expected_in.as_slice() {
            return Err(ClassifierError::ShapeMismatch {
                expected: expected_in.clone(),
                actual: input.shape().to_vec(),
            });
        }

        let input_tensor: Tensor<f32> = Tensor::from_array(input)
            .map_err(|e| ClassifierError::Inference(format!("input tensor: {e}")))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| ClassifierError::Inference("session lock poisoned".to_string()))?;

        let outputs = session
            .run(ort::inputs![
                &*self.input_names[0] => input_tensor
            ])
            .map_err(|e| ClassifierError::Inference(e.to_string()))?;

        let dyn_out: &DynValue = &outputs[&*self.output_names[0]];
        let out_view = dyn_out
            .try_extract_array()
            .map_err(|_| ClassifierError::Inference("output is not a Tensor<f32>".to_string()))?;

        let expected_out = &self.output_shapes[0];
        if out_view.shape() != expected_out.as_slice() {
            return Err(ClassifierError::ShapeMismatch {
                expected: expected_out.clone(),
                actual: out_view.shape().to_vec(),
            });
        }

        Ok(out_view.to_owned())
    }
}
