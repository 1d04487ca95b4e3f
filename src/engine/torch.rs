use std::path::Path;
use std::sync::Mutex;

use ndarray::ArrayD;
use tch::{kind::Kind, CModule, Device as TchDevice, Tensor};

use super::Engine;
use crate::error::ClassifierError;
use crate::types::Config;

/// TorchScript engine. Same admission-gate layout as the ONNX engine: the
/// module sits behind a mutex and requests queue for the forward pass only.
pub struct TorchEngine {
    module: Mutex<CModule>,
    input_shapes: Vec<Vec<usize>>,
    output_shapes: Vec<Vec<usize>>,
}

impl TorchEngine {
    pub fn new(cfg: &Config) -> Result<Self, ClassifierError> {
        let model_path = Path::new(&cfg.model.model_path);
        if !model_path.is_file() {
            return Err(ClassifierError::Startup(format!(
                "model artifact not found: {}",
                cfg.model.model_path
            )));
        }

        let module = CModule::load_on_device(model_path, TchDevice::Cpu).map_err(|e| {
            ClassifierError::Startup(format!(
                "cannot load TorchScript model {}: {e}",
                cfg.model.model_path
            ))
        })?;

        Ok(Self {
            module: Mutex::new(module),
            input_shapes: cfg.model.input_shapes.clone(),
            output_shapes: cfg.model.output_shapes.clone(),
        })
    }
}

impl Engine for TorchEngine {
    fn name(&self) -> &'static str {
        "torch"
    }

    fn infer(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>, ClassifierError> {
        let expected = &self.input_shapes[0];
        if input.shape() != expected.as_slice() {
            return Err(ClassifierError::ShapeMismatch {
                expected: expected.clone(),
                actual: input.shape().to_vec(),
            });
        }

        let flat = input
            .as_slice()
            .ok_or_else(|| ClassifierError::Inference("input not contiguous".to_string()))?;
        let dims: Vec<i64> = expected.iter().map(|&d| d as i64).collect();
        let tensor = Tensor::of_slice(flat).to_kind(Kind::Float).reshape(&dims);

        let module = self
            .module
            .lock()
            .map_err(|_| ClassifierError::Inference("module lock poisoned".to_string()))?;
        let output = module
            .forward_ts(&[tensor])
            .map_err(|e| ClassifierError::Inference(e.to_string()))?;

        let out_vec = Vec::<f32>::from(&output.to_kind(Kind::Float).flatten(0, -1));

        let out_shape = self.output_shapes[0].clone();
        let arr = ArrayD::from_shape_vec(out_shape.clone(), out_vec).map_err(|_| {
            ClassifierError::ShapeMismatch {
                expected: out_shape,
                actual: vec![output.numel() as usize],
            }
        })?;
        Ok(arr)
    }
}
