//! Pipeline abstraction for pre/post-processing.
//!
//! Applies the transformations before and after inference: decoding raw
//! image bytes into the model's input tensor, and turning raw class scores
//! into a ranked prediction against the label vocabulary.

use std::cmp::Ordering;
use std::sync::Arc;

use image::imageops::FilterType;
use ndarray::{Array4, ArrayD};

use crate::error::ClassifierError;
use crate::labels::Labels;
use crate::types::{InputSpec, Prediction, Ranked};

/// Trait for preprocessing a raw request payload into a model input tensor.
///
/// Implementations must be pure: identical bytes yield identical tensors.
pub trait Preprocessor: Send + Sync {
    fn run(&self, raw: &[u8]) -> Result<ArrayD<f32>, ClassifierError>;
}

/// Trait for postprocessing raw class scores into a prediction.
pub trait Postprocessor: Send + Sync {
    fn run(&self, scores: ArrayD<f32>) -> Result<Prediction, ClassifierError>;
}

/// Complete processing pipeline with pre and post stages.
///
/// Shared across request tasks; both stages operate on request-local data
/// and hold no mutable state.
#[derive(Clone)]
pub struct Pipeline {
    pub pre: Arc<dyn Preprocessor>,
    pub post: Arc<dyn Postprocessor>,
}

impl Pipeline {
    pub fn new(pre: ImagePreprocessor, post: SoftmaxRanker) -> Self {
        Self {
            pre: Arc::new(pre),
            post: Arc::new(post),
        }
    }

    /// Applies preprocessing to the raw request payload.
    ///
    /// # Arguments
    ///
    /// * `raw` - Undecoded image bytes from the request body
    ///
    /// # Returns
    ///
    /// The model input tensor, shaped `[1, C, H, W]`
    pub fn run_pre(&self, raw: &[u8]) -> Result<ArrayD<f32>, ClassifierError> {
        self.pre.run(raw)
    }

    /// Applies postprocessing to the output tensor.
    ///
    /// # Arguments
    ///
    /// * `scores` - Raw class scores from inference
    ///
    /// # Returns
    ///
    /// The ranked prediction
    pub fn run_post(&self, scores: ArrayD<f32>) -> Result<Prediction, ClassifierError> {
        self.post.run(scores)
    }
}

/// Decodes, resizes and normalizes an image payload into `[1, C, H, W]`.
///
/// Resize is `resize_exact` with the Triangle filter; normalization scales
/// pixels by `spec.scale` (default 1/255) and optionally applies per-channel
/// mean/std. Deterministic for identical input bytes.
pub struct ImagePreprocessor {
    spec: InputSpec,
}

impl ImagePreprocessor {
    pub fn new(spec: InputSpec) -> Self {
        Self { spec }
    }

    fn normalize(&self, channel: usize, value: u8) -> f32 {
        let mut v = value as f32 * self.spec.scale;
        if let Some(mean) = &self.spec.mean {
            v -= mean[channel];
        }
        if let Some(std) = &self.spec.std {
            v /= std[channel];
        }
        v
    }
}

impl Preprocessor for ImagePreprocessor {
    fn run(&self, raw: &[u8]) -> Result<ArrayD<f32>, ClassifierError> {
        let img = image::load_from_memory(raw)
            .map_err(|e| ClassifierError::InvalidImage(e.to_string()))?;

        let (c, h, w) = (self.spec.channels, self.spec.height, self.spec.width);
        let resized = img.resize_exact(w as u32, h as u32, FilterType::Triangle);

        let mut out = Array4::<f32>::zeros((1, c, h, w));
        // Config restricts channels to 1 (grayscale) or 3 (RGB).
        if c == 1 {
            let gray = resized.into_luma8();
            for (x, y, pixel) in gray.enumerate_pixels() {
                out[[0, 0, y as usize, x as usize]] = self.normalize(0, pixel.0[0]);
            }
        } else {
            let rgb = resized.into_rgb8();
            for (x, y, pixel) in rgb.enumerate_pixels() {
                for ch in 0..3 {
                    out[[0, ch, y as usize, x as usize]] = self.normalize(ch, pixel.0[ch]);
                }
            }
        }

        Ok(out.into_dyn())
    }
}

/// Ranks raw class scores against the label vocabulary.
///
/// Scores are normalized with a numerically stable softmax before ranking,
/// so confidences are well-defined in [0,1] whether the model emits logits
/// or an already-normalized distribution. The top label is the argmax; up to
/// `topk` ranked alternatives are returned alongside it.
pub struct SoftmaxRanker {
    labels: Arc<Labels>,
    topk: usize,
}

impl SoftmaxRanker {
    pub fn new(labels: Arc<Labels>, topk: usize) -> Self {
        Self { labels, topk }
    }
}

impl Postprocessor for SoftmaxRanker {
    fn run(&self, scores: ArrayD<f32>) -> Result<Prediction, ClassifierError> {
        // Accept `[N]` or `[1, N]`; anything else is a config defect.
        let flat: Vec<f32> = match scores.ndim() {
            1 => scores.iter().copied().collect(),
            2 if scores.shape()[0] == 1 => scores.iter().copied().collect(),
            _ => {
                return Err(ClassifierError::ShapeMismatch {
                    expected: vec![1, self.labels.len()],
                    actual: scores.shape().to_vec(),
                })
            }
        };

        if flat.len() != self.labels.len() {
            return Err(ClassifierError::VocabularyMismatch {
                labels: self.labels.len(),
                scores: flat.len(),
            });
        }

        let probs = softmax(&flat);

        let mut order: Vec<usize> = (0..probs.len()).collect();
        order.sort_by(|&a, &b| probs[b].partial_cmp(&probs[a]).unwrap_or(Ordering::Equal));

        let top: Vec<Ranked> = order
            .iter()
            .take(self.topk.min(probs.len()))
            .map(|&i| Ranked {
                label: self.labels.get(i).unwrap_or("").to_string(),
                confidence: probs[i],
            })
            .collect();

        let best = order[0];
        Ok(Prediction {
            label: self.labels.get(best).unwrap_or("").to_string(),
            confidence: probs[best],
            top,
        })
    }
}

/// Numerically stable softmax: shifts by the max score before
/// exponentiating, then normalizes to a distribution summing to 1.
pub(crate) fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}
