//! HTTP request handling.
//!
//! One route accepts an image upload and runs it through the
//! preprocess → infer → postprocess pipeline; a health route reports the
//! loaded model. All per-request errors are converted to structured JSON
//! responses at this boundary; none may crash the serving process.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error};

use crate::engine::Engine;
use crate::error::ClassifierError;
use crate::pipeline::Pipeline;
use crate::types::{InputSpec, Prediction, Ranked};

/// Raster formats the predict endpoint accepts.
pub const SUPPORTED_CONTENT_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/gif",
    "image/webp",
    "image/bmp",
];

/// Shared per-process state: the model handle, the processing pipeline and
/// the fixed configuration. Everything in here is read-only after startup.
pub struct AppState {
    pub engine: Arc<dyn Engine>,
    pub pipeline: Pipeline,
    pub spec: InputSpec,
    pub model_name: String,
    pub timeout: Duration,
}

/// Builds the application router.
pub fn router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/predict", post(predict))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model: String,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        model: state.model_name.clone(),
    })
}

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub label: String,
    pub confidence: f32,
    pub top: Vec<Ranked>,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub status: &'static str,
    pub message: String,
}

/// Response-side wrapper for `ClassifierError`.
///
/// Client errors (bad payload) echo their message with a 4xx status.
/// Everything else responds 5xx with a generic message; the concrete error
/// goes to the log, never to the caller.
#[derive(Debug)]
pub struct AppError(pub ClassifierError);

impl From<ClassifierError> for AppError {
    fn from(err: ClassifierError) -> Self {
        Self(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (code, message) = if self.0.is_client_error() {
            (StatusCode::BAD_REQUEST, self.0.to_string())
        } else {
            error!(error = %self.0, "request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "inference failed".to_string(),
            )
        };
        (
            code,
            Json(ErrorBody {
                status: "error",
                message,
            }),
        )
            .into_response()
    }
}

/// Handles `POST /predict`.
///
/// Validates the request before anything touches the model, then runs the
/// classification on the blocking pool under the configured deadline.
async fn predict(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<PredictResponse>, AppError> {
    validate_request(&headers, &body)?;

    let prediction = classify(state, body).await?;
    debug!(label = %prediction.label, confidence = prediction.confidence, "classified image");

    Ok(Json(PredictResponse {
        label: prediction.label,
        confidence: prediction.confidence,
        top: prediction.top,
        timestamp: chrono::Utc::now().to_rfc3339(),
    }))
}

/// Request validation: a single image payload under a recognized content
/// type. Rejected requests never reach the engine.
fn validate_request(headers: &HeaderMap, body: &Bytes) -> Result<(), ClassifierError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ClassifierError::InvalidRequest("missing content type".to_string()))?;

    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    if !SUPPORTED_CONTENT_TYPES.contains(&mime.as_str()) {
        return Err(ClassifierError::InvalidRequest(format!(
            "unsupported content type '{mime}', expected one of {SUPPORTED_CONTENT_TYPES:?}"
        )));
    }

    if body.is_empty() {
        return Err(ClassifierError::InvalidRequest(
            "empty request body".to_string(),
        ));
    }

    Ok(())
}

/// Runs preprocess → shape check → inference → postprocess on the blocking
/// pool, bounded by the per-request timeout.
async fn classify(state: Arc<AppState>, body: Bytes) -> Result<Prediction, ClassifierError> {
    let deadline = state.timeout;
    let worker = tokio::task::spawn_blocking(move || {
        let tensor = state.pipeline.run_pre(&body)?;
        state.spec.validate(tensor.shape())?;
        let scores = state.engine.infer(tensor)?;
        state.pipeline.run_post(scores)
    });

    match tokio::time::timeout(deadline, worker).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(ClassifierError::Inference(format!(
            "inference task failed: {join_err}"
        ))),
        Err(_) => Err(ClassifierError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::Labels;
    use crate::pipeline::{ImagePreprocessor, SoftmaxRanker};
    use ndarray::ArrayD;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedEngine {
        scores: Vec<f32>,
        calls: AtomicUsize,
    }

    impl FixedEngine {
        fn new(scores: Vec<f32>) -> Self {
            Self {
                scores,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Engine for FixedEngine {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn infer(&self, _input: ArrayD<f32>) -> Result<ArrayD<f32>, ClassifierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let shape = vec![1, self.scores.len()];
            Ok(ArrayD::from_shape_vec(shape, self.scores.clone()).unwrap())
        }
    }

    /// Fails the first invocation, succeeds afterwards.
    struct FlakyEngine {
        inner: FixedEngine,
        failures_left: AtomicUsize,
    }

    impl Engine for FlakyEngine {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn infer(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>, ClassifierError> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ClassifierError::Inference("backend exploded".to_string()));
            }
            self.inner.infer(input)
        }
    }

    struct SlowEngine;

    impl Engine for SlowEngine {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn infer(&self, _input: ArrayD<f32>) -> Result<ArrayD<f32>, ClassifierError> {
            std::thread::sleep(Duration::from_millis(200));
            Ok(ArrayD::from_shape_vec(vec![1, 3], vec![1.0, 0.0, 0.0]).unwrap())
        }
    }

    fn test_spec() -> InputSpec {
        InputSpec {
            channels: 3,
            height: 28,
            width: 28,
            scale: 1.0 / 255.0,
            mean: None,
            std: None,
        }
    }

    fn test_state(engine: Arc<dyn Engine>, timeout: Duration) -> Arc<AppState> {
        let labels = Arc::new(Labels::from_vec(vec![
            "apple".into(),
            "banana".into(),
            "cherry".into(),
        ]));
        Arc::new(AppState {
            engine,
            pipeline: Pipeline::new(
                ImagePreprocessor::new(test_spec()),
                SoftmaxRanker::new(labels, 2),
            ),
            spec: test_spec(),
            model_name: "test-model".to_string(),
            timeout,
        })
    }

    fn png_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "image/png".parse().unwrap());
        headers
    }

    fn png_bytes() -> Bytes {
        let img = image::RgbImage::from_fn(32, 32, |x, y| {
            image::Rgb([(x * 7 % 256) as u8, (y * 5 % 256) as u8, 64])
        });
        let mut buf = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, image::ImageFormat::Png)
            .expect("png encoding");
        Bytes::from(buf.into_inner())
    }

    #[tokio::test]
    async fn predict_returns_ranked_label() {
        let state = test_state(
            Arc::new(FixedEngine::new(vec![0.1, 3.0, 0.2])),
            Duration::from_secs(5),
        );
        let Json(response) = predict(State(state), png_headers(), png_bytes())
            .await
            .expect("prediction succeeds");

        assert_eq!(response.label, "banana");
        assert!((0.0..=1.0).contains(&response.confidence));
        assert_eq!(response.top.len(), 2);
        assert_eq!(response.top[0].label, "banana");
    }

    #[tokio::test]
    async fn missing_content_type_is_rejected_without_touching_engine() {
        let engine = Arc::new(FixedEngine::new(vec![1.0, 0.0, 0.0]));
        let state = test_state(engine.clone(), Duration::from_secs(5));

        let err = predict(State(state), HeaderMap::new(), png_bytes())
            .await
            .err()
            .expect("request is rejected");
        assert!(matches!(err.0, ClassifierError::InvalidRequest(_)));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn text_payload_is_rejected_without_touching_engine() {
        let engine = Arc::new(FixedEngine::new(vec![1.0, 0.0, 0.0]));
        let state = test_state(engine.clone(), Duration::from_secs(5));

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "text/plain".parse().unwrap());
        let err = predict(State(state), headers, Bytes::from_static(b"hello"))
            .await
            .err()
            .expect("request is rejected");
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_body_is_rejected() {
        let state = test_state(
            Arc::new(FixedEngine::new(vec![1.0, 0.0, 0.0])),
            Duration::from_secs(5),
        );
        let err = predict(State(state), png_headers(), Bytes::new())
            .await
            .err()
            .expect("request is rejected");
        assert!(matches!(err.0, ClassifierError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn undecodable_image_is_a_client_error() {
        let state = test_state(
            Arc::new(FixedEngine::new(vec![1.0, 0.0, 0.0])),
            Duration::from_secs(5),
        );
        let err = predict(State(state), png_headers(), Bytes::from_static(b"not a png"))
            .await
            .err()
            .expect("request is rejected");
        assert!(matches!(err.0, ClassifierError::InvalidImage(_)));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn engine_failure_is_recovered_and_next_request_succeeds() {
        let engine = Arc::new(FlakyEngine {
            inner: FixedEngine::new(vec![0.0, 0.0, 5.0]),
            failures_left: AtomicUsize::new(1),
        });
        let state = test_state(engine, Duration::from_secs(5));

        let err = predict(State(state.clone()), png_headers(), png_bytes())
            .await
            .err()
            .expect("first request fails");
        assert!(matches!(err.0, ClassifierError::Inference(_)));
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );

        let Json(response) = predict(State(state), png_headers(), png_bytes())
            .await
            .expect("second request succeeds");
        assert_eq!(response.label, "cherry");
    }

    #[tokio::test]
    async fn vocabulary_mismatch_is_a_server_error() {
        // Engine emits four scores against a three-label vocabulary.
        let state = test_state(
            Arc::new(FixedEngine::new(vec![0.1, 0.2, 0.3, 0.4])),
            Duration::from_secs(5),
        );
        let err = predict(State(state), png_headers(), png_bytes())
            .await
            .err()
            .expect("request fails");
        assert!(matches!(err.0, ClassifierError::VocabularyMismatch { .. }));
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn slow_inference_times_out() {
        let state = test_state(Arc::new(SlowEngine), Duration::from_millis(10));
        let err = predict(State(state), png_headers(), png_bytes())
            .await
            .err()
            .expect("request times out");
        assert!(matches!(err.0, ClassifierError::Timeout));
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn health_reports_model_name() {
        let state = test_state(
            Arc::new(FixedEngine::new(vec![1.0, 0.0, 0.0])),
            Duration::from_secs(5),
        );
        let Json(response) = health(State(state)).await;
        assert_eq!(response.status, "ok");
        assert_eq!(response.model, "test-model");
    }

    #[test]
    fn server_errors_do_not_leak_internals() {
        let response = AppError(ClassifierError::Inference(
            "ort session exploded at /secret/path".to_string(),
        ))
        .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        // Server errors are never client errors, so the response body carries
        // the generic message; the concrete one only reaches the log.
        assert!(!ClassifierError::Inference("x".into()).is_client_error());
    }
}
