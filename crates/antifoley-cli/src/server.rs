//! HTTP API for the detector.
//!
//! # Endpoints
//!
//! - `GET /health` - liveness, device and which weights are active
//! - `POST /analyze` - multipart upload (field `audio`) → analysis report

use std::net::SocketAddr;
use std::sync::Arc;

use antifoley::{Detector, DetectorError};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State, multipart::MultipartRejection},
    http::{Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Device;

/// Multipart field carrying the audio file.
pub const AUDIO_FIELD: &str = "audio";

/// Shared application state. The detector is read-only, so requests never
/// contend on it.
pub struct AppState {
    pub detector: Arc<Detector>,
    pub device: Device,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub device: String,
    pub model_loaded: bool,
    /// `"pretrained"` or `"untrained"`.
    pub weights: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    let error = error.into();
    if status.is_server_error() {
        tracing::error!(%status, %error, "analyze failed");
    } else {
        tracing::warn!(%status, %error, "analyze rejected");
    }
    (status, Json(ErrorResponse { error })).into_response()
}

fn detector_error_response(err: &DetectorError) -> Response {
    let status = if err.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    error_response(status, err.to_string())
}

/// GET /health
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".into(),
        device: state.device.as_str().into(),
        model_loaded: true,
        weights: state.detector.provenance().as_str().into(),
    })
}

/// POST /analyze
async fn analyze(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let mut multipart = match multipart {
        Ok(m) => m,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "No audio file provided"),
    };

    // Find the audio field; other fields are skipped.
    let mut upload = None;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() != Some(AUDIO_FIELD) {
                    continue;
                }
                let file_name = field.file_name().unwrap_or_default().to_string();
                if let Err(e) = antifoley::audio::check_upload_name(&file_name) {
                    return detector_error_response(&e);
                }
                match field.bytes().await {
                    Ok(bytes) => upload = Some((file_name, bytes)),
                    Err(e) => return error_response(e.status(), e.body_text()),
                }
                break;
            }
            Ok(None) => break,
            Err(e) => return error_response(e.status(), e.body_text()),
        }
    }
    let Some((file_name, bytes)) = upload else {
        return error_response(StatusCode::BAD_REQUEST, "No audio file provided");
    };
    tracing::info!(file = %file_name, bytes = bytes.len(), "received upload");

    let detector = Arc::clone(&state.detector);
    let joined = tokio::task::spawn_blocking(move || {
        detector.analyze_upload(&file_name, bytes.to_vec())
    })
    .await;

    match joined {
        Ok(Ok(report)) => (StatusCode::OK, Json(report)).into_response(),
        Ok(Err(e)) => detector_error_response(&e),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Prediction error: {e}"),
        ),
    }
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([
            Method::GET,
            Method::PUT,
            Method::POST,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

/// Create the router with all routes
pub fn create_router(state: Arc<AppState>) -> Router {
    let body_limit = state.max_upload_bytes;
    Router::new()
        .route("/health", get(health))
        .route("/analyze", post(analyze))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the server
pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> std::io::Result<()> {
    let router = create_router(state);

    tracing::info!("Starting antifoley server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;
    use std::io::Cursor;
    use std::path::{Path, PathBuf};
    use std::time::{SystemTime, UNIX_EPOCH};

    use antifoley::model::tensor_specs;
    use antifoley::{ClassifierParams, DetectorConfig};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use safetensors::tensor::{Dtype, View, serialize_to_file};
    use tower::ServiceExt;

    use super::*;

    const BOUNDARY: &str = "antifoley-test-boundary";

    #[derive(Debug, Clone)]
    struct TestTensor {
        shape: Vec<usize>,
        data: Vec<u8>,
    }

    impl View for TestTensor {
        fn dtype(&self) -> Dtype {
            Dtype::F32
        }
        fn shape(&self) -> &[usize] {
            &self.shape
        }
        fn data(&self) -> Cow<'_, [u8]> {
            Cow::Borrowed(&self.data)
        }
        fn data_len(&self) -> usize {
            self.data.len()
        }
    }

    fn tmp_dir() -> PathBuf {
        let mut p = std::env::temp_dir();
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        p.push(format!("antifoley-server-test-{nanos}"));
        std::fs::create_dir_all(&p).expect("mkdir");
        p
    }

    /// All zeros except `fc2.bias = [0, ln 3]`: always {fake 25%, real 75%}.
    fn write_golden_weights(path: &Path, skip: Option<&str>) {
        let tensors: Vec<(String, TestTensor)> = tensor_specs(&ClassifierParams::default())
            .into_iter()
            .filter(|s| Some(s.name.as_str()) != skip)
            .map(|s| {
                let values = if s.name == "fc2.bias" {
                    vec![0.0f32, 3.0f32.ln()]
                } else {
                    vec![0.0f32; s.numel()]
                };
                let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
                (
                    s.name,
                    TestTensor {
                        shape: s.shape,
                        data,
                    },
                )
            })
            .collect();
        serialize_to_file(tensors, &None, path).expect("serialize");
    }

    fn create_test_state(weights: Option<PathBuf>) -> Arc<AppState> {
        let detector = Detector::load(&DetectorConfig {
            weights_path: weights,
            ..DetectorConfig::default()
        })
        .expect("detector");
        Arc::new(AppState {
            detector: Arc::new(detector),
            device: Device::Cpu,
            max_upload_bytes: 4 * 1024 * 1024,
        })
    }

    fn wav_bytes(secs: f32, sample_rate: u32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).expect("wav writer");
            let n = (secs * sample_rate as f32) as usize;
            for i in 0..n {
                let t = i as f32 / sample_rate as f32;
                let s = (2.0 * std::f32::consts::PI * 523.0 * t).sin() * 0.3;
                writer
                    .write_sample((s * f32::from(i16::MAX)) as i16)
                    .expect("write sample");
            }
            writer.finalize().expect("finalize");
        }
        cursor.into_inner()
    }

    fn multipart_request(field: &str, file_name: &str, bytes: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/analyze")
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = response
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let router = create_router(create_test_state(None));

        let request = Request::builder()
            .method("GET")
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["device"], "cpu");
        assert_eq!(body["model_loaded"], true);
        assert_eq!(body["weights"], "untrained");
    }

    #[tokio::test]
    async fn test_health_reports_untrained_on_bad_checkpoint() {
        let dir = tmp_dir();
        let weights = dir.join("model.safetensors");
        write_golden_weights(&weights, Some("conv2.weight"));
        let router = create_router(create_test_state(Some(weights)));

        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let body = json_body(router.oneshot(request).await.unwrap()).await;
        assert_eq!(body["weights"], "untrained");
        assert_eq!(body["model_loaded"], true);

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_analyze_wav_with_golden_weights() {
        let dir = tmp_dir();
        let weights = dir.join("model.safetensors");
        write_golden_weights(&weights, None);
        let router = create_router(create_test_state(Some(weights)));

        let response = router
            .oneshot(multipart_request("audio", "street.wav", &wav_bytes(0.5, 44_100)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["isFake"], false);
        assert_eq!(body["confidence"], 75.0);
        assert_eq!(body["probabilities"]["fake"], 25.0);
        assert_eq!(body["probabilities"]["real"], 75.0);
        assert_eq!(body["fileName"], "street.wav");
        assert_eq!(body["sampleRate"], 44_100);
        assert_eq!(body["duration"], 0.5);
        assert_eq!(body["features"].as_array().map(Vec::len), Some(4));

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_analyze_rejects_unsupported_extension() {
        let router = create_router(create_test_state(None));

        let response = router
            .oneshot(multipart_request("audio", "notes.txt", b"hello"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        let error = body["error"].as_str().unwrap();
        assert!(error.starts_with("Unsupported file format"), "{error}");
        assert!(error.contains(".flac"));
    }

    #[tokio::test]
    async fn test_analyze_missing_field_and_empty_name() {
        let state = create_test_state(None);

        let response = create_router(Arc::clone(&state))
            .oneshot(multipart_request("file", "clip.wav", b"RIFF"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "No audio file provided");

        let response = create_router(Arc::clone(&state))
            .oneshot(multipart_request("audio", "", b"RIFF"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "No file selected");

        let request = Request::builder()
            .method("POST")
            .uri("/analyze")
            .body(Body::empty())
            .unwrap();
        let response = create_router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_analyze_undecodable_audio_is_client_error() {
        let router = create_router(create_test_state(None));

        let response = router
            .oneshot(multipart_request("audio", "broken.mp3", b"definitely not mp3 data"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert!(
            body["error"]
                .as_str()
                .unwrap()
                .starts_with("Failed to load audio file")
        );
    }

    #[tokio::test]
    async fn test_cors_preflight() {
        let router = create_router(create_test_state(None));

        let request = Request::builder()
            .method("OPTIONS")
            .uri("/analyze")
            .header("Origin", "http://localhost:3000")
            .header("Access-Control-Request-Method", "POST")
            .header("Access-Control-Request-Headers", "content-type")
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(
            response
                .headers()
                .get("access-control-allow-origin")
                .and_then(|v| v.to_str().ok()),
            Some("*")
        );
        let methods: Vec<String> = response
            .headers()
            .get("access-control-allow-methods")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .split(',')
            .map(|m| m.trim().to_string())
            .collect();
        for m in ["GET", "PUT", "POST", "DELETE", "OPTIONS"] {
            assert!(methods.iter().any(|x| x == m), "{m} missing from {methods:?}");
        }
    }
}
