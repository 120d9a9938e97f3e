//! HTTPエンドポイント
//!
//! - `GET /`         アップロード用のページ
//! - `POST /predict` multipart の `image` フィールドを分類
//! - `GET /health`   稼働状態

pub mod routes;
pub mod state;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use state::AppState;

pub fn router(state: AppState) -> Router {
    let body_limit = state.max_upload_bytes;

    Router::new()
        .route("/", get(routes::index))
        .route("/predict", post(routes::predict))
        .route("/health", get(routes::health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::io::Cursor;
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::error::{DetectorError, Result};
    use crate::ml::resnet::Backbone;
    use crate::ml::{ArtDetector, ImageClassifier, ModelConfig, PredictionResult};

    const BOUNDARY: &str = "art-detector-test-boundary";

    /// 固定の結果を返す分類器
    struct StubClassifier {
        class_names: Vec<String>,
    }

    impl StubClassifier {
        fn new() -> Self {
            Self {
                class_names: vec!["AI".to_string(), "Human".to_string()],
            }
        }
    }

    impl ImageClassifier for StubClassifier {
        fn predict(&self, image_bytes: &[u8]) -> Result<PredictionResult> {
            if image_bytes.starts_with(b"corrupt") {
                return Err(DetectorError::Decode("unsupported format".to_string()));
            }
            PredictionResult::from_probabilities(&self.class_names, &[0.9, 0.1])
        }

        fn class_names(&self) -> &[String] {
            &self.class_names
        }

        fn device_name(&self) -> String {
            "stub".to_string()
        }
    }

    fn app(classifier: Option<Arc<dyn ImageClassifier>>) -> Router {
        router(AppState::new(classifier, 16 * 1024 * 1024))
    }

    fn stub_app() -> Router {
        app(Some(Arc::new(StubClassifier::new())))
    }

    /// 1パートだけの multipart 本文を作成
    fn multipart_body(name: &str, file_name: Option<&str>, data: &[u8]) -> Vec<u8> {
        let disposition = match file_name {
            Some(file_name) => format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                name, file_name
            ),
            None => format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name),
        };

        let mut body = format!("--{}\r\n{}", BOUNDARY, disposition).into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn predict_request(body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/predict")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_index_serves_html() {
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = stub_app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert!(String::from_utf8_lossy(&bytes).contains("<form"));
    }

    #[tokio::test]
    async fn test_predict_success() {
        let body = multipart_body("image", Some("art.png"), b"pixels");
        let (status, json) = send(stub_app(), predict_request(body)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["predicted_class"], "AI");
        assert!((json["confidence"].as_f64().unwrap() - 0.9).abs() < 1e-6);
        assert!(json["probabilities"]["Human"].is_number());
    }

    #[tokio::test]
    async fn test_predict_without_image_field() {
        let body = multipart_body("file", Some("art.png"), b"pixels");
        let (status, json) = send(stub_app(), predict_request(body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "No image file provided");
    }

    #[tokio::test]
    async fn test_predict_image_field_without_filename() {
        let body = multipart_body("image", None, b"pixels");
        let (status, json) = send(stub_app(), predict_request(body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "No image file provided");
    }

    #[tokio::test]
    async fn test_predict_non_multipart_request() {
        let request = Request::builder()
            .method("POST")
            .uri("/predict")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let (status, json) = send(stub_app(), request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "No image file provided");
    }

    #[tokio::test]
    async fn test_predict_empty_filename() {
        let body = multipart_body("image", Some(""), b"");
        let (status, json) = send(stub_app(), predict_request(body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "No image selected");
    }

    #[tokio::test]
    async fn test_predict_decode_error_is_500() {
        let body = multipart_body("image", Some("broken.jpg"), b"corrupt data");
        let (status, json) = send(stub_app(), predict_request(body)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json["error"].as_str().unwrap().contains("decode"));
    }

    #[tokio::test]
    async fn test_predict_without_model() {
        let body = multipart_body("image", Some("art.png"), b"pixels");
        let (status, json) = send(app(None), predict_request(body)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"], "Model not loaded");
    }

    #[tokio::test]
    async fn test_health_reflects_model_presence() {
        let request = || Request::builder().uri("/health").body(Body::empty()).unwrap();

        let (status, json) = send(stub_app(), request()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["model_loaded"], true);
        assert_eq!(json["device"], "stub");

        let (status, json) = send(app(None), request()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["model_loaded"], false);
        assert_eq!(json["device"], "unknown");
    }

    #[tokio::test]
    async fn test_end_to_end_with_untrained_model() {
        use burn_ndarray::{NdArray, NdArrayDevice};

        let config = ModelConfig::new(2).with_backbone(Backbone::ResNet18);
        let detector = ArtDetector::<NdArray>::untrained(&config, NdArrayDevice::Cpu);

        let mut jpeg = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::from_pixel(224, 224, Rgb([255, 0, 0])))
            .write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
            .unwrap();

        let body = multipart_body("image", Some("red.jpg"), &jpeg);
        let (status, json) = send(app(Some(Arc::new(detector))), predict_request(body)).await;

        assert_eq!(status, StatusCode::OK);
        let predicted = json["predicted_class"].as_str().unwrap();
        assert!(predicted == "AI" || predicted == "Human");

        let confidence = json["confidence"].as_f64().unwrap();
        assert!((0.0..=1.0).contains(&confidence));

        let probabilities: BTreeMap<String, f64> =
            serde_json::from_value(json["probabilities"].clone()).unwrap();
        assert_eq!(probabilities.len(), 2);
        let total: f64 = probabilities.values().sum();
        assert!((total - 1.0).abs() < 1e-5);
    }
}
