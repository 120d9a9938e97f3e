use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::server::state::AppState;

const INDEX_HTML: &str = include_str!("../../static/index.html");

/// アップロードフォームのフィールド名
pub const IMAGE_FIELD: &str = "image";

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// `image` フィールドのバイト列を取り出す
///
/// ファイル名を持たない同名フィールドはファイルとして扱いません。
async fn read_image_field(multipart: &mut Multipart) -> Result<Vec<u8>, Response> {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Err(error_response(e.status(), e.body_text())),
        };

        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let Some(file_name) = field.file_name().map(str::to_owned) else {
            continue;
        };
        if file_name.is_empty() {
            return Err(error_response(StatusCode::BAD_REQUEST, "No image selected"));
        }

        return match field.bytes().await {
            Ok(bytes) => {
                tracing::debug!(file_name = %file_name, bytes = bytes.len(), "received image");
                Ok(bytes.to_vec())
            }
            Err(e) => Err(error_response(e.status(), e.body_text())),
        };
    }

    Err(error_response(StatusCode::BAD_REQUEST, "No image file provided"))
}

pub async fn predict(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let mut multipart = match multipart {
        Ok(multipart) => multipart,
        Err(rejection) => {
            tracing::debug!("not a multipart request: {}", rejection);
            return error_response(StatusCode::BAD_REQUEST, "No image file provided");
        }
    };

    let image_bytes = match read_image_field(&mut multipart).await {
        Ok(bytes) => bytes,
        Err(response) => return response,
    };

    let Some(classifier) = state.classifier.clone() else {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Model not loaded");
    };

    match tokio::task::spawn_blocking(move || classifier.predict(&image_bytes)).await {
        Ok(Ok(prediction)) => Json(prediction).into_response(),
        Ok(Err(e)) => {
            tracing::warn!("prediction failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(e) => {
            tracing::error!("prediction task failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let device = state
        .classifier
        .as_ref()
        .map(|c| c.device_name())
        .unwrap_or_else(|| "unknown".to_string());

    Json(json!({
        "status": "healthy",
        "model_loaded": state.classifier.is_some(),
        "device": device,
    }))
}
