use super::*;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use std::sync::Arc;
use tokio::{net::TcpListener, sync::Mutex};

#[derive(Clone)]
struct MockUpstream {
    status: StatusCode,
    body: serde_json::Value,
    seen: Arc<Mutex<Vec<(Option<String>, serde_json::Value)>>>,
}

async fn handle(
    State(state): State<MockUpstream>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> (StatusCode, Json<serde_json::Value>) {
    let key = headers
        .get("x-goog-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.seen.lock().await.push((key, body));
    (state.status, Json(state.body.clone()))
}

async fn spawn_upstream(
    status: StatusCode,
    body: serde_json::Value,
) -> (String, Arc<Mutex<Vec<(Option<String>, serde_json::Value)>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/models/:model_action", post(handle))
        .with_state(MockUpstream {
            status,
            body,
            seen: seen.clone(),
        });
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    (format!("http://{addr}"), seen)
}

fn model_for(base_url: String) -> GeminiImageModel {
    GeminiImageModel::new(GeminiConfig {
        api_key: Some("test-key".into()),
        model: "test-model".into(),
        base_url,
    })
}

fn request_with_images(count: usize) -> ImageModelRequest {
    ImageModelRequest {
        prompt: "viral please".into(),
        images: (0..count)
            .map(|i| InlineImage {
                data: format!("IMG{i}"),
                mime_type: "image/jpeg".into(),
            })
            .collect(),
        aspect_ratio: "9:16".into(),
        image_size: "2K".into(),
    }
}

#[tokio::test]
async fn returns_first_inline_image_and_sends_generation_config() {
    let (base, seen) = spawn_upstream(
        StatusCode::OK,
        serde_json::json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "here you go" },
                    { "inlineData": { "mimeType": "image/png", "data": "QUJD" } },
                    { "inlineData": { "mimeType": "image/png", "data": "SECOND" } }
                ]}
            }]
        }),
    )
    .await;

    let image = model_for(base)
        .generate_image(request_with_images(2))
        .await
        .expect("image");
    assert_eq!(image, "QUJD");

    let seen = seen.lock().await;
    let (key, body) = &seen[0];
    assert_eq!(key.as_deref(), Some("test-key"));
    let parts = body["contents"][0]["parts"].as_array().expect("parts");
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0]["inlineData"]["data"], "IMG0");
    assert_eq!(parts[1]["inlineData"]["mimeType"], "image/jpeg");
    assert_eq!(parts[2]["text"], "viral please");
    assert_eq!(body["generationConfig"]["imageConfig"]["aspectRatio"], "9:16");
    assert_eq!(body["generationConfig"]["imageConfig"]["imageSize"], "2K");
}

#[tokio::test]
async fn text_only_response_is_no_image() {
    let (base, _) = spawn_upstream(
        StatusCode::OK,
        serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": "I cannot draw that" }] } }]
        }),
    )
    .await;

    let err = model_for(base)
        .generate_image(request_with_images(0))
        .await
        .expect_err("no image");
    assert!(matches!(err, ModelError::NoImage));
}

#[tokio::test]
async fn permission_denied_is_reported_as_auth_failure() {
    let (base, _) = spawn_upstream(
        StatusCode::FORBIDDEN,
        serde_json::json!({
            "error": {
                "code": 403,
                "message": "Requested entity was not found.",
                "status": "PERMISSION_DENIED"
            }
        }),
    )
    .await;

    let err = model_for(base)
        .generate_image(request_with_images(1))
        .await
        .expect_err("forbidden");
    assert!(err.is_auth_failure());
    match err {
        ModelError::Upstream { status, message } => {
            assert_eq!(status, 403);
            assert_eq!(message, "PERMISSION_DENIED: Requested entity was not found.");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn empty_inline_part_does_not_hide_a_later_image() {
    let (base, _) = spawn_upstream(
        StatusCode::OK,
        serde_json::json!({
            "candidates": [{ "content": { "parts": [
                { "inlineData": { "mimeType": "image/png", "data": "" } },
                { "inlineData": { "mimeType": "image/png", "data": "QUJD" } }
            ] } }]
        }),
    )
    .await;

    let image = model_for(base)
        .generate_image(request_with_images(0))
        .await
        .expect("image");
    assert_eq!(image, "QUJD");
}

#[tokio::test]
async fn entity_not_found_is_an_auth_failure_whatever_the_status() {
    let (base, _) = spawn_upstream(
        StatusCode::NOT_FOUND,
        serde_json::json!({
            "error": {
                "code": 404,
                "message": "Requested entity was not found.",
                "status": "NOT_FOUND"
            }
        }),
    )
    .await;

    let err = model_for(base)
        .generate_image(request_with_images(0))
        .await
        .expect_err("not found");
    assert!(err.is_auth_failure());

    let overloaded = ModelError::Upstream {
        status: 503,
        message: "UNAVAILABLE: The model is overloaded.".into(),
    };
    assert!(!overloaded.is_auth_failure());
}

#[tokio::test]
async fn missing_api_key_fails_before_any_request() {
    let model = GeminiImageModel::new(GeminiConfig {
        api_key: Some("   ".into()),
        ..GeminiConfig::default()
    });
    let err = model
        .generate_image(request_with_images(0))
        .await
        .expect_err("missing key");
    assert!(matches!(err, ModelError::MissingApiKey));
    assert_eq!(err.to_string(), "Server configuration error: Missing API Key");
}

#[test]
fn upstream_message_falls_back_to_raw_body() {
    assert_eq!(upstream_message("plain failure"), "plain failure");
    assert_eq!(upstream_message(""), "Failed to generate image");
    assert_eq!(truncate("héllo", 2), "h...");
}
