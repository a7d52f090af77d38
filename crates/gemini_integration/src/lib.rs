//! Upstream generative-image model seam and its Gemini adapter.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-image";

const MAX_LOGGED_BODY: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub data: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageModelRequest {
    pub prompt: String,
    pub images: Vec<InlineImage>,
    /// `16:9`, `9:16` or `1:1`.
    pub aspect_ratio: String,
    /// `1K`, `2K` or `4K`.
    pub image_size: String,
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Server configuration error: Missing API Key")]
    MissingApiKey,
    #[error("upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },
    #[error("No image generated. The model might have returned only text.")]
    NoImage,
    #[error("model transport failure: {0}")]
    Transport(String),
}

/// Upstream texts that mean the API key was rejected, whatever the status.
const CREDENTIAL_REJECTIONS: [&str; 2] = ["PERMISSION_DENIED", "entity was not found"];

impl ModelError {
    pub fn is_auth_failure(&self) -> bool {
        match self {
            ModelError::Upstream { status, message } => {
                *status == StatusCode::UNAUTHORIZED.as_u16()
                    || *status == StatusCode::FORBIDDEN.as_u16()
                    || CREDENTIAL_REJECTIONS
                        .iter()
                        .any(|needle| message.contains(needle))
            }
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ModelError {
    fn from(value: reqwest::Error) -> Self {
        ModelError::Transport(value.to_string())
    }
}

#[async_trait]
pub trait ImageModel: Send + Sync {
    /// Returns the first generated image as base64.
    async fn generate_image(&self, request: ImageModelRequest) -> Result<String, ModelError>;
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

pub struct GeminiImageModel {
    http: Client,
    config: GeminiConfig,
}

impl GeminiImageModel {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }
}

#[async_trait]
impl ImageModel for GeminiImageModel {
    async fn generate_image(&self, request: ImageModelRequest) -> Result<String, ModelError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or(ModelError::MissingApiKey)?;

        let body = GenerateContentBody::from_request(&request);
        debug!(
            model = %self.config.model,
            images = request.images.len(),
            aspect_ratio = %request.aspect_ratio,
            image_size = %request.image_size,
            "calling image model"
        );

        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            let message = upstream_message(&text);
            warn!(status = status.as_u16(), %message, "image model rejected request");
            return Err(ModelError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: GenerateContentResponse =
            serde_json::from_str(&text).map_err(|e| ModelError::Upstream {
                status: status.as_u16(),
                message: format!("failed to parse model response: {e}"),
            })?;

        first_inline_image(parsed).ok_or_else(|| {
            debug!(body = %truncate(&text, MAX_LOGGED_BODY), "model response carried no image");
            ModelError::NoImage
        })
    }
}

fn first_inline_image(response: GenerateContentResponse) -> Option<String> {
    response
        .candidates
        .into_iter()
        .next()?
        .content?
        .parts
        .into_iter()
        .find_map(|part| {
            part.inline_data
                .map(|inline| inline.data)
                .filter(|data| !data.is_empty())
        })
}

/// Prefers the structured `error.status: error.message` form; falls back to the raw body.
fn upstream_message(body: &str) -> String {
    match serde_json::from_str::<UpstreamErrorBody>(body) {
        Ok(UpstreamErrorBody { error }) => match error.status {
            Some(status) => format!("{status}: {}", error.message),
            None => error.message,
        },
        Err(_) if body.trim().is_empty() => "Failed to generate image".to_string(),
        Err(_) => truncate(body, MAX_LOGGED_BODY),
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentBody {
    contents: Vec<RequestContent>,
    generation_config: GenerationConfig,
}

impl GenerateContentBody {
    fn from_request(request: &ImageModelRequest) -> Self {
        let mut parts: Vec<RequestPart> = request
            .images
            .iter()
            .map(|image| RequestPart::InlineData {
                inline_data: RequestInlineData {
                    mime_type: image.mime_type.clone(),
                    data: image.data.clone(),
                },
            })
            .collect();
        parts.push(RequestPart::Text {
            text: request.prompt.clone(),
        });

        Self {
            contents: vec![RequestContent { parts }],
            generation_config: GenerationConfig {
                response_modalities: vec!["IMAGE".to_string()],
                image_config: ImageConfig {
                    aspect_ratio: request.aspect_ratio.clone(),
                    image_size: request.image_size.clone(),
                },
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct RequestContent {
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart {
    #[serde(rename_all = "camelCase")]
    InlineData { inline_data: RequestInlineData },
    Text { text: String },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<String>,
    image_config: ImageConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageConfig {
    aspect_ratio: String,
    image_size: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    inline_data: Option<ResponseInlineData>,
}

#[derive(Debug, Deserialize)]
struct ResponseInlineData {
    #[serde(default)]
    data: String,
}

#[derive(Debug, Deserialize)]
struct UpstreamErrorBody {
    error: UpstreamErrorDetail,
}

#[derive(Debug, Deserialize)]
struct UpstreamErrorDetail {
    message: String,
    status: Option<String>,
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
