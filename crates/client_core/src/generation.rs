use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use shared::{
    error::ErrorCode,
    protocol::{generate_route, GenerateRequest},
};
use thiserror::Error;
use tracing::warn;

pub const NO_IMAGE_MESSAGE: &str = "No image generated. The model might have returned only text.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationErrorKind {
    /// The upstream credential was rejected; the user must pick a new key.
    Auth,
    NoImage,
    Upstream,
    Transport,
    Configuration,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct GenerationError {
    pub kind: GenerationErrorKind,
    pub message: String,
    pub status: Option<u16>,
}

impl GenerationError {
    pub fn new(kind: GenerationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn requires_reauth(&self) -> bool {
        self.kind == GenerationErrorKind::Auth
    }

    /// Builds an error from a failed HTTP exchange. A structured error code
    /// decides the kind; bodies without one fall back to status and text.
    pub fn from_response(status: u16, code: Option<ErrorCode>, message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = match code {
            Some(ErrorCode::Forbidden | ErrorCode::Unauthorized) => GenerationErrorKind::Auth,
            Some(ErrorCode::NoImage) => GenerationErrorKind::NoImage,
            Some(ErrorCode::Internal) if message.contains("Missing API Key") => {
                GenerationErrorKind::Configuration
            }
            Some(ErrorCode::Upstream) if rejects_credential(&message) => GenerationErrorKind::Auth,
            Some(_) => GenerationErrorKind::Upstream,
            None if status == 401 || status == 403 || mentions_auth_failure(&message) => {
                GenerationErrorKind::Auth
            }
            None => GenerationErrorKind::Upstream,
        };
        Self {
            kind,
            message,
            status: Some(status),
        }
    }
}

fn rejects_credential(message: &str) -> bool {
    ["PERMISSION_DENIED", "entity was not found"]
        .iter()
        .any(|needle| message.contains(needle))
}

fn mentions_auth_failure(message: &str) -> bool {
    rejects_credential(message) || ["403", "401"].iter().any(|needle| message.contains(needle))
}

#[async_trait]
pub trait ThumbnailGenerator: Send + Sync {
    /// Returns the base64 payload of the generated image.
    async fn generate(&self, request: &GenerateRequest) -> Result<String, GenerationError>;
}

#[derive(Deserialize)]
struct GenerateBody {
    image: Option<String>,
}

/// Accepts both `{error, code}` from our server and bare `{error}` bodies.
#[derive(Deserialize)]
struct FailureBody {
    #[serde(alias = "message")]
    error: Option<String>,
    code: Option<ErrorCode>,
}

#[derive(Clone)]
pub struct GenerationClient {
    http: Client,
    server_url: String,
}

impl GenerationClient {
    pub fn new(http: Client, server_url: impl Into<String>) -> Self {
        Self {
            http,
            server_url: server_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ThumbnailGenerator for GenerationClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<String, GenerationError> {
        let response = self
            .http
            .post(format!("{}{}", self.server_url, generate_route()))
            .json(request)
            .send()
            .await
            .map_err(|error| {
                warn!(%error, "generation request did not reach the server");
                GenerationError::new(GenerationErrorKind::Transport, error.to_string())
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|error| {
            GenerationError::new(GenerationErrorKind::Transport, error.to_string())
        })?;

        if !status.is_success() {
            return Err(failure_from_body(status, &body));
        }

        let parsed: GenerateBody = serde_json::from_str(&body).map_err(|error| {
            GenerationError::new(
                GenerationErrorKind::Upstream,
                format!("malformed generation response: {error}"),
            )
        })?;
        parsed
            .image
            .filter(|image| !image.is_empty())
            .ok_or_else(|| GenerationError::new(GenerationErrorKind::NoImage, NO_IMAGE_MESSAGE))
    }
}

fn failure_from_body(status: StatusCode, body: &str) -> GenerationError {
    let (message, code) = match serde_json::from_str::<FailureBody>(body) {
        Ok(FailureBody { error, code }) => (error, code),
        Err(_) => (None, None),
    };
    let message = message
        .or_else(|| {
            let trimmed = body.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .unwrap_or_else(|| format!("Server responded with {status}"));
    GenerationError::from_response(status.as_u16(), code, message)
}

#[cfg(test)]
#[path = "tests/generation_tests.rs"]
mod tests;
