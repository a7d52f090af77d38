use serde::{Deserialize, Serialize};

use crate::{
    domain::{AspectRatio, ChatMessage, ChatRole, Resolution, UserId, UserProfile},
    error::ErrorCode,
};

/// Base64 image payload (no data-URL prefix) plus its mime type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceImage {
    pub data: String,
    pub mime_type: String,
}

impl ReferenceImage {
    pub fn new(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn jpeg(data: impl Into<String>) -> Self {
        Self::new(data, "image/jpeg")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurn {
    pub role: ChatRole,
    pub text: String,
    #[serde(default)]
    pub is_error: bool,
}

impl From<&ChatMessage> for ChatTurn {
    fn from(message: &ChatMessage) -> Self {
        Self {
            role: message.role,
            text: message.text.clone(),
            is_error: message.is_error,
        }
    }
}

/// Body of `POST /api/generate`.
///
/// Reference images are positional: the first is the style reference, the
/// second the subject reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(default)]
    pub reference_images: Vec<ReferenceImage>,
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
    #[serde(default)]
    pub resolution: Resolution,
    #[serde(default)]
    pub chat_history: Vec<ChatTurn>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub image: String,
}

/// Non-2xx body of `POST /api/generate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateFailure {
    pub error: String,
    pub code: ErrorCode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeCreditRequest {
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumeCreditResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProfileRequest {
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referral_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProfileResponse {
    pub profile: UserProfile,
}

pub fn generate_route() -> &'static str {
    "/api/generate"
}

pub fn consume_credit_route() -> &'static str {
    "/api/credits/consume"
}

pub fn sync_profile_route() -> &'static str {
    "/api/user/sync"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_request_uses_camel_case_wire_names() {
        let request = GenerateRequest {
            prompt: "make it pop".into(),
            reference_images: vec![ReferenceImage::jpeg("AAAA")],
            aspect_ratio: AspectRatio::Portrait,
            resolution: Resolution::TwoK,
            chat_history: vec![ChatTurn {
                role: ChatRole::Model,
                text: "done".into(),
                is_error: true,
            }],
        };
        let value = serde_json::to_value(&request).expect("json");
        assert_eq!(value["aspectRatio"], "9:16");
        assert_eq!(value["resolution"], "2K");
        assert_eq!(value["referenceImages"][0]["mimeType"], "image/jpeg");
        assert_eq!(value["chatHistory"][0]["isError"], true);
        assert_eq!(value["chatHistory"][0]["role"], "model");
    }

    #[test]
    fn sync_request_omits_missing_referral_code() {
        let request = SyncProfileRequest {
            user_id: UserId::new("user_1"),
            email: None,
            referral_code: None,
        };
        let value = serde_json::to_value(&request).expect("json");
        assert_eq!(value, serde_json::json!({ "userId": "user_1" }));
    }
}
