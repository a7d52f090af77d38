use std::sync::Arc;

use gemini_integration::{ImageModel, ImageModelRequest, InlineImage, ModelError};
use shared::{
    domain::UserId,
    error::{ApiError, ErrorCode},
    protocol::{
        ConsumeCreditResponse, GenerateRequest, GenerateResponse, SyncProfileRequest,
        SyncProfileResponse,
    },
};
use storage::{ConsumeOutcome, ProfileSeed, Storage};
use tracing::{info, warn};

pub mod prompt;

pub const MAX_REFERENCE_IMAGES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditPolicy {
    pub starting_credits: i64,
    pub referral_bonus: i64,
}

impl Default for CreditPolicy {
    fn default() -> Self {
        Self {
            starting_credits: 20,
            referral_bonus: 10,
        }
    }
}

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub model: Arc<dyn ImageModel>,
    pub credits: CreditPolicy,
}

pub async fn generate(
    ctx: &ApiContext,
    request: GenerateRequest,
) -> Result<GenerateResponse, ApiError> {
    if request.reference_images.len() > MAX_REFERENCE_IMAGES {
        return Err(ApiError::new(
            ErrorCode::Validation,
            format!("at most {MAX_REFERENCE_IMAGES} reference images are supported"),
        ));
    }

    let mut images = Vec::with_capacity(request.reference_images.len());
    for image in &request.reference_images {
        let data = strip_data_url(&image.data);
        if data.trim().is_empty() {
            return Err(ApiError::new(
                ErrorCode::Validation,
                "reference image payload is empty",
            ));
        }
        images.push(InlineImage {
            data: data.to_string(),
            mime_type: image.mime_type.clone(),
        });
    }

    let prompt = prompt::compose_prompt(&request.prompt, images.len(), &request.chat_history);
    let image = ctx
        .model
        .generate_image(ImageModelRequest {
            prompt,
            images,
            aspect_ratio: request.aspect_ratio.as_str().to_string(),
            image_size: request.resolution.as_str().to_string(),
        })
        .await
        .map_err(model_error)?;

    Ok(GenerateResponse { image })
}

pub async fn consume_credit(
    ctx: &ApiContext,
    user_id: &UserId,
) -> Result<ConsumeCreditResponse, ApiError> {
    ensure_user_id(user_id)?;
    match ctx
        .storage
        .consume_credit(user_id)
        .await
        .map_err(internal)?
    {
        ConsumeOutcome::Consumed { remaining } => {
            info!(%user_id, remaining, "credit consumed");
            Ok(ConsumeCreditResponse {
                success: true,
                message: None,
            })
        }
        ConsumeOutcome::Insufficient => {
            info!(%user_id, "credit consumption denied");
            Err(ApiError::new(
                ErrorCode::InsufficientCredits,
                "Insufficient credits",
            ))
        }
    }
}

pub async fn sync_profile(
    ctx: &ApiContext,
    request: SyncProfileRequest,
) -> Result<SyncProfileResponse, ApiError> {
    ensure_user_id(&request.user_id)?;
    let outcome = ctx
        .storage
        .sync_profile(ProfileSeed {
            user_id: &request.user_id,
            email: request.email.as_deref(),
            referral_code: request.referral_code.as_deref(),
            starting_credits: ctx.credits.starting_credits,
            referral_bonus: ctx.credits.referral_bonus,
        })
        .await
        .map_err(internal)?;

    if let Some(referrer) = &outcome.rewarded_referrer {
        info!(
            user_id = %request.user_id,
            %referrer,
            bonus = ctx.credits.referral_bonus,
            "referral reward applied"
        );
    }

    Ok(SyncProfileResponse {
        profile: outcome.profile,
    })
}

fn ensure_user_id(user_id: &UserId) -> Result<(), ApiError> {
    if user_id.is_blank() {
        return Err(ApiError::new(ErrorCode::Validation, "Missing userId"));
    }
    Ok(())
}

fn strip_data_url(data: &str) -> &str {
    match data.split_once(',') {
        Some((_, payload)) => payload,
        None => data,
    }
}

fn model_error(err: ModelError) -> ApiError {
    warn!(error = %err, "image generation failed");
    if err.is_auth_failure() {
        let message = match err {
            ModelError::Upstream { status, message } => format!("{status} {message}"),
            other => other.to_string(),
        };
        return ApiError::new(ErrorCode::Forbidden, message);
    }
    match err {
        ModelError::NoImage => ApiError::new(ErrorCode::NoImage, err.to_string()),
        ModelError::MissingApiKey => ApiError::new(ErrorCode::Internal, err.to_string()),
        ModelError::Upstream { message, .. } => ApiError::new(ErrorCode::Upstream, message),
        ModelError::Transport(message) => ApiError::new(ErrorCode::Upstream, message),
    }
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
