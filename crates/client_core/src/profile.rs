use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use shared::{
    domain::{UserId, UserProfile},
    error::{ApiError, ApiException},
    protocol::{
        consume_credit_route, sync_profile_route, ConsumeCreditRequest, ConsumeCreditResponse,
        SyncProfileRequest, SyncProfileResponse,
    },
};
use tracing::info;

#[async_trait]
pub trait ProfileService: Send + Sync {
    async fn sync_profile(&self, request: &SyncProfileRequest) -> Result<UserProfile>;
    /// `Ok(false)` means the server refused the charge.
    async fn consume_credit(&self, user_id: &UserId) -> Result<bool>;
}

#[derive(Clone)]
pub struct ProfileClient {
    http: Client,
    server_url: String,
}

impl ProfileClient {
    pub fn new(http: Client, server_url: impl Into<String>) -> Self {
        Self {
            http,
            server_url: server_url.into().trim_end_matches('/').to_string(),
        }
    }
}

async fn api_failure(response: reqwest::Response) -> anyhow::Error {
    let status = response.status();
    match response.json::<ApiError>().await {
        Ok(err) => ApiException::from(err).into(),
        Err(_) => anyhow!("server responded with {status}"),
    }
}

#[async_trait]
impl ProfileService for ProfileClient {
    async fn sync_profile(&self, request: &SyncProfileRequest) -> Result<UserProfile> {
        let response = self
            .http
            .post(format!("{}{}", self.server_url, sync_profile_route()))
            .json(request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(api_failure(response).await);
        }
        let body: SyncProfileResponse = response.json().await?;
        info!(user_id = %body.profile.user_id, credits = body.profile.credits, "profile synced");
        Ok(body.profile)
    }

    async fn consume_credit(&self, user_id: &UserId) -> Result<bool> {
        let response = self
            .http
            .post(format!("{}{}", self.server_url, consume_credit_route()))
            .json(&ConsumeCreditRequest {
                user_id: user_id.clone(),
            })
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::FORBIDDEN {
            return Ok(false);
        }
        if !status.is_success() {
            return Err(api_failure(response).await);
        }
        let body: ConsumeCreditResponse = response.json().await?;
        Ok(body.success)
    }
}
