use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use gemini_integration::{GeminiConfig, GeminiImageModel};
use server_api::{consume_credit, generate, sync_profile, ApiContext, CreditPolicy};
use shared::{
    error::{ApiError, ErrorCode},
    protocol::{
        consume_credit_route, generate_route, sync_profile_route, ConsumeCreditRequest,
        ConsumeCreditResponse, GenerateFailure, GenerateRequest, SyncProfileRequest,
    },
};
use storage::Storage;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;

use app_state::AppState;
use config::{load_settings, prepare_database_url};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    if settings.gemini_api_key.is_none() {
        warn!("no Gemini API key configured; generation requests will fail until one is set");
    }

    let model = GeminiImageModel::new(GeminiConfig {
        api_key: settings.gemini_api_key,
        model: settings.gemini_model,
        base_url: settings.gemini_base_url,
    });
    let api = ApiContext {
        storage,
        model: Arc::new(model),
        credits: CreditPolicy {
            starting_credits: settings.starting_credits,
            referral_bonus: settings.referral_bonus,
        },
    };

    let app = build_router(Arc::new(AppState { api }), settings.max_body_bytes);

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(generate_route(), post(http_generate))
        .route(consume_credit_route(), post(http_consume_credit))
        .route(sync_profile_route(), post(http_sync_profile))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> Result<&'static str, StatusCode> {
    state.api.storage.health_check().await.map_err(|error| {
        error!(%error, "health check failed");
        StatusCode::SERVICE_UNAVAILABLE
    })?;
    Ok("ok")
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::Forbidden | ErrorCode::InsufficientCredits => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::NoImage | ErrorCode::Upstream => StatusCode::BAD_GATEWAY,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error_response(err: ApiError) -> (StatusCode, Json<ApiError>) {
    (status_for(err.code), Json(err))
}

async fn http_generate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GenerateRequest>,
) -> Response {
    match generate(&state.api, req).await {
        Ok(body) => Json(body).into_response(),
        Err(err) => {
            warn!(code = ?err.code, message = %err.message, "generate request failed");
            (
                status_for(err.code),
                Json(GenerateFailure {
                    error: err.message,
                    code: err.code,
                }),
            )
                .into_response()
        }
    }
}

async fn http_consume_credit(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ConsumeCreditRequest>,
) -> Response {
    match consume_credit(&state.api, &req.user_id).await {
        Ok(body) => Json(body).into_response(),
        Err(err) if err.code == ErrorCode::InsufficientCredits => (
            StatusCode::FORBIDDEN,
            Json(ConsumeCreditResponse {
                success: false,
                message: Some(err.message),
            }),
        )
            .into_response(),
        Err(err) => api_error_response(err).into_response(),
    }
}

async fn http_sync_profile(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SyncProfileRequest>,
) -> Response {
    match sync_profile(&state.api, req).await {
        Ok(body) => Json(body).into_response(),
        Err(err) => {
            if err.code == ErrorCode::Internal {
                error!(message = %err.message, "profile sync failed");
            }
            api_error_response(err).into_response()
        }
    }
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
