use super::*;
use crate::persist::{REFERRAL_CODE_KEY, SESSION_EMAIL_KEY, SESSION_USER_KEY};
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use shared::{
    domain::{UserId, UserProfile},
    protocol::{
        ConsumeCreditRequest, ConsumeCreditResponse, SyncProfileRequest, SyncProfileResponse,
    },
};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct MockServerState {
    sync_requests: Vec<SyncProfileRequest>,
    credits: i64,
    fail_sync: bool,
}

type Shared = Arc<Mutex<MockServerState>>;

async fn handle_sync(
    State(state): State<Shared>,
    Json(request): Json<SyncProfileRequest>,
) -> Result<Json<SyncProfileResponse>, (StatusCode, Json<serde_json::Value>)> {
    let mut guard = state.lock().expect("lock");
    guard.sync_requests.push(request.clone());
    if guard.fail_sync {
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "code": "internal", "message": "database unavailable" })),
        ));
    }
    Ok(Json(SyncProfileResponse {
        profile: UserProfile {
            user_id: request.user_id,
            email: request.email,
            credits: guard.credits,
            referral_code: "ownc0de1".into(),
            referred_by: request.referral_code.map(|_| UserId::new("referrer")),
        },
    }))
}

async fn handle_consume(
    State(state): State<Shared>,
    Json(_request): Json<ConsumeCreditRequest>,
) -> (StatusCode, Json<ConsumeCreditResponse>) {
    let mut guard = state.lock().expect("lock");
    if guard.credits <= 0 {
        return (
            StatusCode::FORBIDDEN,
            Json(ConsumeCreditResponse {
                success: false,
                message: Some("Insufficient credits".into()),
            }),
        );
    }
    guard.credits -= 1;
    (
        StatusCode::OK,
        Json(ConsumeCreditResponse {
            success: true,
            message: None,
        }),
    )
}

async fn spawn_server(state: Shared) -> String {
    let app = Router::new()
        .route("/api/user/sync", post(handle_sync))
        .route("/api/credits/consume", post(handle_consume))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    format!("http://{addr}")
}

fn alice() -> AuthUser {
    AuthUser {
        user_id: UserId::new("alice"),
        email: Some("alice@example.com".into()),
    }
}

#[tokio::test]
async fn sign_in_forwards_pending_referral_and_clears_it() {
    let server = Arc::new(Mutex::new(MockServerState {
        credits: 20,
        ..Default::default()
    }));
    let url = spawn_server(server.clone()).await;
    let state = Arc::new(MemoryState::new());
    state.set(REFERRAL_CODE_KEY, "friend01").expect("set");

    let sync = SessionSync::new(
        state.clone(),
        Arc::new(ProfileClient::new(reqwest::Client::new(), url)),
    );
    let mut session = Session::guest();
    let profile = sync.sign_in(&mut session, alice()).await.expect("sign in");

    assert_eq!(profile.credits, 20);
    assert_eq!(profile.referred_by, Some(UserId::new("referrer")));
    assert_eq!(session.credits(), Some(20));
    assert_eq!(state.get(REFERRAL_CODE_KEY), None);

    let requests = server.lock().expect("lock").sync_requests.clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].referral_code.as_deref(), Some("friend01"));
    assert_eq!(requests[0].email.as_deref(), Some("alice@example.com"));

    let restored = sync.restore();
    assert_eq!(restored.user(), Some(&alice()));
    assert!(restored.profile().is_none());
}

#[tokio::test]
async fn failed_sync_keeps_user_signed_in_and_referral_pending() {
    let server = Arc::new(Mutex::new(MockServerState {
        fail_sync: true,
        ..Default::default()
    }));
    let url = spawn_server(server).await;
    let state = Arc::new(MemoryState::new());
    state.set(REFERRAL_CODE_KEY, "friend01").expect("set");

    let sync = SessionSync::new(
        state.clone(),
        Arc::new(ProfileClient::new(reqwest::Client::new(), url)),
    );
    let mut session = Session::guest();
    let err = sync
        .sign_in(&mut session, alice())
        .await
        .expect_err("sync should fail");

    let api = err
        .downcast_ref::<shared::error::ApiException>()
        .expect("structured error");
    assert_eq!(api.message, "database unavailable");
    assert!(session.is_signed_in());
    assert!(session.profile().is_none());
    assert_eq!(state.get(REFERRAL_CODE_KEY).as_deref(), Some("friend01"));
}

#[tokio::test]
async fn sign_out_forgets_identity() {
    let server = Arc::new(Mutex::new(MockServerState {
        credits: 5,
        ..Default::default()
    }));
    let url = spawn_server(server).await;
    let state = Arc::new(MemoryState::new());
    let sync = SessionSync::new(
        state.clone(),
        Arc::new(ProfileClient::new(reqwest::Client::new(), url)),
    );

    let mut session = Session::guest();
    sync.sign_in(&mut session, alice()).await.expect("sign in");
    assert_eq!(state.get(SESSION_USER_KEY).as_deref(), Some("alice"));

    sync.sign_out(&mut session).expect("sign out");
    assert_eq!(session, Session::guest());
    assert_eq!(state.get(SESSION_USER_KEY), None);
    assert_eq!(state.get(SESSION_EMAIL_KEY), None);
    assert_eq!(sync.restore(), Session::guest());
}

#[tokio::test]
async fn profile_client_reports_refused_charge_as_false() {
    let server = Arc::new(Mutex::new(MockServerState {
        credits: 1,
        ..Default::default()
    }));
    let url = spawn_server(server.clone()).await;
    let client = ProfileClient::new(reqwest::Client::new(), url);
    let user = UserId::new("alice");

    assert!(client.consume_credit(&user).await.expect("first"));
    assert!(!client.consume_credit(&user).await.expect("second"));
    assert_eq!(server.lock().expect("lock").credits, 0);
}

#[tokio::test]
async fn gate_charges_through_real_client() {
    let server = Arc::new(Mutex::new(MockServerState {
        credits: 1,
        ..Default::default()
    }));
    let url = spawn_server(server).await;
    let state = Arc::new(MemoryState::new());
    let profiles: Arc<dyn ProfileService> =
        Arc::new(ProfileClient::new(reqwest::Client::new(), url));
    let sync = SessionSync::new(state.clone(), profiles.clone());
    let gate = AccessGate::new(state, profiles);

    let mut session = Session::guest();
    sync.sign_in(&mut session, alice()).await.expect("sign in");

    assert_eq!(gate.admit(&mut session).await, GateDecision::Allow);
    assert_eq!(session.credits(), Some(0));
    assert_eq!(
        gate.admit(&mut session).await,
        GateDecision::Deny(DenyReason::InsufficientCredits)
    );
}
