use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    persist::{guest_usage, PersistedState, GUEST_USAGE_KEY},
    profile::ProfileService,
    session::Session,
};

/// Generations a visitor may attempt before signing in.
pub const GUEST_GENERATION_LIMIT: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    GuestLimitReached,
    InsufficientCredits,
}

impl DenyReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GuestLimitReached => "guest_limit_reached",
            Self::InsufficientCredits => "insufficient_credits",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Deny(DenyReason),
}

/// Decides whether a generation may start, charging for it up front. Charges
/// are not refunded when the generation later fails.
pub struct AccessGate {
    state: Arc<dyn PersistedState>,
    profiles: Arc<dyn ProfileService>,
}

impl AccessGate {
    pub fn new(state: Arc<dyn PersistedState>, profiles: Arc<dyn ProfileService>) -> Self {
        Self { state, profiles }
    }

    pub fn guest_usage(&self) -> u32 {
        guest_usage(self.state.as_ref())
    }

    pub fn guest_generations_left(&self) -> u32 {
        GUEST_GENERATION_LIMIT.saturating_sub(self.guest_usage())
    }

    pub async fn admit(&self, session: &mut Session) -> GateDecision {
        let Some(user_id) = session.user().map(|user| user.user_id.clone()) else {
            return self.admit_guest();
        };

        if session.credits().is_some_and(|credits| credits <= 0) {
            return GateDecision::Deny(DenyReason::InsufficientCredits);
        }

        match self.profiles.consume_credit(&user_id).await {
            Ok(true) => {
                session.spend_cached_credit();
                GateDecision::Allow
            }
            Ok(false) => {
                info!(%user_id, "server refused credit charge");
                GateDecision::Deny(DenyReason::InsufficientCredits)
            }
            Err(error) => {
                warn!(%user_id, %error, "credit charge failed");
                GateDecision::Deny(DenyReason::InsufficientCredits)
            }
        }
    }

    fn admit_guest(&self) -> GateDecision {
        let used = self.guest_usage();
        if used >= GUEST_GENERATION_LIMIT {
            return GateDecision::Deny(DenyReason::GuestLimitReached);
        }
        // An attempt that cannot be counted is not granted.
        if let Err(error) = self.state.set(GUEST_USAGE_KEY, &(used + 1).to_string()) {
            warn!(%error, "failed to persist guest usage, refusing attempt");
            return GateDecision::Deny(DenyReason::GuestLimitReached);
        }
        GateDecision::Allow
    }
}
