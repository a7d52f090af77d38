use std::sync::Arc;

use anyhow::{anyhow, Result};
use shared::{
    domain::{UserId, UserProfile},
    protocol::SyncProfileRequest,
};
use tracing::{error, info, warn};

use crate::{
    persist::{
        pending_referral_code, PersistError, PersistedState, REFERRAL_CODE_KEY,
        SESSION_EMAIL_KEY, SESSION_USER_KEY,
    },
    profile::ProfileService,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: UserId,
    pub email: Option<String>,
}

/// Who is driving the client. The profile is a cache of the server record
/// and may be missing after a failed sync even while signed in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    user: Option<AuthUser>,
    profile: Option<UserProfile>,
}

impl Session {
    pub fn guest() -> Self {
        Self::default()
    }

    pub fn signed_in(user: AuthUser) -> Self {
        Self {
            user: Some(user),
            profile: None,
        }
    }

    pub fn is_signed_in(&self) -> bool {
        self.user.is_some()
    }

    pub fn user(&self) -> Option<&AuthUser> {
        self.user.as_ref()
    }

    pub fn profile(&self) -> Option<&UserProfile> {
        self.profile.as_ref()
    }

    pub fn credits(&self) -> Option<i64> {
        self.profile.as_ref().map(|profile| profile.credits)
    }

    pub fn set_profile(&mut self, profile: Option<UserProfile>) {
        self.profile = profile;
    }

    pub(crate) fn spend_cached_credit(&mut self) {
        if let Some(profile) = self.profile.as_mut() {
            profile.credits = (profile.credits - 1).max(0);
        }
    }
}

pub struct SessionSync {
    state: Arc<dyn PersistedState>,
    profiles: Arc<dyn ProfileService>,
}

impl SessionSync {
    pub fn new(state: Arc<dyn PersistedState>, profiles: Arc<dyn ProfileService>) -> Self {
        Self { state, profiles }
    }

    /// Rebuilds the identity remembered from a previous run, without a profile.
    pub fn restore(&self) -> Session {
        match self.state.get(SESSION_USER_KEY) {
            Some(user_id) if !user_id.trim().is_empty() => Session::signed_in(AuthUser {
                user_id: UserId::new(user_id),
                email: self.state.get(SESSION_EMAIL_KEY),
            }),
            _ => Session::guest(),
        }
    }

    /// Signs in and syncs the profile. A failed sync leaves the user signed in
    /// with no cached profile.
    pub async fn sign_in(&self, session: &mut Session, user: AuthUser) -> Result<UserProfile> {
        if user.user_id.is_blank() {
            return Err(anyhow!("cannot sign in without a user id"));
        }
        self.state.set(SESSION_USER_KEY, user.user_id.as_str())?;
        match &user.email {
            Some(email) => self.state.set(SESSION_EMAIL_KEY, email)?,
            None => self.state.clear(SESSION_EMAIL_KEY)?,
        }
        info!(user_id = %user.user_id, "signed in");
        *session = Session::signed_in(user);
        self.refresh(session).await
    }

    /// Creates the profile on first sight (forwarding any pending referral
    /// code) or reloads it.
    pub async fn refresh(&self, session: &mut Session) -> Result<UserProfile> {
        let user = session
            .user()
            .cloned()
            .ok_or_else(|| anyhow!("cannot sync a profile while signed out"))?;
        let referral_code = pending_referral_code(self.state.as_ref());
        let request = SyncProfileRequest {
            user_id: user.user_id.clone(),
            email: user.email,
            referral_code: referral_code.clone(),
        };

        let profile = self.profiles.sync_profile(&request).await.map_err(|err| {
            error!(user_id = %user.user_id, error = %err, "profile sync failed");
            err
        })?;

        if referral_code.is_some() {
            if let Err(err) = self.state.clear(REFERRAL_CODE_KEY) {
                warn!(error = %err, "failed to clear pending referral code");
            }
        }
        session.set_profile(Some(profile.clone()));
        Ok(profile)
    }

    pub fn sign_out(&self, session: &mut Session) -> Result<(), PersistError> {
        *session = Session::guest();
        self.state.clear(SESSION_USER_KEY)?;
        self.state.clear(SESSION_EMAIL_KEY)
    }
}
