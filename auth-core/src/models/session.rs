//! Session model - opaque-id login sessions with an MFA state machine.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// MFA verification state. Transitions only forward; "dead" is derived from
/// the expiry comparison, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MfaState {
    Unverified,
    Verified,
}

impl MfaState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MfaState::Unverified => "unverified",
            MfaState::Verified => "verified",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "verified" => MfaState::Verified,
            _ => MfaState::Unverified,
        }
    }
}

/// Session entity.
#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub session_id: String,
    pub user_id: Uuid,
    pub org_id: Uuid,
    pub mfa_state: String,
    pub created_utc: DateTime<Utc>,
    pub last_activity_utc: DateTime<Utc>,
    pub expires_at_utc: DateTime<Utc>,
    pub ip_address: String,
    pub user_agent: String,
}

impl Session {
    /// Create a new session. The identifier is 48 random bytes, base64url
    /// encoded, so it is not guessable or enumerable.
    pub fn new(
        user_id: Uuid,
        org_id: Uuid,
        mfa_state: MfaState,
        interval: Duration,
        ip_address: String,
        user_agent: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: generate_session_id(),
            user_id,
            org_id,
            mfa_state: mfa_state.as_str().to_string(),
            created_utc: now,
            last_activity_utc: now,
            expires_at_utc: now + interval,
            ip_address,
            user_agent,
        }
    }

    pub fn mfa_state(&self) -> MfaState {
        MfaState::parse(&self.mfa_state)
    }

    /// A session exactly at its expiry instant is already dead.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at_utc
    }

    pub fn is_verified(&self) -> bool {
        self.mfa_state() == MfaState::Verified
    }
}

fn generate_session_id() -> String {
    let mut bytes = [0u8; 48];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
