//! Storage seam for the auth core.
//!
//! Every mutation goes through a narrow, explicit repository method rather
//! than a generic entity manager, so each write is a visible, testable call.
//! `PgAuthStore` is the production implementation; `MemoryAuthStore` backs
//! tests and local development behind the same trait.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AuthError;
use crate::models::{AccessEvent, Organization, PasswordHistory, RateLimitRule, Session, User};
use crate::services::rate_limit::RateDecision;

pub use memory::MemoryAuthStore;
pub use postgres::PgAuthStore;

/// Outcome of the atomic create-unless-live-session-exists operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCreateOutcome {
    Created,
    /// A non-expired session already exists and the org forbids a second one.
    Conflict,
}

#[async_trait]
pub trait AuthStore: Send + Sync {
    // ==================== Organizations ====================

    async fn insert_organization(&self, org: &Organization) -> Result<(), AuthError>;

    async fn find_organization(&self, org_id: Uuid) -> Result<Option<Organization>, AuthError>;

    async fn find_organization_by_name(&self, name: &str)
        -> Result<Option<Organization>, AuthError>;

    // ==================== Users ====================

    async fn insert_user(&self, user: &User) -> Result<(), AuthError>;

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, AuthError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AuthError>;

    async fn find_user_by_reset_token(&self, token: &str) -> Result<Option<User>, AuthError>;

    /// Issue (or overwrite) the user's reset token. At most one token is
    /// live per user; this replaces any prior one.
    async fn set_reset_token(
        &self,
        user_id: Uuid,
        token: &str,
        expiry: DateTime<Utc>,
    ) -> Result<(), AuthError>;

    /// Store the pending (encrypted) MFA seed without enabling MFA.
    async fn set_mfa_secret(&self, user_id: Uuid, ciphertext: &[u8]) -> Result<(), AuthError>;

    /// Flip the MFA-enabled flag after a confirmed setup.
    async fn enable_mfa(&self, user_id: Uuid) -> Result<(), AuthError>;

    /// Atomically complete a password reset: archive the outgoing hash (when
    /// present), trim history to the retention depth, store the new hash and
    /// clear the reset token.
    async fn apply_password_reset(
        &self,
        user_id: Uuid,
        new_hash: &str,
        archive: Option<PasswordHistory>,
        retain_depth: Option<i32>,
    ) -> Result<(), AuthError>;

    /// Retained hashes, most recent first, bounded by `limit`.
    async fn recent_password_hashes(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<String>, AuthError>;

    // ==================== Sessions ====================

    /// Unconditional insert, for orgs that allow multiple sessions.
    async fn create_session(&self, session: &Session) -> Result<(), AuthError>;

    /// Insert only if the user has no live session at `now`. The existence
    /// check and the insert are one atomic unit so two concurrent logins
    /// cannot both pass.
    async fn create_session_exclusive(
        &self,
        session: &Session,
        now: DateTime<Utc>,
    ) -> Result<SessionCreateOutcome, AuthError>;

    async fn find_session(&self, session_id: &str) -> Result<Option<Session>, AuthError>;

    async fn touch_session(&self, session_id: &str, now: DateTime<Utc>) -> Result<(), AuthError>;

    async fn mark_session_verified(&self, session_id: &str) -> Result<(), AuthError>;

    /// Force-expire every live session of the user (`expires_at = now`).
    async fn expire_sessions_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError>;

    async fn count_live_sessions(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<i64, AuthError>;

    // ==================== Rate limiting ====================

    /// Run the fixed-window decision for (identity, route) atomically and
    /// persist its counter update.
    async fn apply_rate_limit(
        &self,
        identity: &str,
        route: &str,
        rule: &RateLimitRule,
        now: DateTime<Utc>,
    ) -> Result<RateDecision, AuthError>;

    // ==================== Access history ====================

    async fn record_access_event(&self, event: &AccessEvent) -> Result<(), AuthError>;
}
