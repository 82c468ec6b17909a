//! Password reset flow.
//!
//! Token lifecycle: `NoActiveToken -> TokenIssued -> (Consumed | Expired)`.
//! `request_reset` never discloses whether an account exists; the caller
//! always renders the same "check your email" response. Token delivery goes
//! through the `ResetNotifier` collaborator; delivery mechanics live outside
//! this core.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rand::Rng;

use crate::crypto::{hash_password, Password};
use crate::error::AuthError;
use crate::models::{AccessEvent, AccessEventType, PasswordHistory, User};
use crate::policy::{self, PolicyViolation};
use crate::services::session::SessionManager;
use crate::store::AuthStore;

/// Delivers reset tokens to the account's mailbox. Implementations own
/// transport and templating.
#[async_trait]
pub trait ResetNotifier: Send + Sync {
    async fn deliver_reset_token(&self, email: &str, token: &str) -> Result<(), anyhow::Error>;
}

/// Default notifier for environments without delivery wired up.
pub struct NoopNotifier;

#[async_trait]
impl ResetNotifier for NoopNotifier {
    async fn deliver_reset_token(&self, email: &str, _token: &str) -> Result<(), anyhow::Error> {
        tracing::debug!(email = %email, "reset token issued (no notifier configured)");
        Ok(())
    }
}

#[derive(Clone)]
pub struct PasswordResetFlow {
    store: Arc<dyn AuthStore>,
    sessions: SessionManager,
    notifier: Arc<dyn ResetNotifier>,
    token_ttl: Duration,
}

impl PasswordResetFlow {
    pub fn new(
        store: Arc<dyn AuthStore>,
        sessions: SessionManager,
        notifier: Arc<dyn ResetNotifier>,
        token_ttl: Duration,
    ) -> Self {
        Self {
            store,
            sessions,
            notifier,
            token_ttl,
        }
    }

    /// Issue a reset token when the account exists and the organization
    /// permits self-service reset; otherwise do nothing. Either way the
    /// outcome the caller can observe is identical.
    pub async fn request_reset(&self, email: &str) -> Result<(), AuthError> {
        let Some(user) = self.store.find_user_by_email(email).await? else {
            tracing::debug!("reset requested for unknown account");
            return Ok(());
        };

        if user.archived {
            return Ok(());
        }

        let Some(org) = self.store.find_organization(user.org_id).await? else {
            return Ok(());
        };

        if org.archived || !org.self_service_reset {
            tracing::debug!(user_id = %user.user_id, "reset requested but not permitted");
            return Ok(());
        }

        // Overwrites any prior token: at most one is live per user.
        if user.has_live_reset_token(Utc::now()) {
            tracing::debug!(user_id = %user.user_id, "replacing live reset token");
        }
        let token = generate_reset_token();
        let expiry = Utc::now() + self.token_ttl;
        self.store
            .set_reset_token(user.user_id, &token, expiry)
            .await?;

        tracing::info!(user_id = %user.user_id, "password reset requested");

        // Delivery failure is logged, never surfaced: the response must not
        // depend on whether the account exists.
        if let Err(e) = self.notifier.deliver_reset_token(&user.email, &token).await {
            tracing::error!(user_id = %user.user_id, error = %e, "reset token delivery failed");
        }

        Ok(())
    }

    /// Consume a reset token and set a new password.
    ///
    /// Self-service permission is re-checked here: tokens can outlive a
    /// policy change. On success the token is cleared, the outgoing hash is
    /// archived for reuse detection, and every live session is expired.
    pub async fn complete_reset(
        &self,
        token: &str,
        new_password: &str,
        ip_address: String,
        user_agent: String,
    ) -> Result<(), AuthError> {
        let user = self
            .store
            .find_user_by_reset_token(token)
            .await?
            .ok_or(AuthError::Unauthorized)?;

        let expiry = user.reset_token_expiry_utc.ok_or(AuthError::Unauthorized)?;
        if Utc::now() >= expiry {
            return Err(AuthError::TokenExpired);
        }

        let org = self
            .store
            .find_organization(user.org_id)
            .await?
            .ok_or(AuthError::Unauthorized)?;

        if !org.self_service_reset {
            return Err(AuthError::Forbidden(
                "Self-service password reset is disabled",
            ));
        }

        policy::validate_password(new_password, &org.password_policy)
            .map_err(AuthError::Policy)?;

        let reuse_depth = org.password_policy.reuse_depth;
        if let Some(depth) = reuse_depth {
            if self.matches_recent(&user, new_password, depth).await? {
                return Err(AuthError::Policy(PolicyViolation::RecentlyUsed { depth }));
            }
        }

        let new_hash = hash_password(&Password::new(new_password.to_string()))
            .map_err(AuthError::Internal)?;

        let archive = user
            .password_hash
            .clone()
            .map(|hash| PasswordHistory::new(user.user_id, hash));

        self.store
            .apply_password_reset(user.user_id, new_hash.as_str(), archive, reuse_depth)
            .await?;

        // Every other login dies with the old credential.
        self.sessions.expire_all_for_user(user.user_id).await?;

        self.store
            .record_access_event(&AccessEvent::new(
                org.org_id,
                user.user_id,
                AccessEventType::PasswordReset,
                ip_address,
                user_agent,
                None,
            ))
            .await?;

        tracing::info!(user_id = %user.user_id, "password reset completed");
        Ok(())
    }

    /// The outgoing hash counts as the most recent history entry, so the
    /// comparison set is it plus the newest `depth - 1` archived hashes.
    async fn matches_recent(
        &self,
        user: &User,
        candidate: &str,
        depth: i32,
    ) -> Result<bool, AuthError> {
        let mut hashes: Vec<String> = Vec::new();
        if let Some(current) = &user.password_hash {
            hashes.push(current.clone());
        }
        hashes.extend(
            self.store
                .recent_password_hashes(user.user_id, depth as i64)
                .await?,
        );

        Ok(policy::was_previously_used(candidate, &hashes, Some(depth)))
    }
}

fn generate_reset_token() -> String {
    let mut rng = rand::thread_rng();
    let token_bytes: [u8; 32] = rng.gen();
    hex::encode(token_bytes)
}

/// Handed to provisioning flows that invite a user without a password: the
/// account only becomes usable through this token.
pub fn issue_invitation_token(ttl: Duration) -> (String, chrono::DateTime<Utc>) {
    (generate_reset_token(), Utc::now() + ttl)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_token_shape() {
        let token = generate_reset_token();
        assert_eq!(token.len(), 64);
        assert_ne!(token, generate_reset_token());
    }
}
