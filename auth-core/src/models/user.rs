//! User model - tenant-scoped accounts.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// User entity. A `None` password hash means the account must complete a
/// password reset before its first login.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub org_id: Uuid,
    pub email: String,
    pub password_hash: Option<String>,
    pub mfa_secret_ciphertext: Option<Vec<u8>>,
    pub mfa_enabled: bool,
    pub reset_token: Option<String>,
    pub reset_token_expiry_utc: Option<DateTime<Utc>>,
    pub archived: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl User {
    /// Create a user with a known password hash.
    pub fn new(org_id: Uuid, email: String, password_hash: String) -> Self {
        let now = Utc::now();
        Self {
            user_id: Uuid::new_v4(),
            org_id,
            email,
            password_hash: Some(password_hash),
            mfa_secret_ciphertext: None,
            mfa_enabled: false,
            reset_token: None,
            reset_token_expiry_utc: None,
            archived: false,
            created_utc: now,
            updated_utc: now,
        }
    }

    /// Create an invited user with no password. The account can only become
    /// usable through the reset flow.
    pub fn invited(org_id: Uuid, email: String) -> Self {
        let now = Utc::now();
        Self {
            user_id: Uuid::new_v4(),
            org_id,
            email,
            password_hash: None,
            mfa_secret_ciphertext: None,
            mfa_enabled: false,
            reset_token: None,
            reset_token_expiry_utc: None,
            archived: false,
            created_utc: now,
            updated_utc: now,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.archived
    }

    /// Whether a non-expired reset token is present.
    pub fn has_live_reset_token(&self, now: DateTime<Utc>) -> bool {
        match (&self.reset_token, self.reset_token_expiry_utc) {
            (Some(_), Some(expiry)) => now < expiry,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invited_user_has_no_password() {
        let user = User::invited(Uuid::new_v4(), "admin@acme.test".to_string());
        assert!(user.password_hash.is_none());
        assert!(!user.mfa_enabled);
    }

    #[test]
    fn test_live_reset_token_window() {
        let mut user = User::invited(Uuid::new_v4(), "a@b.test".to_string());
        let now = Utc::now();
        assert!(!user.has_live_reset_token(now));

        user.reset_token = Some("tok".to_string());
        user.reset_token_expiry_utc = Some(now + chrono::Duration::days(3));
        assert!(user.has_live_reset_token(now));
        assert!(!user.has_live_reset_token(now + chrono::Duration::days(4)));
    }
}
