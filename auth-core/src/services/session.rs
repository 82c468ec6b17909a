//! Session manager.
//!
//! State machine per session: `Unverified --(MFA success)--> Verified`;
//! death is derived from the expiry comparison and is never stored.

use std::sync::Arc;

use chrono::Utc;

use crate::error::AuthError;
use crate::models::{MfaState, Organization, Session, User};
use crate::store::{AuthStore, SessionCreateOutcome};

#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn AuthStore>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn AuthStore>) -> Self {
        Self { store }
    }

    /// Create a session for a successful credential check.
    ///
    /// The session starts `Unverified` when the user must still present a
    /// second factor (their own enrollment, or the organization enforcing
    /// MFA). When the organization disallows multiple sessions, the
    /// no-live-session check and the insert are one atomic store call.
    pub async fn create_session(
        &self,
        user: &User,
        org: &Organization,
        ip_address: String,
        user_agent: String,
    ) -> Result<Session, AuthError> {
        let state = if user.mfa_enabled || org.enforce_mfa {
            MfaState::Unverified
        } else {
            MfaState::Verified
        };

        let session = Session::new(
            user.user_id,
            org.org_id,
            state,
            org.session_interval(),
            ip_address,
            user_agent,
        );

        if org.allow_multiple_sessions {
            self.store.create_session(&session).await?;
        } else {
            match self
                .store
                .create_session_exclusive(&session, Utc::now())
                .await?
            {
                SessionCreateOutcome::Created => {}
                SessionCreateOutcome::Conflict => {
                    tracing::warn!(user_id = %user.user_id, "login rejected, session already active");
                    return Err(AuthError::Forbidden("An active session already exists"));
                }
            }
        }

        tracing::info!(user_id = %user.user_id, org_id = %org.org_id, "session created");
        Ok(session)
    }

    /// Resolve a session for an authorized request.
    ///
    /// Fails generic on absence, an unverified MFA state, or expiry (the
    /// boundary instant counts as expired). On success refreshes and
    /// persists the last-activity timestamp.
    pub async fn validate_session(&self, session_id: &str) -> Result<Session, AuthError> {
        let now = Utc::now();

        let mut session = self
            .store
            .find_session(session_id)
            .await?
            .ok_or(AuthError::Unauthorized)?;

        if session.is_expired(now) {
            return Err(AuthError::Unauthorized);
        }

        if !session.is_verified() {
            return Err(AuthError::Unauthorized);
        }

        self.store.touch_session(session_id, now).await?;
        session.last_activity_utc = now;
        Ok(session)
    }

    /// Resolve a session for the MFA challenge step: admits `Unverified`
    /// sessions, still rejects absent or expired ones, and does not touch
    /// the activity timestamp.
    pub async fn resolve_pending(&self, session_id: &str) -> Result<Session, AuthError> {
        let session = self
            .store
            .find_session(session_id)
            .await?
            .ok_or(AuthError::Unauthorized)?;

        if session.is_expired(Utc::now()) {
            return Err(AuthError::Unauthorized);
        }

        Ok(session)
    }

    /// Transition `Unverified -> Verified`. Only the MFA manager calls this,
    /// after a successful code check. Re-invocation on an already verified
    /// session is harmless.
    pub async fn mark_verified(&self, session: &Session) -> Result<(), AuthError> {
        self.store.mark_session_verified(&session.session_id).await
    }

    /// Force-expire every live session of the user, e.g. after a password
    /// reset invalidates all other logins.
    pub async fn expire_all_for_user(&self, user_id: uuid::Uuid) -> Result<(), AuthError> {
        self.store
            .expire_sessions_for_user(user_id, Utc::now())
            .await?;
        tracing::info!(user_id = %user_id, "all sessions expired");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrgFlags, PasswordPolicy};
    use crate::store::MemoryAuthStore;
    use chrono::Duration;
    use uuid::Uuid;

    fn org(flags: OrgFlags) -> Organization {
        Organization::new(
            format!("org-{}", Uuid::new_v4()),
            PasswordPolicy::default(),
            flags,
            vec![0u8; 32],
            vec![0u8; 32],
        )
    }

    fn user(org_id: Uuid, mfa_enabled: bool) -> User {
        let mut u = User::new(org_id, format!("{}@t.test", Uuid::new_v4()), "h".to_string());
        u.mfa_enabled = mfa_enabled;
        u
    }

    fn manager() -> (SessionManager, Arc<MemoryAuthStore>) {
        let store = Arc::new(MemoryAuthStore::new());
        (SessionManager::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_mfa_user_starts_unverified() {
        let (manager, _) = manager();
        let org = org(OrgFlags::default());
        let user = user(org.org_id, true);

        let session = manager
            .create_session(&user, &org, "127.0.0.1".into(), "ua".into())
            .await
            .unwrap();
        assert_eq!(session.mfa_state(), MfaState::Unverified);
    }

    #[tokio::test]
    async fn test_org_enforced_mfa_starts_unverified() {
        let (manager, _) = manager();
        let org = org(OrgFlags {
            enforce_mfa: true,
            ..OrgFlags::default()
        });
        // Not yet enrolled, but the org enforces a second factor.
        let user = user(org.org_id, false);

        let session = manager
            .create_session(&user, &org, "127.0.0.1".into(), "ua".into())
            .await
            .unwrap();
        assert_eq!(session.mfa_state(), MfaState::Unverified);
    }

    #[tokio::test]
    async fn test_validate_rejects_unverified() {
        let (manager, _) = manager();
        let org = org(OrgFlags::default());
        let user = user(org.org_id, true);

        let session = manager
            .create_session(&user, &org, "127.0.0.1".into(), "ua".into())
            .await
            .unwrap();

        let err = manager
            .validate_session(&session.session_id)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Unauthorized));

        // The pending path admits it for the MFA challenge.
        assert!(manager.resolve_pending(&session.session_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_validate_rejects_at_expiry_boundary() {
        let (manager, store) = manager();
        let org = org(OrgFlags::default());
        let user = user(org.org_id, false);

        let session = manager
            .create_session(&user, &org, "127.0.0.1".into(), "ua".into())
            .await
            .unwrap();

        // Pin expiry to the past; stored state stays verified.
        store
            .expire_sessions_for_user(user.user_id, Utc::now())
            .await
            .unwrap();

        let err = manager
            .validate_session(&session.session_id)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Unauthorized));
    }

    #[tokio::test]
    async fn test_validate_refreshes_activity() {
        let (manager, store) = manager();
        let org = org(OrgFlags::default());
        let user = user(org.org_id, false);

        let session = manager
            .create_session(&user, &org, "127.0.0.1".into(), "ua".into())
            .await
            .unwrap();
        let created_activity = session.last_activity_utc;

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let refreshed = manager.validate_session(&session.session_id).await.unwrap();
        assert!(refreshed.last_activity_utc > created_activity);

        let stored = store.find_session(&session.session_id).await.unwrap().unwrap();
        assert_eq!(stored.last_activity_utc, refreshed.last_activity_utc);
    }

    #[tokio::test]
    async fn test_single_session_policy_rejects_second_login() {
        let (manager, _) = manager();
        let org = org(OrgFlags {
            allow_multiple_sessions: false,
            ..OrgFlags::default()
        });
        let user = user(org.org_id, false);

        manager
            .create_session(&user, &org, "127.0.0.1".into(), "ua".into())
            .await
            .unwrap();

        let err = manager
            .create_session(&user, &org, "127.0.0.1".into(), "ua".into())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_expire_all_then_login_again() {
        let (manager, store) = manager();
        let org = org(OrgFlags {
            allow_multiple_sessions: false,
            ..OrgFlags::default()
        });
        let user = user(org.org_id, false);

        manager
            .create_session(&user, &org, "127.0.0.1".into(), "ua".into())
            .await
            .unwrap();
        manager.expire_all_for_user(user.user_id).await.unwrap();
        assert_eq!(
            store.count_live_sessions(user.user_id, Utc::now() + Duration::seconds(1))
                .await
                .unwrap(),
            0
        );

        assert!(manager
            .create_session(&user, &org, "127.0.0.1".into(), "ua".into())
            .await
            .is_ok());
    }
}
