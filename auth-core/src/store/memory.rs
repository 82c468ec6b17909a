//! In-memory store for tests and local development.
//!
//! Holds the same contract as the Postgres implementation, including the
//! atomicity of exclusive session creation and rate-limit counting: the
//! former serializes on a per-user lock, the latter on the counter's map
//! entry.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::AuthError;
use crate::models::{AccessEvent, Organization, PasswordHistory, RateLimitRule, Session, User};
use crate::services::rate_limit::{decide, CounterUpdate, RateDecision};
use crate::store::{AuthStore, SessionCreateOutcome};

use crate::models::RateLimitCounter;

#[derive(Default)]
pub struct MemoryAuthStore {
    organizations: DashMap<Uuid, Organization>,
    users: DashMap<Uuid, User>,
    sessions: DashMap<String, Session>,
    history: DashMap<Uuid, Vec<PasswordHistory>>,
    counters: DashMap<(String, String), RateLimitCounter>,
    access_events: DashMap<Uuid, Vec<AccessEvent>>,
    session_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl MemoryAuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn user_lock(&self, user_id: Uuid) -> Arc<Mutex<()>> {
        self.session_locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Test hook: access events recorded for a user, oldest first.
    pub fn access_events_for(&self, user_id: Uuid) -> Vec<AccessEvent> {
        self.access_events
            .get(&user_id)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    /// Test hook: all sessions belonging to a user.
    pub fn sessions_for(&self, user_id: Uuid) -> Vec<Session> {
        self.sessions
            .iter()
            .filter(|s| s.user_id == user_id)
            .map(|s| s.clone())
            .collect()
    }

    /// Test hook: raw counter state for an (identity, route) pair.
    pub fn counter(&self, identity: &str, route: &str) -> Option<RateLimitCounter> {
        self.counters
            .get(&(identity.to_string(), route.to_string()))
            .map(|c| c.clone())
    }
}

#[async_trait]
impl AuthStore for MemoryAuthStore {
    async fn insert_organization(&self, org: &Organization) -> Result<(), AuthError> {
        let duplicate = self
            .organizations
            .iter()
            .any(|o| o.org_name == org.org_name);
        if duplicate || self.organizations.contains_key(&org.org_id) {
            return Err(AuthError::Internal(anyhow::anyhow!(
                "organization already exists"
            )));
        }
        self.organizations.insert(org.org_id, org.clone());
        Ok(())
    }

    async fn find_organization(&self, org_id: Uuid) -> Result<Option<Organization>, AuthError> {
        Ok(self.organizations.get(&org_id).map(|o| o.clone()))
    }

    async fn find_organization_by_name(
        &self,
        name: &str,
    ) -> Result<Option<Organization>, AuthError> {
        Ok(self
            .organizations
            .iter()
            .find(|o| o.org_name == name)
            .map(|o| o.clone()))
    }

    async fn insert_user(&self, user: &User) -> Result<(), AuthError> {
        let duplicate = self
            .users
            .iter()
            .any(|u| u.email.eq_ignore_ascii_case(&user.email));
        if duplicate {
            return Err(AuthError::Internal(anyhow::anyhow!("email already taken")));
        }
        self.users.insert(user.user_id, user.clone());
        Ok(())
    }

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, AuthError> {
        Ok(self.users.get(&user_id).map(|u| u.clone()))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        Ok(self
            .users
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .map(|u| u.clone()))
    }

    async fn find_user_by_reset_token(&self, token: &str) -> Result<Option<User>, AuthError> {
        Ok(self
            .users
            .iter()
            .find(|u| match &u.reset_token {
                Some(stored) => stored.as_bytes().ct_eq(token.as_bytes()).into(),
                None => false,
            })
            .map(|u| u.clone()))
    }

    async fn set_reset_token(
        &self,
        user_id: Uuid,
        token: &str,
        expiry: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let mut user = self
            .users
            .get_mut(&user_id)
            .ok_or_else(|| AuthError::Internal(anyhow::anyhow!("user not found")))?;
        user.reset_token = Some(token.to_string());
        user.reset_token_expiry_utc = Some(expiry);
        user.updated_utc = Utc::now();
        Ok(())
    }

    async fn set_mfa_secret(&self, user_id: Uuid, ciphertext: &[u8]) -> Result<(), AuthError> {
        let mut user = self
            .users
            .get_mut(&user_id)
            .ok_or_else(|| AuthError::Internal(anyhow::anyhow!("user not found")))?;
        user.mfa_secret_ciphertext = Some(ciphertext.to_vec());
        user.updated_utc = Utc::now();
        Ok(())
    }

    async fn enable_mfa(&self, user_id: Uuid) -> Result<(), AuthError> {
        let mut user = self
            .users
            .get_mut(&user_id)
            .ok_or_else(|| AuthError::Internal(anyhow::anyhow!("user not found")))?;
        user.mfa_enabled = true;
        user.updated_utc = Utc::now();
        Ok(())
    }

    async fn apply_password_reset(
        &self,
        user_id: Uuid,
        new_hash: &str,
        archive: Option<PasswordHistory>,
        retain_depth: Option<i32>,
    ) -> Result<(), AuthError> {
        let mut user = self
            .users
            .get_mut(&user_id)
            .ok_or_else(|| AuthError::Internal(anyhow::anyhow!("user not found")))?;

        if let Some(entry) = archive {
            let mut history = self.history.entry(user_id).or_default();
            history.insert(0, entry);
            if let Some(depth) = retain_depth {
                history.truncate(depth.max(0) as usize);
            }
        }

        user.password_hash = Some(new_hash.to_string());
        user.reset_token = None;
        user.reset_token_expiry_utc = None;
        user.updated_utc = Utc::now();
        Ok(())
    }

    async fn recent_password_hashes(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<String>, AuthError> {
        Ok(self
            .history
            .get(&user_id)
            .map(|entries| {
                entries
                    .iter()
                    .take(limit.max(0) as usize)
                    .map(|e| e.password_hash.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_session(&self, session: &Session) -> Result<(), AuthError> {
        self.sessions
            .insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn create_session_exclusive(
        &self,
        session: &Session,
        now: DateTime<Utc>,
    ) -> Result<SessionCreateOutcome, AuthError> {
        let lock = self.user_lock(session.user_id);
        let _guard = lock.lock().await;

        let live_exists = self
            .sessions
            .iter()
            .any(|s| s.user_id == session.user_id && now < s.expires_at_utc);
        if live_exists {
            return Ok(SessionCreateOutcome::Conflict);
        }

        self.sessions
            .insert(session.session_id.clone(), session.clone());
        Ok(SessionCreateOutcome::Created)
    }

    async fn find_session(&self, session_id: &str) -> Result<Option<Session>, AuthError> {
        Ok(self.sessions.get(session_id).map(|s| s.clone()))
    }

    async fn touch_session(&self, session_id: &str, now: DateTime<Utc>) -> Result<(), AuthError> {
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            session.last_activity_utc = now;
        }
        Ok(())
    }

    async fn mark_session_verified(&self, session_id: &str) -> Result<(), AuthError> {
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            session.mfa_state = crate::models::MfaState::Verified.as_str().to_string();
        }
        Ok(())
    }

    async fn expire_sessions_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        for mut session in self.sessions.iter_mut() {
            if session.user_id == user_id && now < session.expires_at_utc {
                session.expires_at_utc = now;
            }
        }
        Ok(())
    }

    async fn count_live_sessions(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<i64, AuthError> {
        Ok(self
            .sessions
            .iter()
            .filter(|s| s.user_id == user_id && now < s.expires_at_utc)
            .count() as i64)
    }

    async fn apply_rate_limit(
        &self,
        identity: &str,
        route: &str,
        rule: &RateLimitRule,
        now: DateTime<Utc>,
    ) -> Result<RateDecision, AuthError> {
        let key = (identity.to_string(), route.to_string());
        // The entry guard holds the shard lock, making decide-and-write
        // atomic for this counter.
        let entry = self.counters.entry(key);
        match entry {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                let (decision, update) = decide(Some(occupied.get()), identity, route, rule, now);
                if let CounterUpdate::Put(counter) = update {
                    occupied.insert(counter);
                }
                Ok(decision)
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let (decision, update) = decide(None, identity, route, rule, now);
                if let CounterUpdate::Put(counter) = update {
                    vacant.insert(counter);
                }
                Ok(decision)
            }
        }
    }

    async fn record_access_event(&self, event: &AccessEvent) -> Result<(), AuthError> {
        self.access_events
            .entry(event.user_id)
            .or_default()
            .push(event.clone());
        Ok(())
    }
}
