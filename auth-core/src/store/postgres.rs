//! PostgreSQL store.
//!
//! The two concurrency-sensitive operations (exclusive session creation and
//! rate-limit counting) run inside a transaction holding a
//! transaction-scoped advisory lock on their logical key, so concurrent
//! requests serialize on the same identity instead of racing the
//! check-then-write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use uuid::Uuid;

use crate::error::AuthError;
use crate::models::{AccessEvent, Organization, PasswordHistory, RateLimitRule, Session, User};
use crate::services::rate_limit::{decide, CounterUpdate, RateDecision};
use crate::store::{AuthStore, SessionCreateOutcome};

use crate::models::RateLimitCounter;

/// PostgreSQL-backed implementation of [`AuthStore`].
#[derive(Clone)]
pub struct PgAuthStore {
    pool: PgPool,
}

impl PgAuthStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl AuthStore for PgAuthStore {
    async fn insert_organization(&self, org: &Organization) -> Result<(), AuthError> {
        sqlx::query(
            r#"
            INSERT INTO organizations (
                org_id, org_name, key_ciphertext, signing_key_ciphertext,
                min_len, max_len, min_lowercase, min_uppercase, min_numeric, min_special,
                special_charset, reuse_depth, max_age_days,
                self_service_reset, enforce_mfa, allow_multiple_sessions,
                brute_force_limit, brute_force_action, session_interval_secs,
                archived, created_utc, updated_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                    $14, $15, $16, $17, $18, $19, $20, $21, $22)
            "#,
        )
        .bind(org.org_id)
        .bind(&org.org_name)
        .bind(&org.key_ciphertext)
        .bind(&org.signing_key_ciphertext)
        .bind(org.password_policy.min_len)
        .bind(org.password_policy.max_len)
        .bind(org.password_policy.min_lowercase)
        .bind(org.password_policy.min_uppercase)
        .bind(org.password_policy.min_numeric)
        .bind(org.password_policy.min_special)
        .bind(&org.password_policy.special_charset)
        .bind(org.password_policy.reuse_depth)
        .bind(org.password_policy.max_age_days)
        .bind(org.self_service_reset)
        .bind(org.enforce_mfa)
        .bind(org.allow_multiple_sessions)
        .bind(org.brute_force_limit)
        .bind(&org.brute_force_action)
        .bind(org.session_interval_secs)
        .bind(org.archived)
        .bind(org.created_utc)
        .bind(org.updated_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_organization(&self, org_id: Uuid) -> Result<Option<Organization>, AuthError> {
        Ok(
            sqlx::query_as::<_, Organization>("SELECT * FROM organizations WHERE org_id = $1")
                .bind(org_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn find_organization_by_name(
        &self,
        name: &str,
    ) -> Result<Option<Organization>, AuthError> {
        Ok(
            sqlx::query_as::<_, Organization>("SELECT * FROM organizations WHERE org_name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn insert_user(&self, user: &User) -> Result<(), AuthError> {
        sqlx::query(
            r#"
            INSERT INTO users (
                user_id, org_id, email, password_hash, mfa_secret_ciphertext,
                mfa_enabled, reset_token, reset_token_expiry_utc, archived,
                created_utc, updated_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(user.user_id)
        .bind(user.org_id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.mfa_secret_ciphertext)
        .bind(user.mfa_enabled)
        .bind(&user.reset_token)
        .bind(user.reset_token_expiry_utc)
        .bind(user.archived)
        .bind(user.created_utc)
        .bind(user.updated_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, AuthError> {
        Ok(
            sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        Ok(
            sqlx::query_as::<_, User>("SELECT * FROM users WHERE LOWER(email) = LOWER($1)")
                .bind(email)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn find_user_by_reset_token(&self, token: &str) -> Result<Option<User>, AuthError> {
        Ok(
            sqlx::query_as::<_, User>("SELECT * FROM users WHERE reset_token = $1")
                .bind(token)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn set_reset_token(
        &self,
        user_id: Uuid,
        token: &str,
        expiry: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        sqlx::query(
            r#"
            UPDATE users
            SET reset_token = $1, reset_token_expiry_utc = $2, updated_utc = $3
            WHERE user_id = $4
            "#,
        )
        .bind(token)
        .bind(expiry)
        .bind(Utc::now())
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_mfa_secret(&self, user_id: Uuid, ciphertext: &[u8]) -> Result<(), AuthError> {
        sqlx::query(
            "UPDATE users SET mfa_secret_ciphertext = $1, updated_utc = $2 WHERE user_id = $3",
        )
        .bind(ciphertext)
        .bind(Utc::now())
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn enable_mfa(&self, user_id: Uuid) -> Result<(), AuthError> {
        sqlx::query("UPDATE users SET mfa_enabled = TRUE, updated_utc = $1 WHERE user_id = $2")
            .bind(Utc::now())
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn apply_password_reset(
        &self,
        user_id: Uuid,
        new_hash: &str,
        archive: Option<PasswordHistory>,
        retain_depth: Option<i32>,
    ) -> Result<(), AuthError> {
        let mut tx = self.pool.begin().await?;

        if let Some(entry) = archive {
            sqlx::query(
                r#"
                INSERT INTO password_history (history_id, user_id, password_hash, superseded_utc)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(entry.history_id)
            .bind(entry.user_id)
            .bind(&entry.password_hash)
            .bind(entry.superseded_utc)
            .execute(&mut *tx)
            .await?;

            if let Some(depth) = retain_depth {
                sqlx::query(
                    r#"
                    DELETE FROM password_history
                    WHERE user_id = $1
                      AND history_id NOT IN (
                          SELECT history_id FROM password_history
                          WHERE user_id = $1
                          ORDER BY superseded_utc DESC
                          LIMIT $2
                      )
                    "#,
                )
                .bind(user_id)
                .bind(depth.max(0) as i64)
                .execute(&mut *tx)
                .await?;
            }
        }

        sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $1,
                reset_token = NULL,
                reset_token_expiry_utc = NULL,
                updated_utc = $2
            WHERE user_id = $3
            "#,
        )
        .bind(new_hash)
        .bind(Utc::now())
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn recent_password_hashes(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<String>, AuthError> {
        Ok(sqlx::query_scalar::<_, String>(
            r#"
            SELECT password_hash FROM password_history
            WHERE user_id = $1
            ORDER BY superseded_utc DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn create_session(&self, session: &Session) -> Result<(), AuthError> {
        insert_session(&self.pool, session).await
    }

    async fn create_session_exclusive(
        &self,
        session: &Session,
        now: DateTime<Utc>,
    ) -> Result<SessionCreateOutcome, AuthError> {
        let mut tx = self.pool.begin().await?;

        // Serialize concurrent logins for this user.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(session.user_id.to_string())
            .execute(&mut *tx)
            .await?;

        let live_exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sessions WHERE user_id = $1 AND expires_at_utc > $2)",
        )
        .bind(session.user_id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        if live_exists {
            tx.rollback().await?;
            return Ok(SessionCreateOutcome::Conflict);
        }

        sqlx::query(
            r#"
            INSERT INTO sessions (
                session_id, user_id, org_id, mfa_state,
                created_utc, last_activity_utc, expires_at_utc,
                ip_address, user_agent
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&session.session_id)
        .bind(session.user_id)
        .bind(session.org_id)
        .bind(&session.mfa_state)
        .bind(session.created_utc)
        .bind(session.last_activity_utc)
        .bind(session.expires_at_utc)
        .bind(&session.ip_address)
        .bind(&session.user_agent)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(SessionCreateOutcome::Created)
    }

    async fn find_session(&self, session_id: &str) -> Result<Option<Session>, AuthError> {
        Ok(
            sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE session_id = $1")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn touch_session(&self, session_id: &str, now: DateTime<Utc>) -> Result<(), AuthError> {
        sqlx::query("UPDATE sessions SET last_activity_utc = $1 WHERE session_id = $2")
            .bind(now)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_session_verified(&self, session_id: &str) -> Result<(), AuthError> {
        sqlx::query("UPDATE sessions SET mfa_state = 'verified' WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn expire_sessions_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        sqlx::query(
            "UPDATE sessions SET expires_at_utc = $1 WHERE user_id = $2 AND expires_at_utc > $1",
        )
        .bind(now)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_live_sessions(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<i64, AuthError> {
        Ok(sqlx::query_scalar(
            "SELECT COUNT(*) FROM sessions WHERE user_id = $1 AND expires_at_utc > $2",
        )
        .bind(user_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn apply_rate_limit(
        &self,
        identity: &str,
        route: &str,
        rule: &RateLimitRule,
        now: DateTime<Utc>,
    ) -> Result<RateDecision, AuthError> {
        let mut tx = self.pool.begin().await?;

        // Serialize concurrent calls for this (identity, route) pair so the
        // read-decide-write below cannot under-count.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("{identity}|{route}"))
            .execute(&mut *tx)
            .await?;

        let existing = sqlx::query_as::<_, RateLimitCounter>(
            "SELECT * FROM rate_limit_counters WHERE identity = $1 AND route = $2",
        )
        .bind(identity)
        .bind(route)
        .fetch_optional(&mut *tx)
        .await?;

        let (decision, update) = decide(existing.as_ref(), identity, route, rule, now);

        if let CounterUpdate::Put(counter) = update {
            sqlx::query(
                r#"
                INSERT INTO rate_limit_counters (identity, route, call_count, first_called_utc)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (identity, route)
                DO UPDATE SET call_count = $3, first_called_utc = $4
                "#,
            )
            .bind(&counter.identity)
            .bind(&counter.route)
            .bind(counter.call_count)
            .bind(counter.first_called_utc)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(decision)
    }

    async fn record_access_event(&self, event: &AccessEvent) -> Result<(), AuthError> {
        sqlx::query(
            r#"
            INSERT INTO access_events (
                event_id, org_id, user_id, event_type_code,
                ip_address, user_agent, country_code, created_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(event.event_id)
        .bind(event.org_id)
        .bind(event.user_id)
        .bind(&event.event_type_code)
        .bind(&event.ip_address)
        .bind(&event.user_agent)
        .bind(&event.country_code)
        .bind(event.created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

async fn insert_session(pool: &PgPool, session: &Session) -> Result<(), AuthError> {
    sqlx::query(
        r#"
        INSERT INTO sessions (
            session_id, user_id, org_id, mfa_state,
            created_utc, last_activity_utc, expires_at_utc,
            ip_address, user_agent
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(&session.session_id)
    .bind(session.user_id)
    .bind(session.org_id)
    .bind(&session.mfa_state)
    .bind(session.created_utc)
    .bind(session.last_activity_utc)
    .bind(session.expires_at_utc)
    .bind(&session.ip_address)
    .bind(&session.user_agent)
    .execute(pool)
    .await?;
    Ok(())
}
