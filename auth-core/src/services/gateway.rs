//! Auth gateway: the composition root.
//!
//! Orchestrates login, the MFA challenge, password reset and per-request
//! authorization over the managers below. Authentication is a two-piece
//! credential: the tenant cookie resolves the organization, the bearer token
//! resolves the session within it.
//!
//! Every flow runs under a bounded timeout; on the authorization path any
//! failure, including storage and crypto trouble, collapses into a generic
//! `Unauthorized` so the error surface cannot be used as an oracle.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use rand::RngCore;
use uuid::Uuid;
use validator::Validate;

use crate::config::CoreConfig;
use crate::crypto::{dummy_hash, envelope, hash_password, verify_password, EnvelopeCrypto, Password};
use crate::dtos::{
    ClientInfo, CookieSpec, LoginRequest, LoginResponse, MfaChallengeRequest,
    PasswordResetConfirm, PasswordResetRequest, ResetRequestedResponse, SameSite,
};
use crate::error::AuthError;
use crate::models::{
    AccessEvent, AccessEventType, OrgFlags, Organization, PasswordPolicy, RateKey, RateLimitRule,
    Session, User,
};
use crate::services::geo::GeoLookup;
use crate::services::mfa::{MfaManager, MfaSetup};
use crate::services::rate_limit::{routes, RateLimiter};
use crate::services::reset::{issue_invitation_token, PasswordResetFlow, ResetNotifier};
use crate::services::session::SessionManager;
use crate::services::token::SessionTokenService;
use crate::store::AuthStore;

/// Resolved identity for an authorized request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: User,
    pub organization: Organization,
    pub session: Session,
}

/// Result of a successful login: the response body plus the tenant cookie
/// the request layer must set.
#[derive(Debug)]
pub struct LoginOutcome {
    pub body: LoginResponse,
    pub cookie: CookieSpec,
}

#[derive(Clone)]
pub struct AuthGateway {
    store: Arc<dyn AuthStore>,
    crypto: EnvelopeCrypto,
    sessions: SessionManager,
    mfa: MfaManager,
    reset: PasswordResetFlow,
    limiter: RateLimiter,
    tokens: SessionTokenService,
    geo: Arc<dyn GeoLookup>,
    login_rule: RateLimitRule,
    mfa_rule: RateLimitRule,
    reset_rule: RateLimitRule,
    reset_token_ttl: Duration,
    cookie_name: String,
    cookie_secure: bool,
    call_timeout: StdDuration,
}

impl AuthGateway {
    pub fn new(
        store: Arc<dyn AuthStore>,
        crypto: EnvelopeCrypto,
        notifier: Arc<dyn ResetNotifier>,
        geo: Arc<dyn GeoLookup>,
        config: &CoreConfig,
    ) -> Self {
        let sessions = SessionManager::new(store.clone());
        let reset_token_ttl = Duration::seconds(config.session.reset_token_ttl_secs);

        let mfa = MfaManager::new(
            store.clone(),
            crypto.clone(),
            sessions.clone(),
            geo.clone(),
            config.session.token_issuer.clone(),
        );
        let reset = PasswordResetFlow::new(
            store.clone(),
            sessions.clone(),
            notifier,
            reset_token_ttl,
        );
        let limiter = RateLimiter::new(store.clone());
        let tokens = SessionTokenService::new(config.session.token_issuer.clone());

        let rl = &config.rate_limit;
        Self {
            store,
            crypto,
            sessions,
            mfa,
            reset,
            limiter,
            tokens,
            geo,
            login_rule: RateLimitRule {
                limit: rl.login_limit as i64,
                bucket: Duration::seconds(rl.login_bucket_secs as i64),
                jail_time: Duration::seconds(rl.login_jail_secs as i64),
            },
            mfa_rule: RateLimitRule {
                limit: rl.mfa_limit as i64,
                bucket: Duration::seconds(rl.mfa_bucket_secs as i64),
                jail_time: Duration::seconds(rl.mfa_jail_secs as i64),
            },
            reset_rule: RateLimitRule {
                limit: rl.reset_limit as i64,
                bucket: Duration::seconds(rl.reset_bucket_secs as i64),
                jail_time: Duration::seconds(rl.reset_jail_secs as i64),
            },
            reset_token_ttl,
            cookie_name: config.cookie.name.clone(),
            cookie_secure: config.cookie.secure,
            call_timeout: config.external_call_timeout,
        }
    }

    // ==================== Login ====================

    pub async fn login(
        &self,
        req: LoginRequest,
        client: &ClientInfo,
    ) -> Result<LoginOutcome, AuthError> {
        // Shape validation returns before anything touches storage.
        req.validate()?;
        self.bounded(self.login_inner(req, client)).await
    }

    async fn login_inner(
        &self,
        req: LoginRequest,
        client: &ClientInfo,
    ) -> Result<LoginOutcome, AuthError> {
        self.limiter
            .check(
                &RateKey::Client(client.ip.clone()),
                routes::LOGIN,
                &self.login_rule,
            )
            .await?;

        let user = self.store.find_user_by_email(&req.email).await?;

        // Burn a hash compare on the paths without a usable hash so the
        // response stays constant until the password-compare step.
        let user = match user {
            Some(user) if user.is_active() => user,
            _ => {
                let _ = verify_password(&Password::new(req.password), dummy_hash());
                return Err(AuthError::Unauthorized);
            }
        };

        let org = self
            .store
            .find_organization(user.org_id)
            .await?
            .filter(Organization::is_active)
            .ok_or_else(|| {
                tracing::error!(user_id = %user.user_id, "user belongs to a missing or archived org");
                AuthError::Unauthorized
            })?;

        // Adaptive lockout: the org's brute-force limit keyed by the account.
        self.limiter
            .check_with_action(
                &RateKey::User(user.user_id),
                routes::LOGIN,
                &RateLimitRule {
                    limit: org.brute_force_limit as i64,
                    ..self.login_rule
                },
                org.brute_force_action(),
            )
            .await?;

        let Some(hash) = &user.password_hash else {
            let _ = verify_password(&Password::new(req.password), dummy_hash());
            return Err(AuthError::Unauthorized);
        };

        verify_password(&Password::new(req.password), hash).map_err(|_| {
            tracing::warn!(user_id = %user.user_id, "password verification failed");
            AuthError::Unauthorized
        })?;

        let session = self
            .sessions
            .create_session(&user, &org, client.ip.clone(), client.user_agent.clone())
            .await?;

        // MFA-gated logins record history after the MFA step instead.
        if session.is_verified() {
            let country_code = self.geo.country_code(&client.ip).await;
            self.store
                .record_access_event(&AccessEvent::new(
                    org.org_id,
                    user.user_id,
                    AccessEventType::Login,
                    client.ip.clone(),
                    client.user_agent.clone(),
                    country_code,
                ))
                .await?;
        }

        let token = self
            .issue_session_token(&org, &session)
            .map_err(|e| {
                tracing::error!(org_id = %org.org_id, error = %e, "session token issuance failed");
                AuthError::Unauthorized
            })?;

        Ok(LoginOutcome {
            body: LoginResponse {
                token,
                mfa_enabled: user.mfa_enabled || org.enforce_mfa,
            },
            cookie: self.tenant_cookie(&org),
        })
    }

    // ==================== Authorization ====================

    /// Resolve and validate the two-piece credential for a request.
    pub async fn authorize(
        &self,
        cookie_org_id: &str,
        bearer_token: &str,
    ) -> Result<AuthContext, AuthError> {
        let result = self
            .bounded(self.authorize_inner(cookie_org_id, bearer_token))
            .await;
        result.map_err(fail_closed)
    }

    async fn authorize_inner(
        &self,
        cookie_org_id: &str,
        bearer_token: &str,
    ) -> Result<AuthContext, AuthError> {
        let (org, session) = self.resolve_credential(cookie_org_id, bearer_token).await?;

        let session = self.sessions.validate_session(&session.session_id).await?;

        let user = self
            .store
            .find_user_by_id(session.user_id)
            .await?
            .filter(User::is_active)
            .ok_or(AuthError::Unauthorized)?;

        Ok(AuthContext {
            user,
            organization: org,
            session,
        })
    }

    // ==================== MFA ====================

    /// Verify a TOTP code against the pending session and transition it to
    /// verified. A wrong code leaves session state and activity untouched.
    pub async fn complete_mfa_challenge(
        &self,
        cookie_org_id: &str,
        bearer_token: &str,
        req: MfaChallengeRequest,
    ) -> Result<(), AuthError> {
        req.validate()?;
        self.bounded(self.mfa_challenge_inner(cookie_org_id, bearer_token, &req.code))
            .await
            .map_err(fail_closed)
    }

    async fn mfa_challenge_inner(
        &self,
        cookie_org_id: &str,
        bearer_token: &str,
        code: &str,
    ) -> Result<(), AuthError> {
        let (org, session) = self.resolve_credential(cookie_org_id, bearer_token).await?;

        let user = self
            .store
            .find_user_by_id(session.user_id)
            .await?
            .filter(User::is_active)
            .ok_or(AuthError::Unauthorized)?;

        self.limiter
            .check(&RateKey::User(user.user_id), routes::MFA, &self.mfa_rule)
            .await?;

        if self.mfa.verify_code(&session, &user, &org, code).await? {
            Ok(())
        } else {
            Err(AuthError::Unauthorized)
        }
    }

    /// Start TOTP enrollment for the session's user. Reachable with a
    /// pending (unverified) session so newly invited users under an
    /// MFA-enforcing org can enroll.
    pub async fn begin_mfa_setup(
        &self,
        cookie_org_id: &str,
        bearer_token: &str,
    ) -> Result<MfaSetup, AuthError> {
        self.bounded(async {
            let (org, session) = self
                .resolve_credential(cookie_org_id, bearer_token)
                .await
                .map_err(fail_closed)?;

            let user = self
                .store
                .find_user_by_id(session.user_id)
                .await?
                .filter(User::is_active)
                .ok_or(AuthError::Unauthorized)?;

            self.mfa.begin_setup(&user, &org).await
        })
        .await
    }

    /// Confirm enrollment with the first code; enables MFA for the account.
    pub async fn confirm_mfa_setup(
        &self,
        cookie_org_id: &str,
        bearer_token: &str,
        req: MfaChallengeRequest,
    ) -> Result<(), AuthError> {
        req.validate()?;
        self.bounded(async {
            let (org, session) = self
                .resolve_credential(cookie_org_id, bearer_token)
                .await
                .map_err(fail_closed)?;

            let user = self
                .store
                .find_user_by_id(session.user_id)
                .await?
                .filter(User::is_active)
                .ok_or(AuthError::Unauthorized)?;

            self.limiter
                .check(&RateKey::User(user.user_id), routes::MFA, &self.mfa_rule)
                .await?;

            if self.mfa.confirm_setup(&user, &org, &req.code).await? {
                Ok(())
            } else {
                Err(AuthError::Unauthorized)
            }
        })
        .await
    }

    // ==================== Password reset ====================

    pub async fn request_password_reset(
        &self,
        req: PasswordResetRequest,
        client: &ClientInfo,
    ) -> Result<ResetRequestedResponse, AuthError> {
        req.validate()?;
        self.bounded(async {
            self.limiter
                .check(
                    &RateKey::Client(client.ip.clone()),
                    routes::RESET_REQUEST,
                    &self.reset_rule,
                )
                .await?;

            self.reset.request_reset(&req.email).await?;
            Ok(ResetRequestedResponse::default())
        })
        .await
    }

    pub async fn complete_password_reset(
        &self,
        req: PasswordResetConfirm,
        client: &ClientInfo,
    ) -> Result<(), AuthError> {
        req.validate()?;
        self.bounded(self.reset.complete_reset(
            &req.token,
            &req.new_password,
            client.ip.clone(),
            client.user_agent.clone(),
        ))
        .await
    }

    // ==================== Tenant provisioning ====================

    /// Create an organization with fresh envelope key material.
    pub async fn create_organization(
        &self,
        name: String,
        policy: PasswordPolicy,
        flags: OrgFlags,
    ) -> Result<Organization, AuthError> {
        if self.store.find_organization_by_name(&name).await?.is_some() {
            return Err(AuthError::Validation(
                "Organization name is already taken".to_string(),
            ));
        }

        let org = provision_organization(&self.crypto, name, policy, flags)?;
        self.store.insert_organization(&org).await?;
        tracing::info!(org_id = %org.org_id, org_name = %org.org_name, "organization created");
        Ok(org)
    }

    /// Invite a user with no password. The returned token (delivered by the
    /// caller's channel of choice) is the only way to make the account
    /// usable.
    pub async fn invite_user(
        &self,
        org: &Organization,
        email: String,
    ) -> Result<(User, String), AuthError> {
        let user = User::invited(org.org_id, email);
        self.store.insert_user(&user).await?;

        let (token, expiry) = issue_invitation_token(self.reset_token_ttl);
        self.store
            .set_reset_token(user.user_id, &token, expiry)
            .await?;

        tracing::info!(user_id = %user.user_id, org_id = %org.org_id, "user invited");
        Ok((user, token))
    }

    // ==================== Internals ====================

    /// Resolve the cookie to an organization and the bearer token to a
    /// still-pending-or-better session within it.
    async fn resolve_credential(
        &self,
        cookie_org_id: &str,
        bearer_token: &str,
    ) -> Result<(Organization, Session), AuthError> {
        let org_id = Uuid::parse_str(cookie_org_id).map_err(|_| AuthError::Unauthorized)?;

        let org = self
            .store
            .find_organization(org_id)
            .await?
            .filter(Organization::is_active)
            .ok_or(AuthError::Unauthorized)?;

        let signing_key = self
            .open_signing_key(&org)
            .map_err(|_| AuthError::Unauthorized)?;

        let claims = self
            .tokens
            .verify(&signing_key, bearer_token)
            .map_err(|_| AuthError::Unauthorized)?;

        let session = self.sessions.resolve_pending(&claims.sid).await?;

        // The token must resolve a session of the cookie's tenant.
        if session.org_id != org.org_id {
            return Err(AuthError::Unauthorized);
        }

        Ok((org, session))
    }

    fn issue_session_token(
        &self,
        org: &Organization,
        session: &Session,
    ) -> Result<String, anyhow::Error> {
        let signing_key = self.open_signing_key(org)?;
        self.tokens
            .issue(&signing_key, &session.session_id, session.expires_at_utc)
    }

    fn open_signing_key(&self, org: &Organization) -> Result<Vec<u8>, anyhow::Error> {
        let org_key = self.crypto.open_org_key(&org.key_ciphertext, org.org_id)?;
        org_key.open(
            &org.signing_key_ciphertext,
            &envelope::signing_key_aad(org.org_id),
        )
    }

    fn tenant_cookie(&self, org: &Organization) -> CookieSpec {
        CookieSpec {
            name: self.cookie_name.clone(),
            value: org.org_id.to_string(),
            http_only: true,
            same_site: SameSite::Lax,
            secure: self.cookie_secure,
            max_age_secs: org.session_interval_secs,
        }
    }

    /// Bound an operation; nothing in this core may block indefinitely.
    async fn bounded<T, F>(&self, fut: F) -> Result<T, AuthError>
    where
        F: Future<Output = Result<T, AuthError>>,
    {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!("operation exceeded the external-call timeout");
                Err(AuthError::Internal(anyhow::anyhow!(
                    "operation timed out"
                )))
            }
        }
    }
}

/// Collapse any non-rate-limit failure into `Unauthorized`.
fn fail_closed(err: AuthError) -> AuthError {
    match err {
        AuthError::RateLimited { .. } => err,
        AuthError::Unauthorized => AuthError::Unauthorized,
        other => {
            tracing::error!(error = %other, "authorization failed closed");
            AuthError::Unauthorized
        }
    }
}

/// Build a fully-populated organization record with fresh key material.
pub fn provision_organization(
    crypto: &EnvelopeCrypto,
    name: String,
    policy: PasswordPolicy,
    flags: OrgFlags,
) -> Result<Organization, AuthError> {
    let mut org = Organization::new(name, policy, flags, Vec::new(), Vec::new());

    org.key_ciphertext = crypto
        .generate_org_key(org.org_id)
        .map_err(AuthError::Internal)?;
    let org_key = crypto
        .open_org_key(&org.key_ciphertext, org.org_id)
        .map_err(AuthError::Internal)?;

    let mut signing_key = [0u8; envelope::KEY_LEN];
    rand::rngs::OsRng.fill_bytes(&mut signing_key);
    org.signing_key_ciphertext = org_key
        .seal(&signing_key, &envelope::signing_key_aad(org.org_id))
        .map_err(AuthError::Internal)?;

    Ok(org)
}

// Hashing an invitation-path password reuses the credential adapter; kept
// here so provisioning callers do not need the crypto module directly.
pub fn hash_initial_password(plaintext: &str) -> Result<String, AuthError> {
    Ok(hash_password(&Password::new(plaintext.to_string()))
        .map_err(AuthError::Internal)?
        .into_string())
}
