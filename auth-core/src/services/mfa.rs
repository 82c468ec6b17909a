//! MFA manager.
//!
//! TOTP enrollment and verification. Seeds are stored encrypted under the
//! organization's data key and only leave the store sealed; decryption
//! failures surface as authorization failures.

use std::sync::Arc;

use totp_rs::{Algorithm, Secret, TOTP};

use crate::crypto::{envelope, EnvelopeCrypto};
use crate::error::AuthError;
use crate::models::{AccessEvent, AccessEventType, Organization, Session, User};
use crate::services::geo::GeoLookup;
use crate::services::session::SessionManager;
use crate::store::AuthStore;

const TOTP_DIGITS: usize = 6;
const TOTP_SKEW: u8 = 1;
const TOTP_STEP: u64 = 30;

/// Material handed back from `begin_setup` for the authenticator app.
#[derive(Debug, Clone)]
pub struct MfaSetup {
    pub secret_base32: String,
    pub provisioning_uri: String,
}

#[derive(Clone)]
pub struct MfaManager {
    store: Arc<dyn AuthStore>,
    crypto: EnvelopeCrypto,
    sessions: SessionManager,
    geo: Arc<dyn GeoLookup>,
    issuer: String,
}

impl MfaManager {
    pub fn new(
        store: Arc<dyn AuthStore>,
        crypto: EnvelopeCrypto,
        sessions: SessionManager,
        geo: Arc<dyn GeoLookup>,
        issuer: String,
    ) -> Self {
        Self {
            store,
            crypto,
            sessions,
            geo,
            issuer,
        }
    }

    /// Begin enrollment: generate a seed, store it sealed against the user,
    /// and return the provisioning material. MFA stays disabled until the
    /// first code confirms the enrollment.
    pub async fn begin_setup(&self, user: &User, org: &Organization) -> Result<MfaSetup, AuthError> {
        let secret = Secret::generate_secret();
        let secret_bytes = secret
            .to_bytes()
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("Secret generation error: {e}")))?;

        let org_key = self
            .crypto
            .open_org_key(&org.key_ciphertext, org.org_id)
            .map_err(AuthError::Internal)?;
        let ciphertext = org_key
            .seal(
                &secret_bytes,
                &envelope::mfa_seed_aad(org.org_id, user.user_id),
            )
            .map_err(AuthError::Internal)?;

        self.store
            .set_mfa_secret(user.user_id, &ciphertext)
            .await?;

        let totp = self.build_totp(secret_bytes, &user.email)?;

        tracing::info!(user_id = %user.user_id, "MFA enrollment started");

        Ok(MfaSetup {
            secret_base32: totp.get_secret_base32(),
            provisioning_uri: totp.get_url(),
        })
    }

    /// Confirm enrollment with the first code. Success enables MFA and keeps
    /// the seed; failure leaves the pending seed untouched so the caller can
    /// retry.
    pub async fn confirm_setup(
        &self,
        user: &User,
        org: &Organization,
        code: &str,
    ) -> Result<bool, AuthError> {
        let Some(ciphertext) = &user.mfa_secret_ciphertext else {
            return Err(AuthError::Validation(
                "No pending MFA enrollment".to_string(),
            ));
        };

        let valid = self.check_code(ciphertext, user, org, code).map_err(|e| {
            tracing::error!(user_id = %user.user_id, error = %e, "MFA seed unavailable");
            AuthError::Unauthorized
        })?;
        if !valid {
            tracing::warn!(user_id = %user.user_id, "MFA enrollment confirmation failed");
            return Ok(false);
        }

        self.store.enable_mfa(user.user_id).await?;
        tracing::info!(user_id = %user.user_id, "MFA enabled");
        Ok(true)
    }

    /// Verify a code for an unverified session. Success transitions the
    /// session to verified and records the access-history entry; a wrong
    /// code changes no state.
    pub async fn verify_code(
        &self,
        session: &Session,
        user: &User,
        org: &Organization,
        code: &str,
    ) -> Result<bool, AuthError> {
        // Fail closed when nothing is enrolled.
        let Some(ciphertext) = &user.mfa_secret_ciphertext else {
            return Err(AuthError::Unauthorized);
        };

        let valid = self
            .check_code(ciphertext, user, org, code)
            .map_err(|e| {
                tracing::error!(user_id = %user.user_id, error = %e, "MFA seed unavailable");
                AuthError::Unauthorized
            })?;

        if !valid {
            tracing::warn!(user_id = %user.user_id, "invalid MFA code");
            return Ok(false);
        }

        self.sessions.mark_verified(session).await?;

        let country_code = self.geo.country_code(&session.ip_address).await;
        self.store
            .record_access_event(&AccessEvent::new(
                org.org_id,
                user.user_id,
                AccessEventType::MfaVerified,
                session.ip_address.clone(),
                session.user_agent.clone(),
                country_code,
            ))
            .await?;

        tracing::info!(user_id = %user.user_id, "MFA verified");
        Ok(true)
    }

    fn check_code(
        &self,
        seed_ciphertext: &[u8],
        user: &User,
        org: &Organization,
        code: &str,
    ) -> Result<bool, AuthError> {
        let org_key = self
            .crypto
            .open_org_key(&org.key_ciphertext, org.org_id)
            .map_err(AuthError::Internal)?;
        let secret_bytes = org_key
            .open(
                seed_ciphertext,
                &envelope::mfa_seed_aad(org.org_id, user.user_id),
            )
            .map_err(AuthError::Internal)?;

        let totp = self.build_totp(secret_bytes, &user.email)?;
        Ok(totp.check_current(code).unwrap_or(false))
    }

    fn build_totp(&self, secret_bytes: Vec<u8>, account: &str) -> Result<TOTP, AuthError> {
        TOTP::new(
            Algorithm::SHA1,
            TOTP_DIGITS,
            TOTP_SKEW,
            TOTP_STEP,
            secret_bytes,
            Some(self.issuer.clone()),
            account.to_string(),
        )
        .map_err(|e| AuthError::Internal(anyhow::anyhow!("TOTP init error: {e}")))
    }
}
