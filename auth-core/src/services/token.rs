//! Session token service.
//!
//! Tokens are signed JWTs carrying only the session identifier as a claim,
//! HS256 over the organization's envelope-decrypted signing key, with expiry
//! equal to the session length.

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Claims carried by a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTokenClaims {
    /// Session identifier.
    pub sid: String,
    /// Issuer.
    pub iss: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
}

#[derive(Clone)]
pub struct SessionTokenService {
    issuer: String,
}

impl SessionTokenService {
    pub fn new(issuer: String) -> Self {
        Self { issuer }
    }

    /// Sign a token binding to `session_id`, valid until `expires_at`.
    pub fn issue(
        &self,
        signing_key: &[u8],
        session_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<String, anyhow::Error> {
        let claims = SessionTokenClaims {
            sid: session_id.to_string(),
            iss: self.issuer.clone(),
            exp: expires_at.timestamp(),
            iat: Utc::now().timestamp(),
        };

        let header = Header::new(Algorithm::HS256);
        encode(&header, &claims, &EncodingKey::from_secret(signing_key))
            .map_err(|e| anyhow::anyhow!("Failed to encode session token: {}", e))
    }

    /// Verify signature, expiry and issuer; returns the claims.
    pub fn verify(
        &self,
        signing_key: &[u8],
        token: &str,
    ) -> Result<SessionTokenClaims, anyhow::Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss"]);

        let token_data = decode::<SessionTokenClaims>(
            token,
            &DecodingKey::from_secret(signing_key),
            &validation,
        )
        .map_err(|e| anyhow::anyhow!("Invalid session token: {}", e))?;

        Ok(token_data.claims)
    }
}
