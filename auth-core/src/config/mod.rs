use std::env;
use std::time::Duration;

use crate::error::AuthError;

#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub environment: Environment,
    pub service_name: String,
    pub log_level: String,
    pub database: DatabaseConfig,
    pub crypto: CryptoConfig,
    pub session: SessionConfig,
    pub rate_limit: RateLimitConfig,
    pub cookie: CookieConfig,
    /// Upper bound on any single storage or collaborator call.
    pub external_call_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Envelope-encryption mode for secrets at rest.
#[derive(Debug, Clone)]
pub enum CryptoConfig {
    /// Production: org data keys are wrapped by this 32-byte master key.
    Sealed { master_key: [u8; 32] },
    /// Non-production identity implementation of the same call contract.
    Passthrough,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Issuer claim stamped into session tokens.
    pub token_issuer: String,
    /// Default session interval for newly created organizations.
    pub default_interval_secs: i64,
    /// Lifetime of password-reset tokens.
    pub reset_token_ttl_secs: i64,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub login_limit: u32,
    pub login_bucket_secs: u64,
    pub login_jail_secs: u64,
    pub mfa_limit: u32,
    pub mfa_bucket_secs: u64,
    pub mfa_jail_secs: u64,
    pub reset_limit: u32,
    pub reset_bucket_secs: u64,
    pub reset_jail_secs: u64,
}

#[derive(Debug, Clone)]
pub struct CookieConfig {
    pub name: String,
    /// Secure in every environment except local development/test.
    pub secure: bool,
}

impl CoreConfig {
    pub fn from_env() -> Result<Self, AuthError> {
        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AuthError::Internal(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let crypto = match get_env("CRYPTO_MODE", Some("passthrough"), is_prod)?.as_str() {
            "sealed" => {
                let hex_key = get_env("CRYPTO_MASTER_KEY_HEX", None, true)?;
                let bytes = hex::decode(&hex_key)
                    .map_err(|e| AuthError::Internal(anyhow::anyhow!("bad master key: {e}")))?;
                let master_key: [u8; 32] = bytes.try_into().map_err(|_| {
                    AuthError::Internal(anyhow::anyhow!("master key must be 32 bytes"))
                })?;
                CryptoConfig::Sealed { master_key }
            }
            "passthrough" => CryptoConfig::Passthrough,
            other => {
                return Err(AuthError::Internal(anyhow::anyhow!(
                    "Invalid CRYPTO_MODE: {other}"
                )))
            }
        };

        let config = CoreConfig {
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("auth-core"), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
            },
            crypto,
            session: SessionConfig {
                token_issuer: get_env("SESSION_TOKEN_ISSUER", Some("auth-core"), is_prod)?,
                default_interval_secs: parse_env("SESSION_INTERVAL_SECONDS", "3600", is_prod)?,
                reset_token_ttl_secs: parse_env(
                    "RESET_TOKEN_TTL_SECONDS",
                    "259200", // 3 days
                    is_prod,
                )?,
            },
            rate_limit: RateLimitConfig {
                login_limit: parse_env("RATE_LIMIT_LOGIN_ATTEMPTS", "10", is_prod)?,
                login_bucket_secs: parse_env("RATE_LIMIT_LOGIN_BUCKET_SECONDS", "3600", is_prod)?,
                login_jail_secs: parse_env("RATE_LIMIT_LOGIN_JAIL_SECONDS", "3600", is_prod)?,
                mfa_limit: parse_env("RATE_LIMIT_MFA_ATTEMPTS", "10", is_prod)?,
                mfa_bucket_secs: parse_env("RATE_LIMIT_MFA_BUCKET_SECONDS", "900", is_prod)?,
                mfa_jail_secs: parse_env("RATE_LIMIT_MFA_JAIL_SECONDS", "900", is_prod)?,
                reset_limit: parse_env("RATE_LIMIT_RESET_ATTEMPTS", "5", is_prod)?,
                reset_bucket_secs: parse_env("RATE_LIMIT_RESET_BUCKET_SECONDS", "3600", is_prod)?,
                reset_jail_secs: parse_env("RATE_LIMIT_RESET_JAIL_SECONDS", "3600", is_prod)?,
            },
            cookie: CookieConfig {
                name: get_env("TENANT_COOKIE_NAME", Some("org"), is_prod)?,
                secure: is_prod
                    || get_env("COOKIE_SECURE", Some("false"), false)?
                        .parse()
                        .unwrap_or(false),
            },
            external_call_timeout: Duration::from_millis(parse_env(
                "EXTERNAL_CALL_TIMEOUT_MS",
                "5000",
                is_prod,
            )?),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AuthError> {
        if self.session.default_interval_secs <= 0 {
            return Err(AuthError::Internal(anyhow::anyhow!(
                "SESSION_INTERVAL_SECONDS must be positive"
            )));
        }

        if self.session.reset_token_ttl_secs <= 0 {
            return Err(AuthError::Internal(anyhow::anyhow!(
                "RESET_TOKEN_TTL_SECONDS must be positive"
            )));
        }

        if self.environment == Environment::Prod {
            if matches!(self.crypto, CryptoConfig::Passthrough) {
                return Err(AuthError::Internal(anyhow::anyhow!(
                    "Passthrough crypto is not allowed in production"
                )));
            }
            if !self.cookie.secure {
                return Err(AuthError::Internal(anyhow::anyhow!(
                    "Insecure cookies are not allowed in production"
                )));
            }
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AuthError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AuthError::Internal(anyhow::anyhow!(
                    "{key} is required in production but not set"
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AuthError::Internal(anyhow::anyhow!(
                    "{key} is required but not set"
                )))
            }
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: &str, is_prod: bool) -> Result<T, AuthError>
where
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| AuthError::Internal(anyhow::anyhow!("{key}: {e}")))
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
