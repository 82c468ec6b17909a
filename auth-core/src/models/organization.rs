//! Organization model - tenant root with auth policy and key material.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Password strength and reuse rules, configured per organization.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PasswordPolicy {
    /// Minimum password length.
    pub min_len: i32,

    /// Maximum password length. None means unbounded.
    pub max_len: Option<i32>,

    /// Minimum count of lowercase characters.
    pub min_lowercase: i32,

    /// Minimum count of uppercase characters.
    pub min_uppercase: i32,

    /// Minimum count of numeric characters.
    pub min_numeric: i32,

    /// Minimum count of special characters drawn from `special_charset`.
    pub min_special: i32,

    /// The set of characters that count as special.
    pub special_charset: String,

    /// How many prior passwords are rejected on reuse. None disables the check.
    pub reuse_depth: Option<i32>,

    /// Maximum password age in days. None disables expiry.
    pub max_age_days: Option<i32>,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_len: 12,
            max_len: None,
            min_lowercase: 1,
            min_uppercase: 1,
            min_numeric: 1,
            min_special: 1,
            special_charset: "!@#$%^&*()-_=+[]{}|\\;:'\",.<>/?`~".to_string(),
            reuse_depth: Some(5),
            max_age_days: None,
        }
    }
}

/// What happens once the brute-force limit for login attempts is exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BruteForceAction {
    Lockout,
    LogOnly,
}

impl BruteForceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            BruteForceAction::Lockout => "lockout",
            BruteForceAction::LogOnly => "log_only",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "log_only" => BruteForceAction::LogOnly,
            _ => BruteForceAction::Lockout,
        }
    }
}

/// Organization entity (tenant root). Never hard-deleted; `archived` marks
/// the end of the soft lifecycle.
#[derive(Debug, Clone, FromRow)]
pub struct Organization {
    pub org_id: Uuid,
    pub org_name: String,
    /// Org data key, encrypted by the master key service.
    pub key_ciphertext: Vec<u8>,
    /// Session-signing key, encrypted by the org data key.
    pub signing_key_ciphertext: Vec<u8>,
    #[sqlx(flatten)]
    pub password_policy: PasswordPolicy,
    pub self_service_reset: bool,
    pub enforce_mfa: bool,
    pub allow_multiple_sessions: bool,
    pub brute_force_limit: i32,
    pub brute_force_action: String,
    pub session_interval_secs: i64,
    pub archived: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Tenant-configurable flags supplied at creation.
#[derive(Debug, Clone)]
pub struct OrgFlags {
    pub self_service_reset: bool,
    pub enforce_mfa: bool,
    pub allow_multiple_sessions: bool,
    pub brute_force_limit: i32,
    pub brute_force_action: BruteForceAction,
    pub session_interval_secs: i64,
}

impl Default for OrgFlags {
    fn default() -> Self {
        Self {
            self_service_reset: true,
            enforce_mfa: false,
            allow_multiple_sessions: true,
            brute_force_limit: 10,
            brute_force_action: BruteForceAction::Lockout,
            session_interval_secs: 3600,
        }
    }
}

impl Organization {
    /// Create a new organization record with supplied key material.
    ///
    /// `key_ciphertext` and `signing_key_ciphertext` come from the envelope
    /// cipher; this constructor does not touch crypto.
    pub fn new(
        name: String,
        policy: PasswordPolicy,
        flags: OrgFlags,
        key_ciphertext: Vec<u8>,
        signing_key_ciphertext: Vec<u8>,
    ) -> Self {
        let now = Utc::now();
        Self {
            org_id: Uuid::new_v4(),
            org_name: name,
            key_ciphertext,
            signing_key_ciphertext,
            password_policy: policy,
            self_service_reset: flags.self_service_reset,
            enforce_mfa: flags.enforce_mfa,
            allow_multiple_sessions: flags.allow_multiple_sessions,
            brute_force_limit: flags.brute_force_limit,
            brute_force_action: flags.brute_force_action.as_str().to_string(),
            session_interval_secs: flags.session_interval_secs,
            archived: false,
            created_utc: now,
            updated_utc: now,
        }
    }

    pub fn brute_force_action(&self) -> BruteForceAction {
        BruteForceAction::parse(&self.brute_force_action)
    }

    pub fn session_interval(&self) -> Duration {
        Duration::seconds(self.session_interval_secs)
    }

    pub fn is_active(&self) -> bool {
        !self.archived
    }
}
