//! Access events - login history written by the auth flows.
//!
//! This core only writes these records; listing them is someone else's API.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessEventType {
    Login,
    MfaVerified,
    PasswordReset,
}

impl AccessEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessEventType::Login => "login",
            AccessEventType::MfaVerified => "mfa_verified",
            AccessEventType::PasswordReset => "password_reset",
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct AccessEvent {
    pub event_id: Uuid,
    pub org_id: Uuid,
    pub user_id: Uuid,
    pub event_type_code: String,
    pub ip_address: String,
    pub user_agent: String,
    pub country_code: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl AccessEvent {
    pub fn new(
        org_id: Uuid,
        user_id: Uuid,
        event_type: AccessEventType,
        ip_address: String,
        user_agent: String,
        country_code: Option<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            org_id,
            user_id,
            event_type_code: event_type.as_str().to_string(),
            ip_address,
            user_agent,
            country_code,
            created_utc: Utc::now(),
        }
    }
}
