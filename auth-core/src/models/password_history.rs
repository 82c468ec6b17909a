//! Password history - prior hashes retained for reuse detection.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// A superseded password hash. Retention is bounded by the organization's
/// configured reuse depth.
#[derive(Debug, Clone, FromRow)]
pub struct PasswordHistory {
    pub history_id: Uuid,
    pub user_id: Uuid,
    pub password_hash: String,
    pub superseded_utc: DateTime<Utc>,
}

impl PasswordHistory {
    pub fn new(user_id: Uuid, password_hash: String) -> Self {
        Self {
            history_id: Uuid::new_v4(),
            user_id,
            password_hash,
            superseded_utc: Utc::now(),
        }
    }
}
