//! Rate-limit counter model and per-route rules.

use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Identity a counter is keyed by: the authenticated user if present,
/// otherwise the client address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateKey {
    User(Uuid),
    Client(String),
}

impl RateKey {
    /// Storage form, e.g. `user:<uuid>` / `ip:<addr>`.
    pub fn as_identity(&self) -> String {
        match self {
            RateKey::User(id) => format!("user:{id}"),
            RateKey::Client(addr) => format!("ip:{addr}"),
        }
    }
}

/// Fixed-window configuration for one protected route.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitRule {
    /// Max calls per bucket.
    pub limit: i64,
    /// Window after which an unexceeded counter naturally resets.
    pub bucket: Duration,
    /// Lockout duration once `limit` is exceeded, measured from the
    /// bucket's first call.
    pub jail_time: Duration,
}

/// Persisted counter for one (identity, route) pair.
#[derive(Debug, Clone, FromRow)]
pub struct RateLimitCounter {
    pub identity: String,
    pub route: String,
    pub call_count: i64,
    pub first_called_utc: DateTime<Utc>,
}

impl RateLimitCounter {
    pub fn first(identity: String, route: String, now: DateTime<Utc>) -> Self {
        Self {
            identity,
            route,
            call_count: 1,
            first_called_utc: now,
        }
    }
}
