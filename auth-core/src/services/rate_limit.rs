//! Per-route rate limiting with jail/backoff semantics.
//!
//! Fixed-window on purpose: bursts at window boundaries are accepted in
//! exchange for O(1) storage per (identity, route) pair. The decision logic
//! is a pure function; stores execute it under their own atomicity (row lock
//! or entry lock) so concurrent calls from one identity never under-count.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::AuthError;
use crate::models::{BruteForceAction, RateKey, RateLimitCounter, RateLimitRule};
use crate::store::AuthStore;

/// Route names of the protected call sites.
pub mod routes {
    pub const LOGIN: &str = "auth.login";
    pub const MFA: &str = "auth.mfa";
    pub const RESET_REQUEST: &str = "auth.reset.request";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Jailed { retry_after_ms: u64 },
}

/// What the store should persist after a decision.
#[derive(Debug, Clone)]
pub enum CounterUpdate {
    Put(RateLimitCounter),
    Keep,
}

/// One call against the counter for (identity, route).
///
/// Bucket expiry and jail expiry are two independent checks, bucket first:
/// an unexceeded counter whose window has elapsed resets naturally; an
/// exceeded counter can only leave jail through the jail check. The call
/// that crosses the limit is itself rejected and recorded as the violation;
/// later jailed calls are rejected without touching the counter.
pub fn decide(
    existing: Option<&RateLimitCounter>,
    identity: &str,
    route: &str,
    rule: &RateLimitRule,
    now: DateTime<Utc>,
) -> (RateDecision, CounterUpdate) {
    let fresh = || {
        CounterUpdate::Put(RateLimitCounter::first(
            identity.to_string(),
            route.to_string(),
            now,
        ))
    };

    let Some(counter) = existing else {
        return (RateDecision::Allowed, fresh());
    };

    // Bucket window elapsed and the limit was never exceeded.
    if now - counter.first_called_utc > rule.bucket && counter.call_count <= rule.limit {
        return (RateDecision::Allowed, fresh());
    }

    let jail_ends = counter.first_called_utc + rule.jail_time;

    // Already jailed.
    if counter.call_count > rule.limit {
        if now < jail_ends {
            let retry_after_ms = (jail_ends - now).num_milliseconds().max(0) as u64;
            return (RateDecision::Jailed { retry_after_ms }, CounterUpdate::Keep);
        }
        return (RateDecision::Allowed, fresh());
    }

    let mut updated = counter.clone();
    updated.call_count += 1;

    // This call crosses the limit: record the violation and reject.
    if updated.call_count > rule.limit {
        let retry_after_ms = (jail_ends - now).num_milliseconds().max(0) as u64;
        return (
            RateDecision::Jailed { retry_after_ms },
            CounterUpdate::Put(updated),
        );
    }

    (RateDecision::Allowed, CounterUpdate::Put(updated))
}

/// Store-backed limiter used by the gateway.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn AuthStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn AuthStore>) -> Self {
        Self { store }
    }

    /// Count one call; `Err(RateLimited)` once the route's limit is exceeded.
    pub async fn check(
        &self,
        key: &RateKey,
        route: &str,
        rule: &RateLimitRule,
    ) -> Result<(), AuthError> {
        match self
            .store
            .apply_rate_limit(&key.as_identity(), route, rule, Utc::now())
            .await?
        {
            RateDecision::Allowed => Ok(()),
            RateDecision::Jailed { retry_after_ms } => {
                tracing::warn!(
                    identity = %key.as_identity(),
                    route = %route,
                    retry_after_ms,
                    "rate limit exceeded"
                );
                Err(AuthError::RateLimited { retry_after_ms })
            }
        }
    }

    /// Like `check`, but honoring the organization's brute-force action:
    /// `LogOnly` degrades rejection to a warning.
    pub async fn check_with_action(
        &self,
        key: &RateKey,
        route: &str,
        rule: &RateLimitRule,
        action: BruteForceAction,
    ) -> Result<(), AuthError> {
        match self.check(key, route, rule).await {
            Err(AuthError::RateLimited { retry_after_ms }) if action == BruteForceAction::LogOnly => {
                tracing::warn!(
                    identity = %key.as_identity(),
                    route = %route,
                    retry_after_ms,
                    "brute-force limit exceeded, action is log-only"
                );
                Ok(())
            }
            other => other,
        }
    }
}
