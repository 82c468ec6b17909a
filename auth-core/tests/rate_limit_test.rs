//! Rate limiting end to end: per-route gateway limits, brute-force lockout,
//! and the fixed-window/jail clock behavior driven through the store.

mod common;

use auth_core::error::AuthError;
use auth_core::models::{BruteForceAction, OrgFlags, PasswordPolicy, RateLimitRule};
use auth_core::services::RateDecision;
use auth_core::store::AuthStore;
use chrono::{Duration, Utc};
use common::{client, login_request, test_config, TestApp, STRONG_PASSWORD};

#[tokio::test]
async fn test_login_route_limits_by_client_ip() {
    let mut config = test_config();
    config.rate_limit.login_limit = 10;
    let app = TestApp::with_config(config);

    // Unknown account: only the per-IP counter is touched.
    for _ in 0..10 {
        let err = app
            .gateway
            .login(login_request("ghost@nowhere.test", "whatever1!"), &client())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Unauthorized));
    }

    let err = app
        .gateway
        .login(login_request("ghost@nowhere.test", "whatever1!"), &client())
        .await
        .unwrap_err();
    let AuthError::RateLimited { retry_after_ms } = err else {
        panic!("expected RateLimited, got {err:?}");
    };
    assert!(retry_after_ms > 0);
    assert!(retry_after_ms <= 3_600_000);

    // The structured body carries the retry hint.
    let body = AuthError::RateLimited { retry_after_ms }.to_body();
    assert_eq!(body.retry_after_ms, Some(retry_after_ms));
}

#[tokio::test]
async fn test_brute_force_lockout_on_account() {
    let app = TestApp::spawn();
    let org = app
        .create_org(
            "Strict",
            PasswordPolicy::default(),
            OrgFlags {
                brute_force_limit: 3,
                ..OrgFlags::default()
            },
        )
        .await;
    app.provision_user(&org, "victim@strict.test", STRONG_PASSWORD)
        .await;

    // Note: provisioning performs no login; three attempts fill the window.
    for _ in 0..3 {
        let err = app
            .gateway
            .login(login_request("victim@strict.test", "guess-wrong1!"), &client())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Unauthorized));
    }

    // Even the correct password is jailed now.
    let err = app
        .gateway
        .login(login_request("victim@strict.test", STRONG_PASSWORD), &client())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::RateLimited { .. }));
}

#[tokio::test]
async fn test_brute_force_log_only_does_not_block() {
    let app = TestApp::spawn();
    let org = app
        .create_org(
            "Lenient",
            PasswordPolicy::default(),
            OrgFlags {
                brute_force_limit: 2,
                brute_force_action: BruteForceAction::LogOnly,
                ..OrgFlags::default()
            },
        )
        .await;
    app.provision_user(&org, "watched@lenient.test", STRONG_PASSWORD)
        .await;

    for _ in 0..4 {
        let err = app
            .gateway
            .login(login_request("watched@lenient.test", "guess-wrong1!"), &client())
            .await
            .unwrap_err();
        // Exceeding the limit is logged, not enforced.
        assert!(matches!(err, AuthError::Unauthorized));
    }

    app.gateway
        .login(login_request("watched@lenient.test", STRONG_PASSWORD), &client())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_reset_request_route_is_limited() {
    let mut config = test_config();
    config.rate_limit.reset_limit = 2;
    let app = TestApp::with_config(config);

    for _ in 0..2 {
        app.gateway
            .request_password_reset(
                auth_core::dtos::PasswordResetRequest {
                    email: "anyone@t.test".to_string(),
                },
                &client(),
            )
            .await
            .unwrap();
    }

    let err = app
        .gateway
        .request_password_reset(
            auth_core::dtos::PasswordResetRequest {
                email: "anyone@t.test".to_string(),
            },
            &client(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::RateLimited { .. }));
}

#[tokio::test]
async fn test_fixed_window_clock_behavior() {
    let app = TestApp::spawn();
    let rule = RateLimitRule {
        limit: 10,
        bucket: Duration::hours(1),
        jail_time: Duration::hours(1),
    };
    let t0 = Utc::now();

    for _ in 0..10 {
        assert_eq!(
            app.store
                .apply_rate_limit("ip:203.0.113.5", "auth.login", &rule, t0)
                .await
                .unwrap(),
            RateDecision::Allowed
        );
    }

    // 11th call ten minutes in: rejected, retry-after is the remaining
    // fifty minutes of jail.
    let decision = app
        .store
        .apply_rate_limit("ip:203.0.113.5", "auth.login", &rule, t0 + Duration::minutes(10))
        .await
        .unwrap();
    assert_eq!(
        decision,
        RateDecision::Jailed {
            retry_after_ms: Duration::minutes(50).num_milliseconds() as u64
        }
    );

    // Once the jail has elapsed the counter resets and the call goes
    // through.
    let decision = app
        .store
        .apply_rate_limit(
            "ip:203.0.113.5",
            "auth.login",
            &rule,
            t0 + Duration::hours(1) + Duration::seconds(1),
        )
        .await
        .unwrap();
    assert_eq!(decision, RateDecision::Allowed);
    assert_eq!(
        app.store.counter("ip:203.0.113.5", "auth.login").unwrap().call_count,
        1
    );
}

#[tokio::test]
async fn test_bucket_expiry_resets_unexceeded_counter() {
    let app = TestApp::spawn();
    let rule = RateLimitRule {
        limit: 10,
        bucket: Duration::hours(1),
        jail_time: Duration::hours(1),
    };
    let t0 = Utc::now();

    for _ in 0..7 {
        app.store
            .apply_rate_limit("ip:203.0.113.9", "auth.login", &rule, t0)
            .await
            .unwrap();
    }

    // The limit was never exceeded, so a call after the window starts a
    // fresh bucket at count 1.
    let later = t0 + Duration::hours(1) + Duration::minutes(1);
    assert_eq!(
        app.store
            .apply_rate_limit("ip:203.0.113.9", "auth.login", &rule, later)
            .await
            .unwrap(),
        RateDecision::Allowed
    );
    let counter = app.store.counter("ip:203.0.113.9", "auth.login").unwrap();
    assert_eq!(counter.call_count, 1);
    assert_eq!(counter.first_called_utc, later);
}

#[tokio::test]
async fn test_separate_identities_do_not_share_counters() {
    let mut config = test_config();
    config.rate_limit.login_limit = 2;
    let app = TestApp::with_config(config);

    for _ in 0..2 {
        app.gateway
            .login(login_request("ghost@t.test", "x1!"), &client())
            .await
            .unwrap_err();
    }

    // A different client address is unaffected.
    let other = auth_core::dtos::ClientInfo {
        ip: "198.51.100.99".to_string(),
        user_agent: "integration-tests".to_string(),
    };
    let err = app
        .gateway
        .login(login_request("ghost@t.test", "x1!"), &other)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Unauthorized));
}
