//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use auth_core::config::{
    CookieConfig, CoreConfig, CryptoConfig, DatabaseConfig, Environment, RateLimitConfig,
    SessionConfig,
};
use auth_core::dtos::{ClientInfo, LoginRequest, PasswordResetConfirm};
use auth_core::models::{OrgFlags, Organization, PasswordPolicy, User};
use auth_core::services::reset::ResetNotifier;
use auth_core::services::{AuthGateway, NoopGeo};
use auth_core::store::{AuthStore, MemoryAuthStore};
use totp_rs::{Algorithm, Secret, TOTP};

/// Captures issued reset tokens instead of emailing them.
#[derive(Default)]
pub struct RecordingNotifier {
    pub deliveries: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl ResetNotifier for RecordingNotifier {
    async fn deliver_reset_token(&self, email: &str, token: &str) -> Result<(), anyhow::Error> {
        self.deliveries
            .lock()
            .unwrap()
            .push((email.to_string(), token.to_string()));
        Ok(())
    }
}

impl RecordingNotifier {
    pub fn last_token_for(&self, email: &str) -> Option<String> {
        self.deliveries
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(to, _)| to == email)
            .map(|(_, token)| token.clone())
    }

    pub fn delivery_count(&self) -> usize {
        self.deliveries.lock().unwrap().len()
    }
}

pub fn test_config() -> CoreConfig {
    CoreConfig {
        environment: Environment::Dev,
        service_name: "auth-core-test".to_string(),
        log_level: "debug".to_string(),
        database: DatabaseConfig {
            url: "postgres://localhost/unused".to_string(),
            max_connections: 5,
            min_connections: 1,
        },
        crypto: CryptoConfig::Sealed {
            master_key: [7u8; 32],
        },
        session: SessionConfig {
            token_issuer: "auth-core-test".to_string(),
            default_interval_secs: 3600,
            reset_token_ttl_secs: 259_200,
        },
        rate_limit: RateLimitConfig {
            login_limit: 100,
            login_bucket_secs: 3600,
            login_jail_secs: 3600,
            mfa_limit: 100,
            mfa_bucket_secs: 900,
            mfa_jail_secs: 900,
            reset_limit: 100,
            reset_bucket_secs: 3600,
            reset_jail_secs: 3600,
        },
        cookie: CookieConfig {
            name: "org".to_string(),
            secure: false,
        },
        external_call_timeout: StdDuration::from_secs(5),
    }
}

/// In-process application: gateway over the in-memory store.
pub struct TestApp {
    pub gateway: AuthGateway,
    pub store: Arc<MemoryAuthStore>,
    pub notifier: Arc<RecordingNotifier>,
}

impl TestApp {
    pub fn spawn() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: CoreConfig) -> Self {
        let store = Arc::new(MemoryAuthStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let crypto = auth_core::crypto::EnvelopeCrypto::new(&config.crypto);

        let gateway = AuthGateway::new(
            store.clone(),
            crypto,
            notifier.clone(),
            Arc::new(NoopGeo),
            &config,
        );

        TestApp {
            gateway,
            store,
            notifier,
        }
    }

    pub async fn create_org(
        &self,
        name: &str,
        policy: PasswordPolicy,
        flags: OrgFlags,
    ) -> Organization {
        self.gateway
            .create_organization(name.to_string(), policy, flags)
            .await
            .expect("Failed to create organization")
    }

    /// Invite a user and complete the reset flow so the account has a
    /// usable password.
    pub async fn provision_user(&self, org: &Organization, email: &str, password: &str) -> User {
        let (_, token) = self
            .gateway
            .invite_user(org, email.to_string())
            .await
            .expect("Failed to invite user");

        self.gateway
            .complete_password_reset(
                PasswordResetConfirm {
                    token,
                    new_password: password.to_string(),
                },
                &client(),
            )
            .await
            .expect("Failed to complete provisioning reset");

        self.store
            .find_user_by_email(email)
            .await
            .unwrap()
            .expect("Provisioned user missing")
    }
}

pub fn client() -> ClientInfo {
    ClientInfo {
        ip: "198.51.100.7".to_string(),
        user_agent: "integration-tests".to_string(),
    }
}

pub fn login_request(email: &str, password: &str) -> LoginRequest {
    LoginRequest {
        email: email.to_string(),
        password: password.to_string(),
    }
}

/// Generate the code an authenticator app would show right now.
pub fn totp_code(secret_base32: &str) -> String {
    let totp = TOTP::new(
        Algorithm::SHA1,
        6,
        1,
        30,
        Secret::Encoded(secret_base32.to_string())
            .to_bytes()
            .unwrap(),
        Some("auth-core-test".to_string()),
        "tester".to_string(),
    )
    .unwrap();
    totp.generate_current().unwrap()
}

pub const STRONG_PASSWORD: &str = "th3yIOp9!!pswYY#";
