use serde::{Deserialize, Serialize};
use validator::Validate;

/// Caller context forwarded by the request layer.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub ip: String,
    pub user_agent: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub mfa_enabled: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct MfaChallengeRequest {
    #[validate(length(min = 6, max = 6, message = "Code must be 6 digits"))]
    pub code: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PasswordResetRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PasswordResetConfirm {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub new_password: String,
}

/// The response for a reset request is constant whether or not the account
/// exists.
#[derive(Debug, Serialize)]
pub struct ResetRequestedResponse {
    pub message: String,
}

impl Default for ResetRequestedResponse {
    fn default() -> Self {
        Self {
            message: "If the account exists, a reset link has been sent. Please check your email."
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// Tenant cookie parameters for the request layer to set. The cookie
/// resolves the organization; the bearer token resolves the session within
/// it. The two lookup keys stay separate on purpose.
#[derive(Debug, Clone)]
pub struct CookieSpec {
    pub name: String,
    pub value: String,
    pub http_only: bool,
    pub same_site: SameSite,
    pub secure: bool,
    pub max_age_secs: i64,
}
