pub mod auth;

pub use auth::{
    ClientInfo, CookieSpec, LoginRequest, LoginResponse, MfaChallengeRequest,
    PasswordResetConfirm, PasswordResetRequest, ResetRequestedResponse, SameSite,
};
