pub mod gateway;
pub mod geo;
pub mod mfa;
pub mod rate_limit;
pub mod reset;
pub mod session;
pub mod token;

pub use gateway::{provision_organization, AuthContext, AuthGateway, LoginOutcome};
pub use geo::{GeoLookup, NoopGeo};
pub use mfa::{MfaManager, MfaSetup};
pub use rate_limit::{RateDecision, RateLimiter};
pub use reset::{NoopNotifier, PasswordResetFlow, ResetNotifier};
pub use session::SessionManager;
pub use token::{SessionTokenClaims, SessionTokenService};
