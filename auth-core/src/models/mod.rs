pub mod access_event;
pub mod organization;
pub mod password_history;
pub mod rate_limit;
pub mod session;
pub mod user;

pub use access_event::{AccessEvent, AccessEventType};
pub use organization::{BruteForceAction, OrgFlags, Organization, PasswordPolicy};
pub use password_history::PasswordHistory;
pub use rate_limit::{RateKey, RateLimitCounter, RateLimitRule};
pub use session::{MfaState, Session};
pub use user::User;
