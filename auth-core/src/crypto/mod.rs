pub mod envelope;
pub mod password;

pub use envelope::{EnvelopeCrypto, OrgKey};
pub use password::{dummy_hash, hash_password, verify_password, Password, PasswordHashString};
