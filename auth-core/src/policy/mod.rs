//! Password policy engine.
//!
//! Pure checks over supplied data: strength validation against an
//! organization's configured rules, and reuse detection against retained
//! password history.

use crate::crypto::password::{verify_password, Password};
use crate::models::PasswordPolicy;

/// First failing rule for a candidate password. `message_key` is the stable
/// identifier the localization layer renders from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyViolation {
    TooShort { min_len: i32, actual: usize },
    TooLong { max_len: i32, actual: usize },
    MinLowercase { required: i32 },
    MinUppercase { required: i32 },
    MinNumeric { required: i32 },
    MinSpecial { required: i32 },
    RecentlyUsed { depth: i32 },
}

impl PolicyViolation {
    pub fn message_key(&self) -> &'static str {
        match self {
            PolicyViolation::TooShort { .. } => "password.too_short",
            PolicyViolation::TooLong { .. } => "password.too_long",
            PolicyViolation::MinLowercase { .. } => "password.min_lowercase",
            PolicyViolation::MinUppercase { .. } => "password.min_uppercase",
            PolicyViolation::MinNumeric { .. } => "password.min_numeric",
            PolicyViolation::MinSpecial { .. } => "password.min_special",
            PolicyViolation::RecentlyUsed { .. } => "password.reused",
        }
    }
}

impl std::fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyViolation::TooShort { min_len, actual } => {
                write!(
                    f,
                    "Password must be at least {} characters (got {})",
                    min_len, actual
                )
            }
            PolicyViolation::TooLong { max_len, actual } => {
                write!(
                    f,
                    "Password must be at most {} characters (got {})",
                    max_len, actual
                )
            }
            PolicyViolation::MinLowercase { required } => {
                write!(
                    f,
                    "Password must contain at least {} lowercase characters",
                    required
                )
            }
            PolicyViolation::MinUppercase { required } => {
                write!(
                    f,
                    "Password must contain at least {} uppercase characters",
                    required
                )
            }
            PolicyViolation::MinNumeric { required } => {
                write!(
                    f,
                    "Password must contain at least {} numeric characters",
                    required
                )
            }
            PolicyViolation::MinSpecial { required } => {
                write!(
                    f,
                    "Password must contain at least {} special characters",
                    required
                )
            }
            PolicyViolation::RecentlyUsed { depth } => {
                write!(
                    f,
                    "Password matches one of the last {} passwords",
                    depth
                )
            }
        }
    }
}

impl std::error::Error for PolicyViolation {}

/// Validate a candidate password against an organization's policy.
///
/// Checks run in order and short-circuit on the first failing rule: length
/// bounds, then minimum lowercase / uppercase / numeric / special counts.
pub fn validate_password(candidate: &str, policy: &PasswordPolicy) -> Result<(), PolicyViolation> {
    let len = candidate.chars().count();

    if len < policy.min_len as usize {
        return Err(PolicyViolation::TooShort {
            min_len: policy.min_len,
            actual: len,
        });
    }

    if let Some(max_len) = policy.max_len {
        if len > max_len as usize {
            return Err(PolicyViolation::TooLong {
                max_len,
                actual: len,
            });
        }
    }

    if policy.min_lowercase > 0 {
        let count = candidate.chars().filter(|c| c.is_ascii_lowercase()).count();
        if count < policy.min_lowercase as usize {
            return Err(PolicyViolation::MinLowercase {
                required: policy.min_lowercase,
            });
        }
    }

    if policy.min_uppercase > 0 {
        let count = candidate.chars().filter(|c| c.is_ascii_uppercase()).count();
        if count < policy.min_uppercase as usize {
            return Err(PolicyViolation::MinUppercase {
                required: policy.min_uppercase,
            });
        }
    }

    if policy.min_numeric > 0 {
        let count = candidate.chars().filter(|c| c.is_ascii_digit()).count();
        if count < policy.min_numeric as usize {
            return Err(PolicyViolation::MinNumeric {
                required: policy.min_numeric,
            });
        }
    }

    if policy.min_special > 0 {
        let count = candidate
            .chars()
            .filter(|c| policy.special_charset.contains(*c))
            .count();
        if count < policy.min_special as usize {
            return Err(PolicyViolation::MinSpecial {
                required: policy.min_special,
            });
        }
    }

    Ok(())
}

/// Reuse detection over retained history, most-recent-first.
///
/// Hashes are salted, so matching verifies the candidate plaintext against
/// each of the most recent `reuse_depth` hashes. `None` disables the check.
pub fn was_previously_used(
    candidate: &str,
    history_hashes: &[String],
    reuse_depth: Option<i32>,
) -> bool {
    let Some(depth) = reuse_depth else {
        return false;
    };

    let password = Password::new(candidate.to_string());
    history_hashes
        .iter()
        .take(depth.max(0) as usize)
        .any(|hash| verify_password(&password, hash).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::password::hash_password;

    fn strict_policy() -> PasswordPolicy {
        PasswordPolicy::default()
    }

    fn lenient_policy() -> PasswordPolicy {
        PasswordPolicy {
            min_len: 1,
            max_len: None,
            min_lowercase: 0,
            min_uppercase: 0,
            min_numeric: 0,
            min_special: 0,
            special_charset: "!@#".to_string(),
            reuse_depth: None,
            max_age_days: None,
        }
    }

    #[test]
    fn test_too_short() {
        let err = validate_password("Short1!", &strict_policy()).unwrap_err();
        assert!(matches!(err, PolicyViolation::TooShort { .. }));
        assert_eq!(err.message_key(), "password.too_short");
    }

    #[test]
    fn test_too_long() {
        let policy = PasswordPolicy {
            max_len: Some(16),
            ..strict_policy()
        };
        let err = validate_password("Aa1!Aa1!Aa1!Aa1!Aa1!", &policy).unwrap_err();
        assert!(matches!(err, PolicyViolation::TooLong { .. }));
    }

    #[test]
    fn test_checks_run_in_order() {
        // Missing both uppercase and numeric: the earlier rule reports.
        let err = validate_password("longenoughpass!!", &strict_policy()).unwrap_err();
        assert!(matches!(err, PolicyViolation::MinUppercase { .. }));
    }

    #[test]
    fn test_counted_rules() {
        let policy = PasswordPolicy {
            min_numeric: 3,
            ..strict_policy()
        };
        let err = validate_password("LongEnough12!pass", &policy).unwrap_err();
        assert!(matches!(err, PolicyViolation::MinNumeric { required: 3 }));
        assert!(validate_password("LongEnough123!pass", &policy).is_ok());
    }

    #[test]
    fn test_special_drawn_from_configured_set() {
        let policy = PasswordPolicy {
            special_charset: "#".to_string(),
            ..strict_policy()
        };
        // '!' is not special under this org's charset.
        let err = validate_password("LongEnough1pass!", &policy).unwrap_err();
        assert!(matches!(err, PolicyViolation::MinSpecial { .. }));
        assert!(validate_password("LongEnough1pass#", &policy).is_ok());
    }

    #[test]
    fn test_valid_password_strict() {
        assert!(validate_password("th3yIOp9!!pswYY#", &strict_policy()).is_ok());
    }

    #[test]
    fn test_lenient_policy_accepts_simple() {
        assert!(validate_password("simple", &lenient_policy()).is_ok());
    }

    #[test]
    fn test_reuse_within_depth_rejected() {
        let hashes: Vec<String> = ["first", "second", "third"]
            .iter()
            .map(|p| {
                hash_password(&Password::new((*p).to_string()))
                    .unwrap()
                    .into_string()
            })
            .collect();

        assert!(was_previously_used("second", &hashes, Some(3)));
        // Depth 1 only sees the most recent entry.
        assert!(!was_previously_used("second", &hashes, Some(1)));
        assert!(was_previously_used("first", &hashes, Some(1)));
    }

    #[test]
    fn test_reuse_disabled() {
        let hashes = vec![hash_password(&Password::new("pw".to_string()))
            .unwrap()
            .into_string()];
        assert!(!was_previously_used("pw", &hashes, None));
    }
}
