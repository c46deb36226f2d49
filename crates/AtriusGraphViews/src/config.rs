//! Engine configuration.

use crate::ViewError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use uuid::Uuid;

static NUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]+$").expect("numeric pattern is valid"));

/// Which patient identifiers the engine accepts.
///
/// Identifiers are always matched exactly; the policy only decides which ones
/// are rejected before a traversal is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdPolicy {
    /// Any non-blank string.
    #[default]
    Opaque,
    /// A UUID in any form [`Uuid::parse_str`] accepts, or a string of ASCII digits.
    UuidOrNumeric,
}

impl IdPolicy {
    pub fn validate(&self, patient_id: &str) -> Result<(), ViewError> {
        if patient_id.trim().is_empty() {
            return Err(ViewError::Validation(
                "patient id must not be empty".to_string(),
            ));
        }
        match self {
            IdPolicy::Opaque => Ok(()),
            IdPolicy::UuidOrNumeric => {
                if Uuid::parse_str(patient_id).is_ok() || NUMERIC.is_match(patient_id) {
                    Ok(())
                } else {
                    Err(ViewError::Validation(
                        "patient id must be a valid UUID or a string containing only numbers"
                            .to_string(),
                    ))
                }
            }
        }
    }
}

/// Engine configuration options
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Deadline for one view request, retries included
    pub deadline: Duration,
    /// Extra attempts after a transient failure
    pub retry_attempts: u32,
    /// Base delay between attempts; attempt `n` waits `n * retry_backoff`
    pub retry_backoff: Duration,
    /// Patient id acceptance rule
    pub id_policy: IdPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(30),
            retry_attempts: 2,
            retry_backoff: Duration::from_millis(100),
            id_policy: IdPolicy::Opaque,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.deadline, Duration::from_secs(30));
        assert_eq!(config.retry_attempts, 2);
        assert_eq!(config.retry_backoff, Duration::from_millis(100));
        assert_eq!(config.id_policy, IdPolicy::Opaque);
    }

    #[test]
    fn test_opaque_policy() {
        assert!(IdPolicy::Opaque.validate("patient-123").is_ok());
        assert!(IdPolicy::Opaque.validate("o'brien\"; --").is_ok());
        assert!(matches!(IdPolicy::Opaque.validate(""), Err(ViewError::Validation(_))));
        assert!(matches!(IdPolicy::Opaque.validate(" \t"), Err(ViewError::Validation(_))));
    }

    #[test]
    fn test_uuid_or_numeric_policy() {
        let policy = IdPolicy::UuidOrNumeric;
        assert!(policy.validate("008288897179").is_ok());
        assert!(policy.validate("5d3c4a2e-8b1f-4c6d-9e7a-0f1b2c3d4e5f").is_ok());
        assert!(policy.validate("5D3C4A2E8B1F4C6D9E7A0F1B2C3D4E5F").is_ok());
        assert!(policy.validate("{5d3c4a2e-8b1f-4c6d-9e7a-0f1b2c3d4e5f}").is_ok());
        assert!(policy.validate("urn:uuid:5d3c4a2e-8b1f-4c6d-9e7a-0f1b2c3d4e5f").is_ok());

        for invalid in ["patient123", "12 34", "-1", "5d3c4a2e-8b1f-4c6d-9e7a", "{5d3c4a2e}", ""] {
            assert!(
                matches!(policy.validate(invalid), Err(ViewError::Validation(_))),
                "{} should be rejected",
                invalid
            );
        }
    }
}
