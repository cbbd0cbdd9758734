/*!
 * Error Handling
 *
 * Defines the engine-wide error taxonomy. Errors never carry PHI in
 * their display text: messages reference field names, codes, and
 * resource identifiers only.
 *
 * Categories:
 * - Validation: malformed input, missing required field, illegal transition
 * - Policy: role/permission failures, controlled-substance calendar rules
 * - Safety: unacknowledged DUR alerts, NDC mismatch, expired stock
 * - Conflict: stale versions, duplicate fills, over-allocation
 * - Transient: timeouts and connection failures on external ports (retried)
 * - External: a provider returned a final error
 * - System: unreachable store, corrupted snapshot
 */

use thiserror::Error;

/// Engine result type
pub type Result<T> = std::result::Result<T, EngineError>;

/// Coarse error category used for propagation decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Policy,
    Safety,
    Conflict,
    Transient,
    External,
    System,
}

/// Engine error types
#[derive(Debug, Error)]
pub enum EngineError {
    /// A field failed validation
    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: String, reason: String },

    /// A required field is absent
    #[error("missing required field `{0}`")]
    MissingRequired(String),

    /// The requested state transition is not legal from the current state
    #[error("invalid transition from `{from}` to `{to}`")]
    InvalidTransition { from: String, to: String },

    /// The actor's role does not permit the operation
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// The alert or reject code cannot be overridden
    #[error("override not permitted for `{0}`")]
    NonOverridable(String),

    /// Schedule II prescriptions cannot be refilled
    #[error("Schedule II prescriptions cannot be refilled")]
    ScheduleIiRefill,

    /// A safety gate is holding the operation; carries triggering alert codes
    #[error("safety hold on {resource}: unresolved alerts {codes:?}")]
    SafetyHold { resource: String, codes: Vec<String> },

    /// Optimistic version check failed
    #[error("concurrent mutation detected on {resource} {id}")]
    ConcurrentMutation { resource: String, id: String },

    /// A fill with this number already exists for the prescription
    #[error("duplicate fill number {0}")]
    DuplicateFill(i32),

    /// Allocation would exceed available inventory
    #[error("insufficient inventory for NDC {ndc}: requested {requested}, available {available}")]
    Oversold {
        ndc: String,
        requested: f64,
        available: f64,
    },

    /// An external port call timed out
    #[error("external call to {0} timed out")]
    ExternalTimeout(String),

    /// An external port is unreachable
    #[error("external service {0} unavailable")]
    ExternalUnavailable(String),

    /// An external provider returned a final error
    #[error("external reject from {service}: {code}")]
    ExternalReject { service: String, code: String },

    /// Referenced resource does not exist
    #[error("{resource} {id} not found")]
    NotFound { resource: String, id: String },

    /// Store failure or corrupted state
    #[error("system failure: {0}")]
    SystemFailure(String),
}

impl EngineError {
    /// Category of this error, used to decide retry vs. surface
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidField { .. } | Self::MissingRequired(_) | Self::InvalidTransition { .. } => {
                ErrorCategory::Validation
            }
            Self::NotAuthorized(_) | Self::NonOverridable(_) | Self::ScheduleIiRefill => {
                ErrorCategory::Policy
            }
            Self::SafetyHold { .. } => ErrorCategory::Safety,
            Self::ConcurrentMutation { .. } | Self::DuplicateFill(_) | Self::Oversold { .. } => {
                ErrorCategory::Conflict
            }
            Self::ExternalTimeout(_) | Self::ExternalUnavailable(_) => ErrorCategory::Transient,
            Self::ExternalReject { .. } => ErrorCategory::External,
            Self::NotFound { .. } => ErrorCategory::Validation,
            Self::SystemFailure(_) => ErrorCategory::System,
        }
    }

    /// Transient errors are retried locally with backoff
    pub fn is_transient(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    /// Convenience constructor for not-found errors
    pub fn not_found(resource: &str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            resource: resource.to_string(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for stale-version conflicts
    pub fn stale(resource: &str, id: impl std::fmt::Display) -> Self {
        Self::ConcurrentMutation {
            resource: resource.to_string(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for field validation failures
    pub fn invalid_field(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// User-facing text after transient retry exhaustion
    pub fn user_message(&self) -> String {
        match self.category() {
            ErrorCategory::Transient => {
                "temporarily unavailable — please retry".to_string()
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_mapping() {
        assert_eq!(
            EngineError::MissingRequired("sig".into()).category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            EngineError::ScheduleIiRefill.category(),
            ErrorCategory::Policy
        );
        assert_eq!(
            EngineError::SafetyHold {
                resource: "fill".into(),
                codes: vec!["DDI-001".into()]
            }
            .category(),
            ErrorCategory::Safety
        );
        assert_eq!(
            EngineError::ExternalTimeout("claim_switch".into()).category(),
            ErrorCategory::Transient
        );
    }

    #[test]
    fn test_transient_detection() {
        assert!(EngineError::ExternalUnavailable("pdmp".into()).is_transient());
        assert!(!EngineError::ScheduleIiRefill.is_transient());
    }

    #[test]
    fn test_user_message_for_transient() {
        let err = EngineError::ExternalTimeout("claim_switch".into());
        assert_eq!(err.user_message(), "temporarily unavailable — please retry");
    }

    #[test]
    fn test_safety_hold_display_lists_codes() {
        let err = EngineError::SafetyHold {
            resource: "fill".into(),
            codes: vec!["DDI-014".into(), "MME-090".into()],
        };
        let text = err.to_string();
        assert!(text.contains("DDI-014"));
        assert!(text.contains("MME-090"));
    }
}
