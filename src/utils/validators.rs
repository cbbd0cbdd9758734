// Validation utilities for prescription data
// Field-level checks shared by intake, data entry, and fill validation

use chrono::NaiveDate;

use crate::utils::errors::{EngineError, Result};
use crate::utils::ndc::normalize_ndc;

/// Validate a DAW (Dispense-As-Written) code; legal range 0-9
pub fn validate_daw(daw: i16) -> Result<()> {
    if (0..=9).contains(&daw) {
        return Ok(());
    }
    Err(EngineError::invalid_field(
        "daw_code",
        format!("must be 0-9, got {}", daw),
    ))
}

/// Validate a dispensable quantity
pub fn validate_quantity(quantity: f64) -> Result<()> {
    if quantity > 0.0 && quantity.is_finite() && quantity <= 10_000.0 {
        return Ok(());
    }
    Err(EngineError::invalid_field(
        "quantity",
        "must be a positive number no greater than 10000",
    ))
}

/// Validate a days-supply value
pub fn validate_days_supply(days: i32) -> Result<()> {
    if (1..=365).contains(&days) {
        return Ok(());
    }
    Err(EngineError::invalid_field(
        "days_supply",
        "must be between 1 and 365",
    ))
}

/// Validate sig text: present and within label-printable length
pub fn validate_sig(sig: &str) -> Result<()> {
    let trimmed = sig.trim();
    if trimmed.is_empty() {
        return Err(EngineError::MissingRequired("sig".to_string()));
    }
    if trimmed.len() > 500 {
        return Err(EngineError::invalid_field("sig", "exceeds 500 characters"));
    }
    Ok(())
}

/// Validate an NDC in any accepted written form
pub fn validate_ndc(ndc: &str) -> Result<String> {
    normalize_ndc(ndc)
        .ok_or_else(|| EngineError::invalid_field("ndc", "not a valid 10- or 11-digit NDC"))
}

/// Validate that an expiration postdates the written date
pub fn validate_expiration(written: NaiveDate, expiration: NaiveDate) -> Result<()> {
    if expiration > written {
        return Ok(());
    }
    Err(EngineError::invalid_field(
        "expiration_date",
        "must be after the written date",
    ))
}

/// Validate a free-text override reason (documentation requirement)
pub fn validate_override_reason(reason: &str) -> Result<()> {
    if reason.trim().len() >= 10 {
        return Ok(());
    }
    Err(EngineError::invalid_field(
        "reason",
        "override reason must be at least 10 characters",
    ))
}

/// Validate a member/cardholder id for claim submission
pub fn validate_member_id(member_id: &str) -> Result<()> {
    let trimmed = member_id.trim();
    if trimmed.is_empty() || trimmed.len() > 20 {
        return Err(EngineError::invalid_field(
            "member_id",
            "must be 1-20 characters",
        ));
    }
    if !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(EngineError::invalid_field(
            "member_id",
            "must be alphanumeric",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daw_range() {
        assert!(validate_daw(0).is_ok());
        assert!(validate_daw(9).is_ok());
        assert!(validate_daw(10).is_err());
        assert!(validate_daw(-1).is_err());
    }

    #[test]
    fn test_quantity() {
        assert!(validate_quantity(30.0).is_ok());
        assert!(validate_quantity(0.5).is_ok());
        assert!(validate_quantity(0.0).is_err());
        assert!(validate_quantity(-5.0).is_err());
        assert!(validate_quantity(f64::NAN).is_err());
    }

    #[test]
    fn test_sig() {
        assert!(validate_sig("Take 1 tablet by mouth daily").is_ok());
        assert!(validate_sig("  ").is_err());
        assert!(validate_sig(&"x".repeat(501)).is_err());
    }

    #[test]
    fn test_expiration_after_written() {
        let written = NaiveDate::from_ymd_opt(2026, 1, 15).unwrap();
        assert!(validate_expiration(written, written.succ_opt().unwrap()).is_ok());
        assert!(validate_expiration(written, written).is_err());
    }

    #[test]
    fn test_override_reason_length() {
        assert!(validate_override_reason("Prescriber consulted").is_ok());
        assert!(validate_override_reason("too short").is_err());
    }
}
