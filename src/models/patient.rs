/*!
 * Patient Model
 *
 * Clinical profile consumed by the DUR engine: allergies, conditions,
 * pregnancy/nursing status, renal and hepatic function. Referenced by
 * id from prescriptions; never embedded.
 */

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Gender enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Gender {
    Male,
    Female,
    Other,
    Unknown,
}

/// Hepatic function status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HepaticFunction {
    Normal,
    MildImpairment,
    ModerateImpairment,
    SevereImpairment,
}

/// Pharmacy benefit plan on file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InsurancePlan {
    pub bin: String,
    pub pcn: String,
    pub group_id: String,
    pub member_id: String,
}

/// Patient model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub version: i64,
    /// Medical record number, unique within the pharmacy
    pub mrn: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub gender: Gender,
    pub address: Option<String>,
    pub phone: Option<String>,

    /// Known allergies (free-text substance names)
    pub allergies: Vec<String>,
    /// Active condition / problem list
    pub conditions: Vec<String>,
    pub pregnant: bool,
    pub nursing: bool,
    /// Creatinine clearance in mL/min, when on file
    pub creatinine_clearance: Option<f64>,
    pub hepatic_function: HepaticFunction,

    pub insurance: Option<InsurancePlan>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Patient {
    /// Age in whole years at `on` (used for pediatric/geriatric rules)
    pub fn age_on(&self, on: NaiveDate) -> i32 {
        let mut age = on.years_since(self.date_of_birth).unwrap_or(0) as i32;
        if self.date_of_birth > on {
            age = 0;
        }
        age
    }

    /// MRN + DOB identity used for intake patient matching
    pub fn matches_identity(&self, mrn: &str, dob: NaiveDate) -> bool {
        self.mrn.eq_ignore_ascii_case(mrn.trim()) && self.date_of_birth == dob
    }
}

/// Patient creation request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreatePatientRequest {
    #[validate(length(min = 1, max = 20, message = "MRN must be 1-20 characters"))]
    pub mrn: String,
    #[validate(length(min = 1, max = 100, message = "First name must be 1-100 characters"))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100, message = "Last name must be 1-100 characters"))]
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub gender: Gender,
    pub address: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub allergies: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patient(dob: NaiveDate) -> Patient {
        Patient {
            id: Uuid::new_v4(),
            version: 0,
            mrn: "MRN-001".into(),
            first_name: "Ada".into(),
            last_name: "Nguyen".into(),
            date_of_birth: dob,
            gender: Gender::Female,
            address: None,
            phone: None,
            allergies: vec![],
            conditions: vec![],
            pregnant: false,
            nursing: false,
            creatinine_clearance: None,
            hepatic_function: HepaticFunction::Normal,
            insurance: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_age_on() {
        let p = patient(NaiveDate::from_ymd_opt(1960, 6, 15).unwrap());
        let before_birthday = NaiveDate::from_ymd_opt(2026, 6, 14).unwrap();
        let after_birthday = NaiveDate::from_ymd_opt(2026, 6, 15).unwrap();
        assert_eq!(p.age_on(before_birthday), 65);
        assert_eq!(p.age_on(after_birthday), 66);
    }

    #[test]
    fn test_identity_match_is_case_insensitive() {
        let dob = NaiveDate::from_ymd_opt(1990, 1, 2).unwrap();
        let p = patient(dob);
        assert!(p.matches_identity("mrn-001", dob));
        assert!(!p.matches_identity("MRN-001", dob.succ_opt().unwrap()));
    }
}
