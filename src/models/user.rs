/*!
 * User & Actor Model
 *
 * Roles gate every mutating operation through the permission matrix.
 * Pharmacist licensure is carried separately from the role: final
 * verification and DUR overrides require a license on file, whatever
 * the actor's role row grants.
 */

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User role enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Admin,
    Doctor,
    Nurse,
    Patient,
    /// Default low-privilege role
    User,
}

impl Default for UserRole {
    fn default() -> Self {
        UserRole::User
    }
}

/// The authenticated principal performing an operation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    /// Display name, used in audit rows
    pub name: String,
    pub role: UserRole,
    /// State board license number when the actor is a pharmacist
    pub pharmacist_license: Option<String>,
}

impl Actor {
    pub fn new(name: impl Into<String>, role: UserRole) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            role,
            pharmacist_license: None,
        }
    }

    /// Build a pharmacist actor (doctor-level grants plus licensure)
    pub fn pharmacist(name: impl Into<String>, license: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            role: UserRole::Doctor,
            pharmacist_license: Some(license.into()),
        }
    }

    pub fn is_pharmacist(&self) -> bool {
        self.pharmacist_license
            .as_deref()
            .map(|license| !license.trim().is_empty())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_role_is_user() {
        assert_eq!(UserRole::default(), UserRole::User);
    }

    #[test]
    fn test_pharmacist_requires_nonempty_license() {
        let rph = Actor::pharmacist("Dana", "RPH-100");
        assert!(rph.is_pharmacist());

        let mut blank = Actor::new("Kim", UserRole::Doctor);
        blank.pharmacist_license = Some("  ".into());
        assert!(!blank.is_pharmacist());
    }
}
