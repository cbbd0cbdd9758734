//! Permission Checking Helpers
//!
//! Role/permission matrix over engine resources plus helpers services
//! call before any mutating operation. Patient access is additionally
//! scoped: a patient may read only records whose patient id equals
//! their own user id.

use uuid::Uuid;

use crate::models::user::{Actor, UserRole};
use crate::utils::errors::{EngineError, Result};

/// Resources guarded by the permission matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Patient,
    Encounter,
    Observation,
    Medication,
    Fhir,
    AuditLog,
    User,
    Settings,
    Report,
    Billing,
}

/// Actions over a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
}

/// Whether `role` may perform `action` on `resource`
pub fn is_allowed(role: &UserRole, resource: Resource, action: Action) -> bool {
    use Action::*;
    use Resource::*;

    match role {
        UserRole::Admin => true,
        UserRole::Doctor => match resource {
            Patient | Encounter | Observation | Medication | Fhir => true,
            Report => matches!(action, Create | Read),
            Billing => matches!(action, Create | Read),
            Settings => matches!(action, Read),
            AuditLog | User => false,
        },
        UserRole::Nurse => match resource {
            Patient | Encounter => matches!(action, Read | Update),
            Observation => matches!(action, Create | Read | Update),
            Medication => matches!(action, Read | Update),
            Fhir => matches!(action, Read),
            Settings => matches!(action, Read),
            AuditLog | User | Report | Billing => false,
        },
        UserRole::Patient => match resource {
            // Row-level scoping is applied separately via can_read_own
            Patient | Encounter | Observation | Medication | Fhir | Billing => {
                matches!(action, Read)
            }
            AuditLog | User | Settings | Report => false,
        },
        UserRole::User => match resource {
            Settings => matches!(action, Read),
            _ => false,
        },
    }
}

/// Require a permission, returning `NotAuthorized` when absent
pub fn require(actor: &Actor, resource: Resource, action: Action) -> Result<()> {
    if is_allowed(&actor.role, resource, action) {
        return Ok(());
    }
    Err(EngineError::NotAuthorized(format!(
        "role {:?} may not {:?} {:?}",
        actor.role, action, resource
    )))
}

/// Patient-scoped read check: a PATIENT role actor may read only
/// records belonging to their own patient id.
pub fn can_read_patient_record(actor: &Actor, record_patient_id: Uuid) -> bool {
    match actor.role {
        UserRole::Patient => actor.id == record_patient_id,
        _ => is_allowed(&actor.role, Resource::Patient, Action::Read),
    }
}

/// Require patient-scoped access
pub fn require_patient_record(actor: &Actor, record_patient_id: Uuid) -> Result<()> {
    if can_read_patient_record(actor, record_patient_id) {
        return Ok(());
    }
    Err(EngineError::NotAuthorized(
        "patients may only read their own records".to_string(),
    ))
}

/// DUR overrides and verification decisions require a licensed
/// pharmacist regardless of the role matrix.
pub fn require_pharmacist(actor: &Actor) -> Result<()> {
    if actor.is_pharmacist() {
        return Ok(());
    }
    Err(EngineError::NotAuthorized(
        "operation requires a licensed pharmacist".to_string(),
    ))
}
