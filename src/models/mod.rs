/*!
 * Models Module
 *
 * Domain entities for the dispensing workflow. Aggregates reference
 * each other by id only: a Fill carries its prescription id, a Claim
 * its fill id, a VerificationSession its fill id. No aggregate embeds
 * another.
 */

pub mod audit;
pub mod claim;
pub mod drug;
pub mod dur;
pub mod fill;
pub mod inventory;
pub mod patient;
pub mod pdmp;
pub mod prescription;
pub mod user;
pub mod verification;

pub use audit::{AuditEntry, AuditOutcome};
pub use claim::{CashConversion, Claim, ClaimRequest, ClaimResponse, ClaimStatus, RejectCode};
pub use drug::{DeaSchedule, Drug};
pub use dur::{DurAlert, DurCategory, DurOverride, DurResult, DurSeverity};
pub use fill::{DispenseRecord, Fill, FillStatus, LabelData};
pub use inventory::{InventoryItem, InventoryTransaction, TransactionType};
pub use patient::{Gender, HepaticFunction, InsurancePlan, Patient};
pub use pdmp::{PdmpAlert, PdmpAlertType, PdmpPrescription, PdmpQuery, PdmpResult, RiskLevel};
pub use prescription::{DawCode, Prescription, PrescriptionPriority, PrescriptionStatus, RxSource};
pub use user::{Actor, UserRole};
pub use verification::{Checklist, NdcMatch, SessionDecision, SessionState, VerificationSession};
