/*!
 * Inventory Model
 *
 * The transaction log is the source of truth; the item snapshot is a
 * cache recomputed from the log. Every mutation appends exactly one
 * transaction carrying the signed delta and the running balance.
 *
 * Invariant: available = on_hand - allocated >= 0.
 */

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Inventory movement type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Receive,
    Dispense,
    ReturnToStock,
    ReturnToWholesaler,
    AdjustUp,
    AdjustDown,
    TransferIn,
    TransferOut,
    CycleCount,
}

impl TransactionType {
    /// Sign convention for on-hand deltas
    pub fn is_credit(&self) -> bool {
        matches!(
            self,
            Self::Receive | Self::ReturnToStock | Self::AdjustUp | Self::TransferIn
        )
    }
}

/// Append-only inventory event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryTransaction {
    pub id: Uuid,
    pub pharmacy_id: Uuid,
    pub ndc: String,
    pub transaction_type: TransactionType,
    /// Signed on-hand delta
    pub delta: f64,
    /// On-hand balance after this event
    pub running_balance: f64,
    /// Fill, order, or adjustment id this event references
    pub reference: Option<String>,
    pub reason: Option<String>,
    pub actor_id: Uuid,
    /// Second signature for witnessed adjustments
    pub witness_id: Option<Uuid>,
    pub occurred_at: DateTime<Utc>,
}

/// Cached inventory snapshot for one (pharmacy, NDC)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryItem {
    pub pharmacy_id: Uuid,
    pub ndc: String,
    pub drug_name: String,
    pub version: i64,

    pub quantity_on_hand: f64,
    pub quantity_allocated: f64,

    pub reorder_point: f64,
    pub par_level: f64,

    pub lot_number: Option<String>,
    pub lot_expiration: Option<NaiveDate>,
    pub acquisition_cost_cents: i64,
    pub controlled: bool,

    pub updated_at: DateTime<Utc>,
}

impl InventoryItem {
    pub fn available(&self) -> f64 {
        self.quantity_on_hand - self.quantity_allocated
    }

    /// Reorder urgency: 10 out of stock, 9 below 25% of the reorder
    /// point, 7 below 50%, 5 at/below the point, 3 otherwise
    pub fn reorder_priority(&self) -> u8 {
        let available = self.available();
        if available <= 0.0 {
            10
        } else if available < self.reorder_point * 0.25 {
            9
        } else if available < self.reorder_point * 0.5 {
            7
        } else if available <= self.reorder_point {
            5
        } else {
            3
        }
    }

    /// Suggested order quantity to restore par
    pub fn order_quantity(&self) -> f64 {
        (self.par_level - self.available()).max(0.0)
    }

    pub fn needs_reorder(&self) -> bool {
        self.available() <= self.reorder_point
    }
}

/// Entry in the expiry surveillance report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpiringItem {
    pub ndc: String,
    pub drug_name: String,
    pub lot_number: Option<String>,
    pub expiration: NaiveDate,
    pub days_until_expiration: i64,
    pub is_expired: bool,
    pub quantity_on_hand: f64,
}

/// Entry in the reorder worklist
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReorderEntry {
    pub ndc: String,
    pub drug_name: String,
    pub available: f64,
    pub reorder_point: f64,
    pub par_level: f64,
    pub priority: u8,
    pub order_quantity: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(on_hand: f64, allocated: f64, reorder_point: f64) -> InventoryItem {
        InventoryItem {
            pharmacy_id: Uuid::new_v4(),
            ndc: "00071015523".into(),
            drug_name: "Lisinopril 10mg".into(),
            version: 0,
            quantity_on_hand: on_hand,
            quantity_allocated: allocated,
            reorder_point,
            par_level: reorder_point * 3.0,
            lot_number: None,
            lot_expiration: None,
            acquisition_cost_cents: 450,
            controlled: false,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_available() {
        assert_eq!(item(100.0, 30.0, 50.0).available(), 70.0);
    }

    #[test]
    fn test_reorder_priority_bands() {
        assert_eq!(item(0.0, 0.0, 100.0).reorder_priority(), 10);
        assert_eq!(item(20.0, 0.0, 100.0).reorder_priority(), 9);
        assert_eq!(item(40.0, 0.0, 100.0).reorder_priority(), 7);
        assert_eq!(item(100.0, 0.0, 100.0).reorder_priority(), 5);
        assert_eq!(item(150.0, 0.0, 100.0).reorder_priority(), 3);
    }

    #[test]
    fn test_order_quantity_restores_par() {
        let i = item(40.0, 10.0, 100.0);
        // par 300, available 30
        assert_eq!(i.order_quantity(), 270.0);
    }

    #[test]
    fn test_credit_sign_convention() {
        assert!(TransactionType::Receive.is_credit());
        assert!(TransactionType::ReturnToStock.is_credit());
        assert!(!TransactionType::Dispense.is_credit());
        assert!(!TransactionType::AdjustDown.is_credit());
    }
}
