/*!
 * Inventory Service
 *
 * Quantity bookkeeping over the append-only transaction log. Every
 * on-hand movement appends exactly one transaction with its signed
 * delta and running balance; the item snapshot is a cache the
 * reconcile pass can rebuild from the log.
 *
 * All mutations on a single (pharmacy, NDC) are serialized by a keyed
 * lock, so allocate -> dispense can never oversell. Read-only queries
 * go against the cached snapshot without the lock.
 *
 * Allocation bookkeeping (allocate/deallocate) only moves the
 * snapshot's `allocated` column; it does not touch on-hand and so
 * appends no transaction.
 */

use std::sync::Arc;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::models::inventory::{
    ExpiringItem, InventoryItem, InventoryTransaction, ReorderEntry, TransactionType,
};
use crate::models::user::Actor;
use crate::ports::{Clock, Store};
use crate::services::audit_log_service::AuditLogService;
use crate::utils::errors::{EngineError, Result};
use crate::utils::locks::LockRegistry;
use crate::utils::permissions::{self, Action, Resource};

/// Drift detected by a reconcile pass
#[derive(Debug, Clone, serde::Serialize)]
pub struct DriftEntry {
    pub ndc: String,
    pub snapshot_on_hand: f64,
    pub ledger_on_hand: f64,
    pub drift: f64,
}

/// Inventory ledger service
#[derive(Clone)]
pub struct InventoryService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    audit: AuditLogService,
    locks: Arc<LockRegistry>,
}

impl InventoryService {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        audit: AuditLogService,
        locks: Arc<LockRegistry>,
    ) -> Self {
        Self {
            store,
            clock,
            audit,
            locks,
        }
    }

    fn lock_key(pharmacy_id: Uuid, ndc: &str) -> String {
        format!("inv:{}:{}", pharmacy_id, ndc)
    }

    async fn load_item(&self, pharmacy_id: Uuid, ndc: &str) -> Result<InventoryItem> {
        self.store
            .get_inventory_item(pharmacy_id, ndc)
            .await?
            .ok_or_else(|| EngineError::not_found("inventory_item", ndc))
    }

    /// Reserve stock for a fill. Fails with `Oversold` when the
    /// available quantity is insufficient.
    pub async fn allocate(&self, pharmacy_id: Uuid, ndc: &str, quantity: f64) -> Result<InventoryItem> {
        let _guard = self.locks.acquire(&Self::lock_key(pharmacy_id, ndc)).await;
        let mut item = self.load_item(pharmacy_id, ndc).await?;
        if item.available() < quantity {
            return Err(EngineError::Oversold {
                ndc: ndc.to_string(),
                requested: quantity,
                available: item.available(),
            });
        }
        item.quantity_allocated += quantity;
        item.updated_at = self.clock.now();
        let saved = self.store.save_inventory_item(&item).await?;
        tracing::debug!(ndc, quantity, "allocated");
        Ok(saved)
    }

    /// Release a reservation
    pub async fn deallocate(&self, pharmacy_id: Uuid, ndc: &str, quantity: f64) -> Result<InventoryItem> {
        let _guard = self.locks.acquire(&Self::lock_key(pharmacy_id, ndc)).await;
        let mut item = self.load_item(pharmacy_id, ndc).await?;
        item.quantity_allocated = (item.quantity_allocated - quantity).max(0.0);
        item.updated_at = self.clock.now();
        let saved = self.store.save_inventory_item(&item).await?;
        tracing::debug!(ndc, quantity, "deallocated");
        Ok(saved)
    }

    /// Dispense against an allocation: decrements on-hand and
    /// allocated together and appends the `dispense` transaction.
    /// No audit row here; the calling hand-off operation audits once.
    pub(crate) async fn apply_dispense(
        &self,
        pharmacy_id: Uuid,
        ndc: &str,
        quantity: f64,
        fill_ref: &str,
        actor: &Actor,
    ) -> Result<InventoryItem> {
        let _guard = self.locks.acquire(&Self::lock_key(pharmacy_id, ndc)).await;
        let mut item = self.load_item(pharmacy_id, ndc).await?;
        if item.quantity_on_hand < quantity {
            return Err(EngineError::Oversold {
                ndc: ndc.to_string(),
                requested: quantity,
                available: item.quantity_on_hand,
            });
        }
        item.quantity_on_hand -= quantity;
        item.quantity_allocated = (item.quantity_allocated - quantity).max(0.0);
        item.updated_at = self.clock.now();

        self.append_tx(
            &item,
            TransactionType::Dispense,
            -quantity,
            Some(fill_ref.to_string()),
            None,
            actor,
            None,
        )
        .await?;
        self.store.save_inventory_item(&item).await
    }

    /// Port-level dispense operation (audited)
    pub async fn dispense(
        &self,
        pharmacy_id: Uuid,
        ndc: &str,
        quantity: f64,
        fill_ref: &str,
        actor: &Actor,
    ) -> Result<InventoryItem> {
        permissions::require(actor, Resource::Medication, Action::Update)?;
        let item = self.apply_dispense(pharmacy_id, ndc, quantity, fill_ref, actor).await?;
        self.audit
            .record(
                actor,
                "inventory.dispense",
                "inventory",
                ndc,
                false,
                serde_json::json!({ "quantity": quantity, "fill_ref": fill_ref }),
            )
            .await?;
        Ok(item)
    }

    /// Receive stock from a wholesaler order
    #[allow(clippy::too_many_arguments)]
    pub async fn receive(
        &self,
        pharmacy_id: Uuid,
        ndc: &str,
        drug_name: &str,
        quantity: f64,
        lot: &str,
        expiry: NaiveDate,
        cost_cents: i64,
        order_ref: &str,
        actor: &Actor,
    ) -> Result<InventoryItem> {
        permissions::require(actor, Resource::Medication, Action::Update)?;
        if quantity <= 0.0 {
            return Err(EngineError::invalid_field("quantity", "must be positive"));
        }
        let _guard = self.locks.acquire(&Self::lock_key(pharmacy_id, ndc)).await;

        let mut item = match self.store.get_inventory_item(pharmacy_id, ndc).await? {
            Some(item) => item,
            None => {
                let blank = InventoryItem {
                    pharmacy_id,
                    ndc: ndc.to_string(),
                    drug_name: drug_name.to_string(),
                    version: 0,
                    quantity_on_hand: 0.0,
                    quantity_allocated: 0.0,
                    reorder_point: 0.0,
                    par_level: 0.0,
                    lot_number: None,
                    lot_expiration: None,
                    acquisition_cost_cents: cost_cents,
                    controlled: false,
                    updated_at: self.clock.now(),
                };
                self.store.insert_inventory_item(&blank).await?
            }
        };

        item.quantity_on_hand += quantity;
        item.lot_number = Some(lot.to_string());
        item.lot_expiration = Some(expiry);
        item.acquisition_cost_cents = cost_cents;
        item.updated_at = self.clock.now();

        self.append_tx(
            &item,
            TransactionType::Receive,
            quantity,
            Some(order_ref.to_string()),
            None,
            actor,
            None,
        )
        .await?;
        let saved = self.store.save_inventory_item(&item).await?;
        self.audit
            .record(
                actor,
                "inventory.receive",
                "inventory",
                ndc,
                false,
                serde_json::json!({ "quantity": quantity, "lot": lot, "order_ref": order_ref }),
            )
            .await?;
        Ok(saved)
    }

    /// Return previously dispensed product to stock
    pub async fn return_to_stock(
        &self,
        pharmacy_id: Uuid,
        ndc: &str,
        quantity: f64,
        fill_ref: &str,
        actor: &Actor,
    ) -> Result<InventoryItem> {
        permissions::require(actor, Resource::Medication, Action::Update)?;
        let _guard = self.locks.acquire(&Self::lock_key(pharmacy_id, ndc)).await;
        let mut item = self.load_item(pharmacy_id, ndc).await?;
        item.quantity_on_hand += quantity;
        item.updated_at = self.clock.now();
        self.append_tx(
            &item,
            TransactionType::ReturnToStock,
            quantity,
            Some(fill_ref.to_string()),
            None,
            actor,
            None,
        )
        .await?;
        let saved = self.store.save_inventory_item(&item).await?;
        self.audit
            .record(
                actor,
                "inventory.return_to_stock",
                "inventory",
                ndc,
                false,
                serde_json::json!({ "quantity": quantity, "fill_ref": fill_ref }),
            )
            .await?;
        Ok(saved)
    }

    /// Manual adjustment. A downward adjustment of more than 10% of
    /// on-hand, or any adjustment on a controlled substance, requires
    /// a witness and documentation.
    pub async fn adjust(
        &self,
        pharmacy_id: Uuid,
        ndc: &str,
        delta: f64,
        reason: &str,
        witness: Option<&Actor>,
        actor: &Actor,
    ) -> Result<InventoryItem> {
        permissions::require(actor, Resource::Medication, Action::Update)?;
        if delta == 0.0 {
            return Err(EngineError::invalid_field("delta", "must be non-zero"));
        }
        let _guard = self.locks.acquire(&Self::lock_key(pharmacy_id, ndc)).await;
        let mut item = self.load_item(pharmacy_id, ndc).await?;

        let large_shrink =
            delta < 0.0 && item.quantity_on_hand > 0.0 && -delta > item.quantity_on_hand * 0.10;
        if (large_shrink || item.controlled) && witness.is_none() {
            return Err(EngineError::NotAuthorized(
                "adjustment requires a witness".to_string(),
            ));
        }
        if (large_shrink || item.controlled) && reason.trim().len() < 10 {
            return Err(EngineError::invalid_field(
                "reason",
                "witnessed adjustments require documentation of at least 10 characters",
            ));
        }
        if reason.trim().is_empty() {
            return Err(EngineError::MissingRequired("reason".to_string()));
        }
        if item.quantity_on_hand + delta < 0.0 {
            return Err(EngineError::invalid_field(
                "delta",
                "adjustment would drive on-hand negative",
            ));
        }

        item.quantity_on_hand += delta;
        item.updated_at = self.clock.now();

        let tx_type = if delta > 0.0 {
            TransactionType::AdjustUp
        } else {
            TransactionType::AdjustDown
        };
        self.append_tx(
            &item,
            tx_type,
            delta,
            None,
            Some(reason.to_string()),
            actor,
            witness.map(|w| w.id),
        )
        .await?;
        let saved = self.store.save_inventory_item(&item).await?;
        self.audit
            .record(
                actor,
                "inventory.adjust",
                "inventory",
                ndc,
                false,
                serde_json::json!({
                    "delta": delta,
                    "witnessed": witness.is_some(),
                }),
            )
            .await?;
        Ok(saved)
    }

    /// Record a physical count; writes the signed difference
    pub async fn cycle_count(
        &self,
        pharmacy_id: Uuid,
        ndc: &str,
        observed: f64,
        actor: &Actor,
    ) -> Result<InventoryItem> {
        permissions::require(actor, Resource::Medication, Action::Update)?;
        if observed < 0.0 {
            return Err(EngineError::invalid_field("observed", "cannot be negative"));
        }
        let _guard = self.locks.acquire(&Self::lock_key(pharmacy_id, ndc)).await;
        let mut item = self.load_item(pharmacy_id, ndc).await?;
        let delta = observed - item.quantity_on_hand;
        item.quantity_on_hand = observed;
        item.updated_at = self.clock.now();
        self.append_tx(
            &item,
            TransactionType::CycleCount,
            delta,
            None,
            Some("cycle count".to_string()),
            actor,
            None,
        )
        .await?;
        let saved = self.store.save_inventory_item(&item).await?;
        self.audit
            .record(
                actor,
                "inventory.cycle_count",
                "inventory",
                ndc,
                false,
                serde_json::json!({ "observed": observed, "delta": delta }),
            )
            .await?;
        Ok(saved)
    }

    async fn append_tx(
        &self,
        item: &InventoryItem,
        transaction_type: TransactionType,
        delta: f64,
        reference: Option<String>,
        reason: Option<String>,
        actor: &Actor,
        witness_id: Option<Uuid>,
    ) -> Result<()> {
        let tx = InventoryTransaction {
            id: Uuid::new_v4(),
            pharmacy_id: item.pharmacy_id,
            ndc: item.ndc.clone(),
            transaction_type,
            delta,
            running_balance: item.quantity_on_hand,
            reference,
            reason,
            actor_id: actor.id,
            witness_id,
            occurred_at: self.clock.now(),
        };
        self.store.append_inventory_transaction(&tx).await
    }

    /// Items at or below their reorder point, most urgent first
    pub async fn reorder_list(&self, pharmacy_id: Uuid) -> Result<Vec<ReorderEntry>> {
        let items = self.store.list_inventory_items(pharmacy_id).await?;
        let mut entries: Vec<ReorderEntry> = items
            .iter()
            .filter(|item| item.needs_reorder())
            .map(|item| ReorderEntry {
                ndc: item.ndc.clone(),
                drug_name: item.drug_name.clone(),
                available: item.available(),
                reorder_point: item.reorder_point,
                par_level: item.par_level,
                priority: item.reorder_priority(),
                order_quantity: item.order_quantity(),
            })
            .collect();
        entries.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.ndc.cmp(&b.ndc)));
        Ok(entries)
    }

    /// Items expiring within `within_days` (default surveillance: 90)
    pub async fn expiring_items(
        &self,
        pharmacy_id: Uuid,
        within_days: i64,
    ) -> Result<Vec<ExpiringItem>> {
        let today = self.clock.today();
        let horizon = today + chrono::Duration::days(within_days);
        let items = self.store.list_inventory_items(pharmacy_id).await?;
        let mut entries: Vec<ExpiringItem> = items
            .iter()
            .filter_map(|item| {
                let expiration = item.lot_expiration?;
                if expiration > horizon {
                    return None;
                }
                Some(ExpiringItem {
                    ndc: item.ndc.clone(),
                    drug_name: item.drug_name.clone(),
                    lot_number: item.lot_number.clone(),
                    expiration,
                    days_until_expiration: (expiration - today).num_days(),
                    is_expired: expiration < today,
                    quantity_on_hand: item.quantity_on_hand,
                })
            })
            .collect();
        entries.sort_by_key(|e| e.expiration);
        Ok(entries)
    }

    /// Rebuild every snapshot from the transaction log; returns the
    /// drift observed before correction.
    pub async fn reconcile(&self, pharmacy_id: Uuid, actor: &Actor) -> Result<Vec<DriftEntry>> {
        permissions::require(actor, Resource::Medication, Action::Update)?;
        let items = self.store.list_inventory_items(pharmacy_id).await?;
        let mut drift_report = Vec::new();

        for item in items {
            let _guard = self
                .locks
                .acquire(&Self::lock_key(pharmacy_id, &item.ndc))
                .await;
            let log = self
                .store
                .list_inventory_transactions(pharmacy_id, &item.ndc)
                .await?;
            let ledger_on_hand: f64 = log.iter().map(|tx| tx.delta).sum();
            // Re-read under the lock; the unlocked listing may be stale
            let mut current = self.load_item(pharmacy_id, &item.ndc).await?;
            let drift = current.quantity_on_hand - ledger_on_hand;
            if drift.abs() > f64::EPSILON {
                drift_report.push(DriftEntry {
                    ndc: current.ndc.clone(),
                    snapshot_on_hand: current.quantity_on_hand,
                    ledger_on_hand,
                    drift,
                });
                current.quantity_on_hand = ledger_on_hand;
                current.updated_at = self.clock.now();
                self.store.save_inventory_item(&current).await?;
            }
        }

        self.audit
            .record(
                actor,
                "inventory.reconcile",
                "inventory",
                pharmacy_id,
                false,
                serde_json::json!({ "drift_items": drift_report.len() }),
            )
            .await?;
        Ok(drift_report)
    }
}
