use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::CollaboratorError;
use crate::domain::order::CartLine;

/// Per-product stock levels
#[async_trait]
pub trait InventoryService: Send + Sync {
    /// Decrement stock for every line of a delivered order
    async fn adjust_stock(&self, order_id: Uuid, lines: &[CartLine]) -> Result<(), CollaboratorError>;

    /// Add the quantities of a cancelled order back
    async fn restore_stock(&self, order_id: Uuid, lines: &[CartLine]) -> Result<(), CollaboratorError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum StockMovement {
    Adjust,
    Restore,
}

#[derive(Default)]
struct Ledger {
    levels: HashMap<Uuid, i64>,
    applied: HashSet<(Uuid, StockMovement)>,
    failures_remaining: u32,
    reject: bool,
}

/// Process-local stock book. Each movement is applied at most once per order.
#[derive(Default)]
pub struct InMemoryInventory {
    ledger: Mutex<Ledger>,
}

impl InMemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_level(&self, product_id: Uuid, quantity: i64) {
        self.ledger.lock().await.levels.insert(product_id, quantity);
    }

    /// Unknown products read as zero
    pub async fn level(&self, product_id: Uuid) -> i64 {
        self.ledger.lock().await.levels.get(&product_id).copied().unwrap_or(0)
    }

    /// Make the next `count` calls fail as if the stock service were down
    pub async fn fail_next(&self, count: u32) {
        self.ledger.lock().await.failures_remaining = count;
    }

    /// Refuse every call until cleared
    pub async fn reject_all(&self, reject: bool) {
        self.ledger.lock().await.reject = reject;
    }

    async fn apply(
        &self,
        order_id: Uuid,
        movement: StockMovement,
        lines: &[CartLine],
    ) -> Result<(), CollaboratorError> {
        let mut ledger = self.ledger.lock().await;

        if ledger.reject {
            return Err(CollaboratorError::Rejected {
                service: "inventory",
                message: format!("stock service refused order {}", order_id),
            });
        }
        if ledger.failures_remaining > 0 {
            ledger.failures_remaining -= 1;
            return Err(CollaboratorError::Unavailable {
                service: "inventory",
                message: "stock service timed out".to_string(),
            });
        }

        if !ledger.applied.insert((order_id, movement)) {
            tracing::debug!(order_id = %order_id, movement = ?movement, "Stock movement already applied");
            return Ok(());
        }

        for line in lines {
            let delta = i64::from(line.quantity);
            let level = ledger.levels.entry(line.product_id).or_insert(0);
            match movement {
                StockMovement::Adjust => *level -= delta,
                StockMovement::Restore => *level += delta,
            }
        }

        Ok(())
    }
}

#[async_trait]
impl InventoryService for InMemoryInventory {
    async fn adjust_stock(&self, order_id: Uuid, lines: &[CartLine]) -> Result<(), CollaboratorError> {
        self.apply(order_id, StockMovement::Adjust, lines).await
    }

    async fn restore_stock(&self, order_id: Uuid, lines: &[CartLine]) -> Result<(), CollaboratorError> {
        self.apply(order_id, StockMovement::Restore, lines).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn test_adjust_and_restore_move_stock_once() {
        let inventory = InMemoryInventory::new();
        let flour = Uuid::new_v4();
        inventory.set_level(flour, 10).await;

        let order_id = Uuid::new_v4();
        let lines = vec![CartLine::new(flour, "Flour 2kg", 3, Decimal::new(350, 2))];

        inventory.adjust_stock(order_id, &lines).await.unwrap();
        inventory.adjust_stock(order_id, &lines).await.unwrap();
        assert_eq!(inventory.level(flour).await, 7);

        inventory.restore_stock(order_id, &lines).await.unwrap();
        assert_eq!(inventory.level(flour).await, 10);
    }

    #[tokio::test]
    async fn test_injected_failures_are_transient() {
        use crate::utils::IsTransient;

        let inventory = InMemoryInventory::new();
        inventory.fail_next(1).await;

        let lines = vec![CartLine::new(Uuid::new_v4(), "Salt", 1, Decimal::ONE)];
        let err = inventory.adjust_stock(Uuid::new_v4(), &lines).await.unwrap_err();
        assert!(err.is_transient());

        inventory.reject_all(true).await;
        let err = inventory.restore_stock(Uuid::new_v4(), &lines).await.unwrap_err();
        assert!(!err.is_transient());
    }
}
