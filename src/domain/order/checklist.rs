use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::value_objects::CartLine;

// ============================================================================
// Product Collection Checklist
// ============================================================================
//
// One entry per cart line, created once. Only the collected* fields change
// afterwards; the set of product ids is fixed.
//
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChecklistItem {
    pub product_id: Uuid,
    pub title: String,
    pub quantity: u32,
    pub collected: bool,
    pub collected_at: Option<DateTime<Utc>>,
    pub collected_by: Option<Uuid>,
    pub notes: Option<String>,
}

pub fn generate_checklist(cart: &[CartLine]) -> Vec<ChecklistItem> {
    cart.iter()
        .map(|line| ChecklistItem {
            product_id: line.product_id,
            title: line.title.clone(),
            quantity: line.quantity,
            collected: false,
            collected_at: None,
            collected_by: None,
            notes: None,
        })
        .collect()
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct DeliveryInfo {
    pub product_checklist: Vec<ChecklistItem>,
    pub all_items_collected: bool,
    pub assigned_driver: Option<Uuid>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub out_for_delivery_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub delivery_notes: Option<String>,
    pub collection_completed_at: Option<DateTime<Utc>>,
}

impl DeliveryInfo {
    pub fn contains(&self, product_id: Uuid) -> bool {
        self.product_checklist.iter().any(|item| item.product_id == product_id)
    }

    /// Titles of items still waiting to be collected
    pub fn uncollected(&self) -> Vec<String> {
        self.product_checklist
            .iter()
            .filter(|item| !item.collected)
            .map(|item| item.title.clone())
            .collect()
    }

    /// Update exactly one entry, then recompute the completion flag.
    /// Returns false if the product is not on the checklist.
    pub fn record_collection(
        &mut self,
        product_id: Uuid,
        collected: bool,
        collected_by: Option<Uuid>,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) -> bool {
        let Some(item) = self
            .product_checklist
            .iter_mut()
            .find(|item| item.product_id == product_id)
        else {
            return false;
        };

        item.collected = collected;
        if collected {
            item.collected_at = Some(at);
            item.collected_by = collected_by;
        } else {
            item.collected_at = None;
            item.collected_by = None;
        }
        if notes.is_some() {
            item.notes = notes;
        }

        self.recompute(at);
        true
    }

    fn recompute(&mut self, at: DateTime<Utc>) {
        self.all_items_collected = self.product_checklist.iter().all(|item| item.collected);
        if self.all_items_collected && self.collection_completed_at.is_none() {
            self.collection_completed_at = Some(at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal::Decimal;

    fn delivery_for(titles: &[&str]) -> (DeliveryInfo, Vec<Uuid>) {
        let cart: Vec<CartLine> = titles
            .iter()
            .map(|t| CartLine::new(Uuid::new_v4(), *t, 1, Decimal::ONE))
            .collect();
        let ids = cart.iter().map(|l| l.product_id).collect();
        let info = DeliveryInfo {
            product_checklist: generate_checklist(&cart),
            ..DeliveryInfo::default()
        };
        (info, ids)
    }

    #[test]
    fn test_generate_one_entry_per_line() {
        let (info, ids) = delivery_for(&["Milk", "Eggs", "Bread"]);
        assert_eq!(info.product_checklist.len(), 3);
        assert!(info.product_checklist.iter().all(|i| !i.collected));
        assert!(ids.iter().all(|id| info.contains(*id)));
    }

    #[test]
    fn test_completion_flips_on_last_item() {
        let (mut info, ids) = delivery_for(&["Milk", "Eggs"]);
        let driver = Uuid::new_v4();
        let now = Utc::now();

        assert!(info.record_collection(ids[0], true, Some(driver), None, now));
        assert!(!info.all_items_collected);
        assert_eq!(info.uncollected(), vec!["Eggs".to_string()]);

        assert!(info.record_collection(ids[1], true, Some(driver), None, now));
        assert!(info.all_items_collected);
        assert_eq!(info.collection_completed_at, Some(now));
    }

    #[test]
    fn test_completion_stamp_is_not_restamped() {
        let (mut info, ids) = delivery_for(&["Milk"]);
        let first = Utc::now();
        let later = first + Duration::minutes(5);

        info.record_collection(ids[0], true, None, None, first);
        info.record_collection(ids[0], false, None, Some("dented".into()), later);
        assert!(!info.all_items_collected);

        info.record_collection(ids[0], true, None, None, later);
        assert!(info.all_items_collected);
        assert_eq!(info.collection_completed_at, Some(first));
        assert_eq!(info.product_checklist[0].notes.as_deref(), Some("dented"));
    }

    #[test]
    fn test_unknown_product_changes_nothing() {
        let (mut info, _) = delivery_for(&["Milk"]);
        let before = info.clone();
        assert!(!info.record_collection(Uuid::new_v4(), true, None, None, Utc::now()));
        assert_eq!(info, before);
    }
}
