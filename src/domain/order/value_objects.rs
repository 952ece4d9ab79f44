use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Order Value Objects
// ============================================================================

fn default_pack_qty() -> u32 {
    1
}

/// One line of the customer's cart, validated at the boundary
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CartLine {
    pub product_id: Uuid,
    pub title: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    #[serde(default = "default_pack_qty")]
    pub pack_qty: u32,
    #[serde(default)]
    pub unit_name: Option<String>,
}

impl CartLine {
    pub fn new(product_id: Uuid, title: impl Into<String>, quantity: u32, unit_price: Decimal) -> Self {
        Self {
            product_id,
            title: title.into(),
            quantity,
            unit_price,
            pack_qty: 1,
            unit_name: None,
        }
    }

    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct OrderTotals {
    pub sub_total: Decimal,
    pub shipping_cost: Decimal,
    pub discount: Decimal,
    pub loyalty_discount: Decimal,
    pub loyalty_points_used: i64,
    pub total: Decimal,
}

impl OrderTotals {
    pub fn compute(
        cart: &[CartLine],
        shipping_cost: Decimal,
        discount: Decimal,
        loyalty_points_used: i64,
        loyalty_discount: Decimal,
    ) -> Self {
        let sub_total: Decimal = cart.iter().map(CartLine::line_total).sum();
        Self {
            sub_total,
            shipping_cost,
            discount,
            loyalty_discount,
            loyalty_points_used,
            total: sub_total + shipping_cost - discount - loyalty_discount,
        }
    }

    /// Amount that earns loyalty points on delivery
    pub fn qualifying_amount(&self) -> Decimal {
        self.sub_total + self.shipping_cost - self.discount
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Received,
    Pending,
    Processing,
    #[serde(rename = "Out for Delivery")]
    OutForDelivery,
    Delivered,
    #[serde(rename = "Cancel")]
    Cancelled,
}

impl OrderStatus {
    pub fn label(&self) -> &'static str {
        match self {
            OrderStatus::Received => "Received",
            OrderStatus::Pending => "Pending",
            OrderStatus::Processing => "Processing",
            OrderStatus::OutForDelivery => "Out for Delivery",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Cancelled => "Cancel",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Directed edges of the lifecycle
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        match (self, next) {
            (Received, Pending) => true,
            (Pending, Processing) => true,
            (Processing, OutForDelivery) => true,
            (OutForDelivery, Delivered) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelledBy {
    Admin,
    Customer,
}

/// Who is asking for an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requester {
    Admin,
    Customer(Uuid),
    Driver(Uuid),
}

// ============================================================================
// Unit Tests
// ============================================================================
