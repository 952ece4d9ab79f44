use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use super::commands::CustomerCommand;
use super::config::LoyaltyConfig;
use super::errors::LoyaltyError;
use super::events::*;
use super::value_objects::{
    LoyaltyPoints, LoyaltyTransaction, PurchaseStats, TransactionStatus, TransactionType,
};
use crate::event_sourcing::core::Aggregate;

// ============================================================================
// Customer Aggregate - Loyalty Ledger
// ============================================================================
//
// The ledger rows are the source of truth; `points` is the running balance
// folded from them. Balance rules per posted row:
//
//   earned/bonus  +p   current +p, total +p
//   redeemed      -p   current -p, used  +p
//   refund        +p   current +p, used  -p   (redemption given back)
//   refund        -p   current -p, total -p   (earned points revoked)
//   expired       -p   current -p
//
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomerAggregate {
    pub customer_id: Uuid,
    pub version: i64,
    pub points: LoyaltyPoints,
    pub stats: PurchaseStats,
    pub transactions: Vec<LoyaltyTransaction>,
    pub opened_at: DateTime<Utc>,
    /// Orders already counted by an award
    awarded_orders: HashSet<Uuid>,
}

/// Builds ledger rows against a running balance so `balance_after` is exact
/// even when one command posts several rows.
struct Posting<'a> {
    customer_id: Uuid,
    running: LoyaltyPoints,
    at: DateTime<Utc>,
    events: &'a mut Vec<CustomerEvent>,
}

impl Posting<'_> {
    fn post(
        &mut self,
        kind: TransactionType,
        points: i64,
        description: String,
        order_id: Option<Uuid>,
        expiry_date: Option<DateTime<Utc>>,
    ) {
        self.running.post(kind, points);
        self.events.push(CustomerEvent::TransactionPosted(LoyaltyTransaction {
            id: Uuid::new_v4(),
            customer_id: self.customer_id,
            kind,
            points,
            description,
            order_id,
            balance_after: self.running.current,
            expiry_date,
            status: TransactionStatus::Active,
            created_at: self.at,
        }));
    }

    fn flip(&mut self, transaction_id: Uuid, status: TransactionStatus) {
        self.events.push(CustomerEvent::TransactionStatusChanged(TransactionStatusChanged {
            transaction_id,
            status,
            at: self.at,
        }));
    }
}

impl CustomerAggregate {
    fn empty(customer_id: Uuid, opened_at: DateTime<Utc>) -> Self {
        Self {
            customer_id,
            version: 0,
            points: LoyaltyPoints::default(),
            stats: PurchaseStats::default(),
            transactions: Vec::new(),
            opened_at,
            awarded_orders: HashSet::new(),
        }
    }

    fn posting<'a>(&self, at: DateTime<Utc>, events: &'a mut Vec<CustomerEvent>) -> Posting<'a> {
        Posting {
            customer_id: self.customer_id,
            running: self.points,
            at,
            events,
        }
    }

    pub fn has_award_for(&self, order_id: Uuid) -> bool {
        self.awarded_orders.contains(&order_id)
    }

    /// Points redeemed for an order that have not been given back yet
    pub fn outstanding_redemption(&self, order_id: Uuid) -> i64 {
        self.transactions
            .iter()
            .filter(|tx| tx.order_id == Some(order_id))
            .filter_map(|tx| match tx.kind {
                TransactionType::Redeemed => Some(-tx.points),
                TransactionType::Refund if tx.points > 0 => Some(-tx.points),
                _ => None,
            })
            .sum()
    }

    /// Replay the ledger and compare with the running balance
    pub fn reconcile(&self) -> Result<LoyaltyPoints, LoyaltyError> {
        let replayed = LoyaltyPoints::replay(&self.transactions);
        if replayed != self.points {
            return Err(LoyaltyError::LedgerDrift {
                stored: self.points,
                replayed,
            });
        }
        Ok(replayed)
    }

    fn award(&self, order_id: Uuid, amount: Decimal, at: DateTime<Utc>) -> Result<Vec<CustomerEvent>, LoyaltyError> {
        if amount < Decimal::ZERO {
            return Err(LoyaltyError::InvalidAmount(format!("negative purchase amount {}", amount)));
        }
        if self.has_award_for(order_id) {
            return Ok(vec![]);
        }

        let config = LoyaltyConfig::default();
        let base = config.base_points(amount);
        let bonus = config.bonus_tier(amount);
        let expiry = Some(at + Duration::days(config.points_expiry_days));

        let mut events = Vec::new();
        let mut posting = self.posting(at, &mut events);
        if base > 0 {
            posting.post(
                TransactionType::Earned,
                base,
                format!("Earned {} points for order {}", base, order_id),
                Some(order_id),
                expiry,
            );
        }
        if let Some(tier) = bonus {
            posting.post(
                TransactionType::Bonus,
                tier.points,
                format!("Bonus {} points for order over {}", tier.points, tier.threshold),
                Some(order_id),
                expiry,
            );
        }

        events.push(CustomerEvent::PurchaseRecorded(PurchaseRecorded { order_id, amount, at }));
        Ok(events)
    }

    fn redeem(&self, points: i64, order_id: Option<Uuid>, at: DateTime<Utc>) -> Result<Vec<CustomerEvent>, LoyaltyError> {
        let config = LoyaltyConfig::default();
        if points < config.minimum_redemption {
            return Err(LoyaltyError::BelowMinimumRedemption {
                requested: points,
                minimum: config.minimum_redemption,
            });
        }
        if points > self.points.current {
            return Err(LoyaltyError::InsufficientPoints {
                requested: points,
                available: self.points.current,
            });
        }

        let mut events = Vec::new();
        self.posting(at, &mut events).post(
            TransactionType::Redeemed,
            -points,
            format!("Redeemed {} points for {} discount", points, config.discount_for(points)),
            order_id,
            None,
        );
        Ok(events)
    }

    fn expire(&self, at: DateTime<Utc>) -> Vec<CustomerEvent> {
        let mut events = Vec::new();
        let mut posting = self.posting(at, &mut events);

        let due: Vec<&LoyaltyTransaction> = self
            .transactions
            .iter()
            .filter(|tx| tx.is_expirable_at(at))
            .collect();

        for tx in due {
            posting.flip(tx.id, TransactionStatus::Expired);
            // Never expire more than is still redeemable
            let deduction = tx.points.min(posting.running.current).max(0);
            if deduction > 0 {
                posting.post(
                    TransactionType::Expired,
                    -deduction,
                    format!("{} points expired", deduction),
                    tx.order_id,
                    None,
                );
            }
        }

        events
    }

    fn restore_redeemed(&self, order_id: Uuid, points: i64, at: DateTime<Utc>) -> Result<Vec<CustomerEvent>, LoyaltyError> {
        if points <= 0 {
            return Err(LoyaltyError::InvalidPoints(points));
        }

        let restorable = points.min(self.outstanding_redemption(order_id));
        if restorable <= 0 {
            return Ok(vec![]);
        }

        let mut events = Vec::new();
        self.posting(at, &mut events).post(
            TransactionType::Refund,
            restorable,
            format!("Refund of {} redeemed points from cancelled order {}", restorable, order_id),
            Some(order_id),
            None,
        );
        Ok(events)
    }

    fn remove_earned(&self, order_id: Uuid, at: DateTime<Utc>) -> Vec<CustomerEvent> {
        let mut events = Vec::new();
        let mut posting = self.posting(at, &mut events);

        for tx in self.transactions.iter().filter(|tx| {
            tx.order_id == Some(order_id) && tx.kind.is_accrual() && tx.status == TransactionStatus::Active
        }) {
            posting.flip(tx.id, TransactionStatus::Used);
            posting.post(
                TransactionType::Refund,
                -tx.points,
                format!("Removed {} {} points from cancelled order {}", tx.points, tx.kind.as_str(), order_id),
                Some(order_id),
                None,
            );
        }

        events
    }
}

// ============================================================================
// Aggregate Trait Implementation
// ============================================================================

impl Aggregate for CustomerAggregate {
    type Event = CustomerEvent;
    type Command = CustomerCommand;
    type Error = LoyaltyError;

    const AGGREGATE_TYPE: &'static str = "Customer";

    fn apply_first_event(aggregate_id: Uuid, event: &Self::Event) -> Result<Self, Self::Error> {
        match event {
            CustomerEvent::AccountOpened(e) => Ok(Self::empty(aggregate_id, e.opened_at)),
            _ => Err(LoyaltyError::NotInitialized),
        }
    }

    fn apply_event(&mut self, event: &Self::Event) -> Result<(), Self::Error> {
        match event {
            CustomerEvent::AccountOpened(_) => return Err(LoyaltyError::AccountAlreadyOpen),
            CustomerEvent::TransactionPosted(tx) => {
                self.points.post(tx.kind, tx.points);
                self.transactions.push(tx.clone());
            }
            CustomerEvent::TransactionStatusChanged(e) => {
                if let Some(tx) = self.transactions.iter_mut().find(|tx| tx.id == e.transaction_id) {
                    tx.status = e.status;
                }
            }
            CustomerEvent::PurchaseRecorded(e) => {
                self.stats.record(e.amount);
                self.awarded_orders.insert(e.order_id);
            }
        }
        Ok(())
    }

    fn handle_command(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CustomerCommand::OpenAccount { .. } => Ok(vec![]),
            CustomerCommand::AwardPoints { order_id, amount, at } => self.award(*order_id, *amount, *at),
            CustomerCommand::RedeemPoints { points, order_id, at } => self.redeem(*points, *order_id, *at),
            CustomerCommand::ExpirePoints { at } => Ok(self.expire(*at)),
            CustomerCommand::RestoreRedeemedPoints { order_id, points, at } => {
                self.restore_redeemed(*order_id, *points, *at)
            }
            CustomerCommand::RemoveEarnedPoints { order_id, at } => Ok(self.remove_earned(*order_id, *at)),
        }
    }

    /// First command on a customer opens the account implicitly
    fn handle_new(aggregate_id: Uuid, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        let at = match command {
            CustomerCommand::OpenAccount { at }
            | CustomerCommand::AwardPoints { at, .. }
            | CustomerCommand::RedeemPoints { at, .. }
            | CustomerCommand::ExpirePoints { at }
            | CustomerCommand::RestoreRedeemedPoints { at, .. }
            | CustomerCommand::RemoveEarnedPoints { at, .. } => *at,
        };

        let mut events = vec![CustomerEvent::AccountOpened(LoyaltyAccountOpened { opened_at: at })];
        events.extend(Self::empty(aggregate_id, at).handle_command(command)?);
        Ok(events)
    }

    fn aggregate_id(&self) -> Uuid {
        self.customer_id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn set_version(&mut self, version: i64) {
        self.version = version;
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> CustomerAggregate {
        CustomerAggregate::empty(Uuid::new_v4(), Utc::now())
    }

    fn run(account: &mut CustomerAggregate, command: CustomerCommand) -> Result<Vec<CustomerEvent>, LoyaltyError> {
        let events = account.handle_command(&command)?;
        for event in &events {
            account.apply_event(event)?;
        }
        Ok(events)
    }

    fn award(account: &mut CustomerAggregate, order_id: Uuid, amount: i64) {
        run(account, CustomerCommand::AwardPoints {
            order_id,
            amount: Decimal::from(amount),
            at: Utc::now(),
        })
        .unwrap();
    }

    #[test]
    fn test_award_uses_highest_tier_only() {
        let mut acct = account();
        award(&mut acct, Uuid::new_v4(), 1000);

        let kinds: Vec<(TransactionType, i64)> = acct.transactions.iter().map(|t| (t.kind, t.points)).collect();
        assert_eq!(kinds, vec![(TransactionType::Earned, 1000), (TransactionType::Bonus, 150)]);
        assert_eq!(acct.points, LoyaltyPoints { current: 1150, total: 1150, used: 0 });
        assert_eq!(acct.transactions[1].balance_after, 1150);
        assert!(acct.transactions.iter().all(|t| t.expiry_date.is_some()));
        assert_eq!(acct.stats.order_count, 1);
    }

    #[test]
    fn test_award_is_idempotent_per_order() {
        let mut acct = account();
        let order_id = Uuid::new_v4();
        award(&mut acct, order_id, 250);
        let events = run(&mut acct, CustomerCommand::AwardPoints {
            order_id,
            amount: Decimal::from(250),
            at: Utc::now(),
        })
        .unwrap();

        assert!(events.is_empty());
        assert_eq!(acct.points.current, 250);
        assert_eq!(acct.stats.order_count, 1);
    }

    #[test]
    fn test_small_award_posts_only_base_row() {
        let mut acct = account();
        award(&mut acct, Uuid::new_v4(), 250);
        assert_eq!(acct.transactions.len(), 1);
        assert_eq!(acct.transactions[0].kind, TransactionType::Earned);
    }

    #[test]
    fn test_redemption_bounds() {
        let mut acct = account();
        award(&mut acct, Uuid::new_v4(), 300);

        let below = run(&mut acct, CustomerCommand::RedeemPoints { points: 99, order_id: None, at: Utc::now() });
        assert_eq!(below, Err(LoyaltyError::BelowMinimumRedemption { requested: 99, minimum: 100 }));

        let over = run(&mut acct, CustomerCommand::RedeemPoints { points: 301, order_id: None, at: Utc::now() });
        assert_eq!(over, Err(LoyaltyError::InsufficientPoints { requested: 301, available: 300 }));

        run(&mut acct, CustomerCommand::RedeemPoints { points: 300, order_id: None, at: Utc::now() }).unwrap();
        assert_eq!(acct.points, LoyaltyPoints { current: 0, total: 300, used: 300 });
        assert_eq!(acct.transactions.last().unwrap().balance_after, 0);
    }

    #[test]
    fn test_restore_redeemed_points_once() {
        let mut acct = account();
        let order_id = Uuid::new_v4();
        award(&mut acct, Uuid::new_v4(), 500);
        run(&mut acct, CustomerCommand::RedeemPoints { points: 120, order_id: Some(order_id), at: Utc::now() }).unwrap();
        let total_before = acct.points.total;

        run(&mut acct, CustomerCommand::RestoreRedeemedPoints { order_id, points: 120, at: Utc::now() }).unwrap();
        assert_eq!(acct.points.current, 550);
        assert_eq!(acct.points.used, 0);
        assert_eq!(acct.points.total, total_before);

        let again = run(&mut acct, CustomerCommand::RestoreRedeemedPoints { order_id, points: 120, at: Utc::now() }).unwrap();
        assert!(again.is_empty());
        assert_eq!(acct.points.current, 550);
    }

    #[test]
    fn test_restore_without_redemption_is_noop() {
        let mut acct = account();
        let events = run(&mut acct, CustomerCommand::RestoreRedeemedPoints {
            order_id: Uuid::new_v4(),
            points: 120,
            at: Utc::now(),
        })
        .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_remove_earned_points_revokes_rows() {
        let mut acct = account();
        let order_id = Uuid::new_v4();
        award(&mut acct, order_id, 600);

        run(&mut acct, CustomerCommand::RemoveEarnedPoints { order_id, at: Utc::now() }).unwrap();

        assert_eq!(acct.points, LoyaltyPoints { current: 0, total: 0, used: 0 });
        let accruals: Vec<&LoyaltyTransaction> = acct.transactions.iter().filter(|t| t.kind.is_accrual()).collect();
        assert!(accruals.iter().all(|t| t.status == TransactionStatus::Used));
        assert_eq!(acct.reconcile().unwrap().current, 0);
    }

    #[test]
    fn test_expiry_flips_rows_and_debits_current() {
        let mut acct = account();
        award(&mut acct, Uuid::new_v4(), 200);
        run(&mut acct, CustomerCommand::RedeemPoints { points: 150, order_id: None, at: Utc::now() }).unwrap();

        let later = Utc::now() + Duration::days(366);
        run(&mut acct, CustomerCommand::ExpirePoints { at: later }).unwrap();

        assert_eq!(acct.transactions[0].status, TransactionStatus::Expired);
        // only the 50 still redeemable can expire
        assert_eq!(acct.points, LoyaltyPoints { current: 0, total: 200, used: 150 });

        let again = run(&mut acct, CustomerCommand::ExpirePoints { at: later }).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn test_nothing_expires_early() {
        let mut acct = account();
        award(&mut acct, Uuid::new_v4(), 200);
        let events = run(&mut acct, CustomerCommand::ExpirePoints { at: Utc::now() }).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_new_account_opens_implicitly() {
        let id = Uuid::new_v4();
        let events = CustomerAggregate::handle_new(id, &CustomerCommand::AwardPoints {
            order_id: Uuid::new_v4(),
            amount: Decimal::from(100),
            at: Utc::now(),
        })
        .unwrap();
        assert!(matches!(events[0], CustomerEvent::AccountOpened(_)));

        let redeem = CustomerAggregate::handle_new(id, &CustomerCommand::RedeemPoints {
            points: 100,
            order_id: None,
            at: Utc::now(),
        });
        assert!(matches!(redeem, Err(LoyaltyError::InsufficientPoints { available: 0, .. })));
    }

    #[test]
    fn test_reconcile_detects_drift() {
        let mut acct = account();
        award(&mut acct, Uuid::new_v4(), 400);
        assert!(acct.reconcile().is_ok());

        acct.points.current += 7;
        assert!(matches!(acct.reconcile(), Err(LoyaltyError::LedgerDrift { .. })));
    }
}
