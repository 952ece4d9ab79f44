use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::domain::customer::{
    CustomerAggregate, CustomerCommand, CustomerCommandHandler, CustomerEvent, LoyaltyConfig, LoyaltyPoints,
    LoyaltyTransaction, PurchaseStats, TransactionType,
};
use crate::error::FulfillmentError;
use crate::event_sourcing::{CommandOutcome, EventStore};
use crate::metrics::Metrics;

// ============================================================================
// Loyalty Ledger - Award, Redeem, Expire, Refund
// ============================================================================
//
// Thin service over the customer aggregate. Every posting goes through the
// versioned customer stream, so a balance check and the write that depends
// on it cannot be split by a concurrent request.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RedemptionReceipt {
    pub points: i64,
    pub discount: Decimal,
    pub balance_after: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoyaltyBalance {
    pub points: LoyaltyPoints,
    pub stats: PurchaseStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpirySweep {
    pub accounts: usize,
    pub failed: usize,
    pub points_expired: i64,
}

#[derive(Clone)]
pub struct LoyaltyLedger {
    handler: CustomerCommandHandler,
    config: LoyaltyConfig,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
}

impl LoyaltyLedger {
    pub fn new(event_store: Arc<dyn EventStore>, clock: Arc<dyn Clock>, metrics: Arc<Metrics>) -> Self {
        Self {
            handler: CustomerCommandHandler::new(event_store),
            config: LoyaltyConfig::default(),
            clock,
            metrics,
        }
    }

    pub fn config(&self) -> &LoyaltyConfig {
        &self.config
    }

    async fn execute(
        &self,
        customer_id: Uuid,
        command: CustomerCommand,
        correlation_id: Uuid,
    ) -> Result<CommandOutcome<CustomerAggregate>, FulfillmentError> {
        let outcome = self.handler.handle(customer_id, &command, correlation_id).await?;

        for tx in posted(&outcome) {
            self.metrics.record_points(tx.kind.as_str(), tx.points);
        }

        Ok(outcome)
    }

    /// Points for a delivered order; a repeat for the same order posts nothing
    pub async fn award_points(
        &self,
        customer_id: Uuid,
        order_id: Uuid,
        amount: Decimal,
        correlation_id: Uuid,
    ) -> Result<Vec<LoyaltyTransaction>, FulfillmentError> {
        let at = self.clock.now();
        let outcome = self
            .execute(customer_id, CustomerCommand::AwardPoints { order_id, amount, at }, correlation_id)
            .await?;

        Ok(posted(&outcome).cloned().collect())
    }

    pub async fn redeem_points(
        &self,
        customer_id: Uuid,
        points: i64,
        order_id: Option<Uuid>,
        correlation_id: Uuid,
    ) -> Result<RedemptionReceipt, FulfillmentError> {
        let at = self.clock.now();
        let outcome = self
            .execute(customer_id, CustomerCommand::RedeemPoints { points, order_id, at }, correlation_id)
            .await?;

        Ok(RedemptionReceipt {
            points,
            discount: self.config.discount_for(points),
            balance_after: outcome.aggregate.points.current,
        })
    }

    /// Expire every lapsed accrual of one customer; returns points removed
    pub async fn expire_points(&self, customer_id: Uuid, correlation_id: Uuid) -> Result<i64, FulfillmentError> {
        let at = self.clock.now();
        let outcome = self
            .execute(customer_id, CustomerCommand::ExpirePoints { at }, correlation_id)
            .await?;

        Ok(points_of(&outcome, TransactionType::Expired).abs())
    }

    /// Give back points redeemed on a cancelled order; returns points restored
    pub async fn restore_redeemed_points(
        &self,
        customer_id: Uuid,
        order_id: Uuid,
        points: i64,
        correlation_id: Uuid,
    ) -> Result<i64, FulfillmentError> {
        let at = self.clock.now();
        let outcome = self
            .execute(
                customer_id,
                CustomerCommand::RestoreRedeemedPoints { order_id, points, at },
                correlation_id,
            )
            .await?;

        Ok(points_of(&outcome, TransactionType::Refund))
    }

    /// Revoke points earned on a cancelled order; returns points removed
    pub async fn remove_earned_points(
        &self,
        customer_id: Uuid,
        order_id: Uuid,
        correlation_id: Uuid,
    ) -> Result<i64, FulfillmentError> {
        let at = self.clock.now();
        let outcome = self
            .execute(customer_id, CustomerCommand::RemoveEarnedPoints { order_id, at }, correlation_id)
            .await?;

        Ok(points_of(&outcome, TransactionType::Refund).abs())
    }

    /// Zero balance for a customer who never had a posting
    pub async fn balance(&self, customer_id: Uuid) -> Result<LoyaltyBalance, FulfillmentError> {
        Ok(self
            .handler
            .load(customer_id)
            .await?
            .map(|account| LoyaltyBalance {
                points: account.points,
                stats: account.stats,
            })
            .unwrap_or_default())
    }

    /// Ledger rows in posting order
    pub async fn history(&self, customer_id: Uuid) -> Result<Vec<LoyaltyTransaction>, FulfillmentError> {
        Ok(self
            .handler
            .load(customer_id)
            .await?
            .map(|account| account.transactions)
            .unwrap_or_default())
    }

    pub async fn reconcile(&self, customer_id: Uuid) -> Result<LoyaltyPoints, FulfillmentError> {
        let Some(account) = self.handler.load(customer_id).await? else {
            return Ok(LoyaltyPoints::default());
        };

        account.reconcile().map_err(|e| {
            tracing::error!(customer_id = %customer_id, error = %e, "Loyalty ledger drift detected");
            FulfillmentError::from(e)
        })
    }

    /// Run expiry over every loyalty account. One failing account is logged
    /// and skipped.
    pub async fn expire_all_points(&self) -> Result<ExpirySweep, FulfillmentError> {
        let customers = self.handler.list().await?;
        let mut sweep = ExpirySweep::default();

        for customer_id in customers {
            sweep.accounts += 1;
            match self.expire_points(customer_id, Uuid::new_v4()).await {
                Ok(points) => sweep.points_expired += points,
                Err(e) => {
                    sweep.failed += 1;
                    tracing::warn!(customer_id = %customer_id, error = %e, "Points expiry failed for account");
                }
            }
        }

        if sweep.points_expired > 0 {
            tracing::info!(
                accounts = sweep.accounts,
                points_expired = sweep.points_expired,
                "⏳ Expired lapsed loyalty points"
            );
        }

        Ok(sweep)
    }
}

fn posted(outcome: &CommandOutcome<CustomerAggregate>) -> impl Iterator<Item = &LoyaltyTransaction> {
    outcome.events.iter().filter_map(|event| match event {
        CustomerEvent::TransactionPosted(tx) => Some(tx),
        _ => None,
    })
}

fn points_of(outcome: &CommandOutcome<CustomerAggregate>, kind: TransactionType) -> i64 {
    posted(outcome).filter(|tx| tx.kind == kind).map(|tx| tx.points).sum()
}
