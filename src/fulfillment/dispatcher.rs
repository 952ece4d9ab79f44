use std::sync::Arc;
use std::time::Instant;

use super::effects::SideEffect;
use super::loyalty::LoyaltyLedger;
use crate::collaborators::{CollaboratorError, InventoryService, Notifier};
use crate::error::FulfillmentError;
use crate::event_sourcing::OutboxEntry;
use crate::metrics::Metrics;
use crate::utils::IsTransient;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DispatchError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl IsTransient for DispatchError {
    fn is_transient(&self) -> bool {
        matches!(self, DispatchError::Transient(_))
    }
}

impl From<CollaboratorError> for DispatchError {
    fn from(err: CollaboratorError) -> Self {
        if err.is_transient() {
            DispatchError::Transient(err.to_string())
        } else {
            DispatchError::Permanent(err.to_string())
        }
    }
}

impl From<FulfillmentError> for DispatchError {
    fn from(err: FulfillmentError) -> Self {
        match err {
            // Store trouble, including a lost race on the customer stream
            FulfillmentError::Internal(source) => DispatchError::Transient(format!("{:#}", source)),
            other => DispatchError::Permanent(format!("{}: {}", other.code(), other)),
        }
    }
}

/// Executes one outbox entry against the collaborator it targets
#[derive(Clone)]
pub struct EffectDispatcher {
    inventory: Arc<dyn InventoryService>,
    notifier: Arc<dyn Notifier>,
    ledger: LoyaltyLedger,
    metrics: Arc<Metrics>,
}

impl EffectDispatcher {
    pub fn new(
        inventory: Arc<dyn InventoryService>,
        notifier: Arc<dyn Notifier>,
        ledger: LoyaltyLedger,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            inventory,
            notifier,
            ledger,
            metrics,
        }
    }

    pub async fn dispatch(&self, entry: &OutboxEntry) -> Result<(), DispatchError> {
        let effect = SideEffect::from_entry(entry)
            .map_err(|e| DispatchError::Permanent(format!("undecodable {} payload: {}", entry.effect_type, e)))?;

        let started = Instant::now();
        let result = self.run(&effect, entry).await;
        let outcome = match &result {
            Ok(()) => "ok",
            Err(DispatchError::Transient(_)) => "transient_error",
            Err(DispatchError::Permanent(_)) => "permanent_error",
        };
        self.metrics
            .record_side_effect(effect.effect_type(), outcome, started.elapsed().as_secs_f64());

        match &result {
            Ok(()) => tracing::debug!(
                effect_type = effect.effect_type(),
                aggregate_id = %entry.aggregate_id,
                "Side effect dispatched"
            ),
            Err(e) => tracing::warn!(
                effect_type = effect.effect_type(),
                aggregate_id = %entry.aggregate_id,
                error = %e,
                "Side effect failed"
            ),
        }

        result
    }

    async fn run(&self, effect: &SideEffect, entry: &OutboxEntry) -> Result<(), DispatchError> {
        let correlation_id = entry.correlation_id;

        match effect {
            SideEffect::NotifyCustomer(notification) => {
                self.notifier.notify_customer(notification).await?;
            }
            SideEffect::PurgeVerificationNotification { order_id } => {
                self.notifier.purge_verification_notification(*order_id).await?;
            }
            SideEffect::AdjustStock { order_id, lines } => {
                self.inventory.adjust_stock(*order_id, lines).await?;
            }
            SideEffect::RestoreStock { order_id, lines } => {
                self.inventory.restore_stock(*order_id, lines).await?;
            }
            SideEffect::AwardLoyaltyPoints { customer_id, order_id, amount } => {
                self.ledger
                    .award_points(*customer_id, *order_id, *amount, correlation_id)
                    .await?;
            }
            SideEffect::RestoreRedeemedPoints { customer_id, order_id, points } => {
                self.ledger
                    .restore_redeemed_points(*customer_id, *order_id, *points, correlation_id)
                    .await?;
            }
            SideEffect::RemoveEarnedPoints { customer_id, order_id } => {
                self.ledger
                    .remove_earned_points(*customer_id, *order_id, correlation_id)
                    .await?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sourcing::StoreError;

    #[test]
    fn test_collaborator_errors_keep_transience() {
        let timeout = CollaboratorError::Unavailable {
            service: "inventory",
            message: "timed out".into(),
        };
        assert!(DispatchError::from(timeout).is_transient());

        let refused = CollaboratorError::Rejected {
            service: "inventory",
            message: "unknown product".into(),
        };
        assert!(!DispatchError::from(refused).is_transient());
    }

    #[test]
    fn test_store_failures_are_retried_rule_failures_are_not() {
        let store = FulfillmentError::from(StoreError::Backend("timeout".into()));
        assert!(DispatchError::from(store).is_transient());

        let rule = FulfillmentError::validation("INVALID_POINTS", "Invalid points value: -5");
        let err = DispatchError::from(rule);
        assert!(!err.is_transient());
        assert!(err.to_string().contains("INVALID_POINTS"));
    }
}
