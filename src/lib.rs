// ============================================================================
// Cash-on-Delivery Order Fulfillment
// ============================================================================
//
// Layers, inside out:
// - domain/          - order and loyalty aggregates (pure state machines)
// - event_sourcing/  - aggregate trait, repository, event + outbox stores
// - fulfillment/     - client operations, side-effect planning and relay
// - collaborators/   - inventory and customer notification seams
// - actors/          - background redelivery, expiry, health
//
// ============================================================================

pub mod actors;
pub mod clock;
pub mod collaborators;
pub mod config;
pub mod domain;
pub mod error;
pub mod event_sourcing;
pub mod fulfillment;
pub mod messaging;
pub mod metrics;
pub mod utils;
pub mod verification_codes;

pub use error::{ErrorResponse, FulfillmentError};
