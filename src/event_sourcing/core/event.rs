use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

use crate::event_sourcing::store::{StoreError, StoredEvent};

// ============================================================================
// Event Envelope - Event Metadata
// ============================================================================
//
// Wraps a typed domain event with the metadata the store persists alongside
// it. Generic over the event type; the store itself only sees `StoredEvent`.
//
// ============================================================================

/// Typed event plus its position in the aggregate stream
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct EventEnvelope<E> {
    pub event_id: Uuid,
    pub aggregate_id: Uuid,
    pub sequence_number: i64,

    pub event_type: String,
    pub event_version: i32,

    pub event_data: E,

    // Groups every event and outbox entry written by one command
    pub correlation_id: Uuid,

    pub timestamp: DateTime<Utc>,
}

impl<E: DomainEvent> EventEnvelope<E> {
    pub fn new(
        aggregate_id: Uuid,
        sequence_number: i64,
        event_data: E,
        correlation_id: Uuid,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            aggregate_id,
            sequence_number,
            event_type: event_data.event_type().to_string(),
            event_version: event_data.event_version(),
            event_data,
            correlation_id,
            timestamp: Utc::now(),
        }
    }

    /// Serialize for the store
    pub fn to_stored(&self, aggregate_type: &str) -> Result<StoredEvent, StoreError> {
        Ok(StoredEvent {
            aggregate_id: self.aggregate_id,
            aggregate_type: aggregate_type.to_string(),
            sequence_number: self.sequence_number,
            event_id: self.event_id,
            event_type: self.event_type.clone(),
            event_version: self.event_version,
            payload: serialize_event(&self.event_data)?,
            correlation_id: self.correlation_id,
            timestamp: self.timestamp,
        })
    }

    /// Rebuild a typed envelope from a stored row
    pub fn from_stored(stored: StoredEvent) -> Result<Self, StoreError> {
        let event_data = deserialize_event(&stored.payload)?;
        Ok(Self {
            event_id: stored.event_id,
            aggregate_id: stored.aggregate_id,
            sequence_number: stored.sequence_number,
            event_type: stored.event_type,
            event_version: stored.event_version,
            event_data,
            correlation_id: stored.correlation_id,
            timestamp: stored.timestamp,
        })
    }
}

// ============================================================================
// Domain Event Trait
// ============================================================================

/// Implemented by every aggregate's event union
pub trait DomainEvent: Serialize + for<'de> Deserialize<'de> + Clone + Send + Sync {
    /// Stable name stored in the `event_type` column
    fn event_type(&self) -> &'static str;

    fn event_version(&self) -> i32 {
        1
    }
}

pub fn serialize_event<E: Serialize>(event: &E) -> Result<String, StoreError> {
    Ok(serde_json::to_string(event)?)
}

pub fn deserialize_event<E: for<'de> Deserialize<'de>>(json: &str) -> Result<E, StoreError> {
    Ok(serde_json::from_str(json)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
    #[serde(tag = "type", content = "data")]
    enum LedgerTestEvent {
        Posted { points: i64 },
    }

    impl DomainEvent for LedgerTestEvent {
        fn event_type(&self) -> &'static str {
            "LedgerTestPosted"
        }
    }

    #[test]
    fn test_envelope_takes_type_from_event() {
        let aggregate_id = Uuid::new_v4();
        let correlation_id = Uuid::new_v4();

        let envelope = EventEnvelope::new(
            aggregate_id,
            3,
            LedgerTestEvent::Posted { points: 120 },
            correlation_id,
        );

        assert_eq!(envelope.aggregate_id, aggregate_id);
        assert_eq!(envelope.sequence_number, 3);
        assert_eq!(envelope.event_type, "LedgerTestPosted");
        assert_eq!(envelope.event_version, 1);
        assert_eq!(envelope.correlation_id, correlation_id);
    }

    #[test]
    fn test_stored_form_keeps_payload_and_position() {
        let envelope = EventEnvelope::new(
            Uuid::new_v4(),
            7,
            LedgerTestEvent::Posted { points: -40 },
            Uuid::new_v4(),
        );

        let stored = envelope.to_stored("Customer").unwrap();
        assert_eq!(stored.aggregate_type, "Customer");
        assert!(stored.payload.contains("\"points\":-40"));

        let restored: EventEnvelope<LedgerTestEvent> = EventEnvelope::from_stored(stored).unwrap();
        assert_eq!(restored.sequence_number, 7);
        assert_eq!(restored.event_data, LedgerTestEvent::Posted { points: -40 });
    }

    #[test]
    fn test_corrupt_payload_is_a_serialization_error() {
        let mut stored = EventEnvelope::new(
            Uuid::new_v4(),
            1,
            LedgerTestEvent::Posted { points: 1 },
            Uuid::new_v4(),
        )
        .to_stored("Customer")
        .unwrap();
        stored.payload = "{not json".to_string();

        let result: Result<EventEnvelope<LedgerTestEvent>, _> = EventEnvelope::from_stored(stored);
        assert!(matches!(result, Err(StoreError::Serialization(_))));
    }
}
