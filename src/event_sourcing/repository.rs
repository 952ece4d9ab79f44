use chrono::Utc;
use std::marker::PhantomData;
use std::sync::Arc;
use uuid::Uuid;

use crate::event_sourcing::core::{Aggregate, EventEnvelope};
use crate::event_sourcing::store::{EventStore, OutboxEntry, OutboxStatus, StoreError};

// ============================================================================
// Repository - Command Execution with Compare-and-Set
// ============================================================================
//
// Orchestrates: Load → Command → Events → (Events + Outbox) → Event Store
//
// The append only succeeds if the stream is still at the version the command
// was validated against. On a conflict the aggregate is reloaded and the
// command re-validated, so a rule like "code already used" is always checked
// against the latest state.
//
// ============================================================================

pub const DEFAULT_CONFLICT_RETRIES: u32 = 3;

/// A side effect to be recorded with the transition that caused it
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxDraft {
    pub effect_type: String,
    pub payload: String,
}

/// Result of a committed (or idempotently skipped) command
#[derive(Debug)]
pub struct CommandOutcome<A: Aggregate> {
    pub aggregate: A,
    pub events: Vec<A::Event>,
    pub new_version: i64,
    pub outbox: Vec<OutboxEntry>,
}

impl<A: Aggregate> CommandOutcome<A> {
    /// True when the command was accepted but changed nothing
    pub fn is_noop(&self) -> bool {
        self.events.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecuteError<E: std::error::Error + 'static> {
    #[error(transparent)]
    Domain(E),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct Repository<A: Aggregate> {
    store: Arc<dyn EventStore>,
    max_conflict_retries: u32,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A: Aggregate> Clone for Repository<A> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            max_conflict_retries: self.max_conflict_retries,
            _aggregate: PhantomData,
        }
    }
}

impl<A: Aggregate> Repository<A> {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            max_conflict_retries: DEFAULT_CONFLICT_RETRIES,
            _aggregate: PhantomData,
        }
    }

    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    /// Rebuild the aggregate from its stream; `None` if it has no events
    pub async fn load(&self, aggregate_id: Uuid) -> Result<Option<A>, StoreError> {
        let stored = self.store.load_events(aggregate_id).await?;
        if stored.is_empty() {
            return Ok(None);
        }

        let envelopes = stored
            .into_iter()
            .map(EventEnvelope::<A::Event>::from_stored)
            .collect::<Result<Vec<_>, _>>()?;

        A::load_from_events(envelopes).map(Some)
    }

    pub async fn list(&self) -> Result<Vec<Uuid>, StoreError> {
        self.store.list_aggregates(A::AGGREGATE_TYPE).await
    }

    /// Validate `command` against current state and commit the resulting
    /// events together with the side effects `plan` derives from them.
    pub async fn execute<P>(
        &self,
        aggregate_id: Uuid,
        command: &A::Command,
        correlation_id: Uuid,
        plan: P,
    ) -> Result<CommandOutcome<A>, ExecuteError<A::Error>>
    where
        P: Fn(&A, &[A::Event]) -> Result<Vec<OutboxDraft>, StoreError>,
    {
        let mut conflicts = 0;

        loop {
            let current = self.load(aggregate_id).await?;
            let expected_version = current.as_ref().map(|a| a.version()).unwrap_or(0);

            let events = match &current {
                Some(aggregate) => aggregate.handle_command(command),
                None => A::handle_new(aggregate_id, command),
            }
            .map_err(ExecuteError::Domain)?;

            if events.is_empty() {
                // Idempotent repeat: nothing to write, nothing to dispatch
                return match current {
                    Some(aggregate) => Ok(CommandOutcome {
                        aggregate,
                        events,
                        new_version: expected_version,
                        outbox: Vec::new(),
                    }),
                    None => Err(StoreError::Corrupted(format!(
                        "command on new {} {} produced no events",
                        A::AGGREGATE_TYPE,
                        aggregate_id
                    ))
                    .into()),
                };
            }

            let aggregate = fold(aggregate_id, current, &events, expected_version)
                .map_err(ExecuteError::Domain)?;
            let drafts = plan(&aggregate, &events)?;

            let mut stored = Vec::with_capacity(events.len());
            for (offset, event) in events.iter().enumerate() {
                let envelope = EventEnvelope::new(
                    aggregate_id,
                    expected_version + offset as i64 + 1,
                    event.clone(),
                    correlation_id,
                );
                stored.push(envelope.to_stored(A::AGGREGATE_TYPE)?);
            }

            let final_sequence = expected_version + events.len() as i64;
            let created_at = Utc::now();
            let outbox: Vec<OutboxEntry> = drafts
                .into_iter()
                .enumerate()
                .map(|(ordinal, draft)| OutboxEntry {
                    id: Uuid::now_v7(),
                    aggregate_id,
                    sequence_number: final_sequence,
                    ordinal: ordinal as i32,
                    effect_type: draft.effect_type,
                    payload: draft.payload,
                    correlation_id,
                    created_at,
                    attempts: 0,
                    status: OutboxStatus::Pending,
                    claimed_at: None,
                })
                .collect();

            match self
                .store
                .append(aggregate_id, A::AGGREGATE_TYPE, expected_version, stored, outbox.clone())
                .await
            {
                Ok(new_version) => {
                    return Ok(CommandOutcome {
                        aggregate,
                        events,
                        new_version,
                        outbox,
                    });
                }
                Err(e) if e.is_conflict() && conflicts < self.max_conflict_retries => {
                    conflicts += 1;
                    tracing::debug!(
                        aggregate_id = %aggregate_id,
                        aggregate_type = A::AGGREGATE_TYPE,
                        attempt = conflicts,
                        "Version conflict, reloading and re-validating"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn fold<A: Aggregate>(
    aggregate_id: Uuid,
    current: Option<A>,
    events: &[A::Event],
    expected_version: i64,
) -> Result<A, A::Error> {
    let mut version = expected_version;
    let (mut aggregate, rest) = match current {
        Some(aggregate) => (aggregate, events),
        None => {
            version += 1;
            let mut first = A::apply_first_event(aggregate_id, &events[0])?;
            first.set_version(version);
            (first, &events[1..])
        }
    };

    for event in rest {
        aggregate.apply_event(event)?;
        version += 1;
        aggregate.set_version(version);
    }

    Ok(aggregate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sourcing::core::DomainEvent;
    use crate::event_sourcing::store::{InMemoryStore, StoredEvent};
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicBool, Ordering};

    // Minimal stream: a punch card that can be stamped up to a limit
    #[derive(Debug)]
    struct PunchCard {
        id: Uuid,
        version: i64,
        stamps: u32,
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    #[serde(tag = "type", content = "data")]
    enum PunchEvent {
        Issued,
        Stamped,
    }

    impl DomainEvent for PunchEvent {
        fn event_type(&self) -> &'static str {
            match self {
                PunchEvent::Issued => "PunchCardIssued",
                PunchEvent::Stamped => "PunchCardStamped",
            }
        }
    }

    enum PunchCommand {
        Issue,
        Stamp,
        StampUpTo(u32),
    }

    #[derive(Debug, thiserror::Error)]
    enum PunchError {
        #[error("card is full")]
        Full,
        #[error("card does not exist")]
        Missing,
    }

    impl Aggregate for PunchCard {
        type Event = PunchEvent;
        type Command = PunchCommand;
        type Error = PunchError;
        const AGGREGATE_TYPE: &'static str = "PunchCard";

        fn apply_first_event(aggregate_id: Uuid, _event: &PunchEvent) -> Result<Self, PunchError> {
            Ok(Self { id: aggregate_id, version: 0, stamps: 0 })
        }

        fn apply_event(&mut self, event: &PunchEvent) -> Result<(), PunchError> {
            if let PunchEvent::Stamped = event {
                self.stamps += 1;
            }
            Ok(())
        }

        fn handle_command(&self, command: &PunchCommand) -> Result<Vec<PunchEvent>, PunchError> {
            match command {
                PunchCommand::Issue => Ok(vec![]),
                PunchCommand::Stamp if self.stamps >= 2 => Err(PunchError::Full),
                PunchCommand::Stamp => Ok(vec![PunchEvent::Stamped]),
                PunchCommand::StampUpTo(n) if self.stamps >= *n => Ok(vec![]),
                PunchCommand::StampUpTo(_) => Ok(vec![PunchEvent::Stamped]),
            }
        }

        fn handle_new(_aggregate_id: Uuid, command: &PunchCommand) -> Result<Vec<PunchEvent>, PunchError> {
            match command {
                PunchCommand::Issue => Ok(vec![PunchEvent::Issued]),
                _ => Err(PunchError::Missing),
            }
        }

        fn aggregate_id(&self) -> Uuid {
            self.id
        }

        fn version(&self) -> i64 {
            self.version
        }

        fn set_version(&mut self, version: i64) {
            self.version = version;
        }
    }

    fn no_effects(_: &PunchCard, _: &[PunchEvent]) -> Result<Vec<OutboxDraft>, StoreError> {
        Ok(vec![])
    }

    /// Lets a competing writer stamp the card right before the first append
    struct RacingStore {
        inner: Arc<InMemoryStore>,
        raced: AtomicBool,
    }

    #[async_trait]
    impl EventStore for RacingStore {
        async fn append(
            &self,
            aggregate_id: Uuid,
            aggregate_type: &str,
            expected_version: i64,
            events: Vec<StoredEvent>,
            outbox: Vec<OutboxEntry>,
        ) -> Result<i64, StoreError> {
            if expected_version > 0 && !self.raced.swap(true, Ordering::SeqCst) {
                let competitor = EventEnvelope::new(aggregate_id, expected_version + 1, PunchEvent::Stamped, Uuid::new_v4())
                    .to_stored(aggregate_type)?;
                self.inner
                    .append(aggregate_id, aggregate_type, expected_version, vec![competitor], vec![])
                    .await?;
            }
            self.inner.append(aggregate_id, aggregate_type, expected_version, events, outbox).await
        }

        async fn load_events(&self, aggregate_id: Uuid) -> Result<Vec<StoredEvent>, StoreError> {
            self.inner.load_events(aggregate_id).await
        }

        async fn current_version(&self, aggregate_id: Uuid) -> Result<i64, StoreError> {
            self.inner.current_version(aggregate_id).await
        }

        async fn list_aggregates(&self, aggregate_type: &str) -> Result<Vec<Uuid>, StoreError> {
            self.inner.list_aggregates(aggregate_type).await
        }
    }

    #[tokio::test]
    async fn test_execute_creates_and_reloads() {
        let repo: Repository<PunchCard> = Repository::new(Arc::new(InMemoryStore::new()));
        let id = Uuid::new_v4();

        let created = repo.execute(id, &PunchCommand::Issue, Uuid::new_v4(), no_effects).await.unwrap();
        assert_eq!(created.new_version, 1);

        let stamped = repo.execute(id, &PunchCommand::Stamp, Uuid::new_v4(), no_effects).await.unwrap();
        assert_eq!(stamped.new_version, 2);
        assert_eq!(stamped.aggregate.stamps, 1);

        let loaded = repo.load(id).await.unwrap().unwrap();
        assert_eq!(loaded.version(), 2);
        assert_eq!(loaded.stamps, 1);
        assert_eq!(repo.list().await.unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn test_missing_stream_is_none() {
        let repo: Repository<PunchCard> = Repository::new(Arc::new(InMemoryStore::new()));
        assert!(repo.load(Uuid::new_v4()).await.unwrap().is_none());

        let result = repo.execute(Uuid::new_v4(), &PunchCommand::Stamp, Uuid::new_v4(), no_effects).await;
        assert!(matches!(result, Err(ExecuteError::Domain(PunchError::Missing))));
    }

    #[tokio::test]
    async fn test_noop_command_writes_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let repo: Repository<PunchCard> = Repository::new(store.clone());
        let id = Uuid::new_v4();

        repo.execute(id, &PunchCommand::Issue, Uuid::new_v4(), no_effects).await.unwrap();
        let again = repo.execute(id, &PunchCommand::Issue, Uuid::new_v4(), no_effects).await.unwrap();

        assert!(again.is_noop());
        assert_eq!(store.current_version(id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_outbox_entries_carry_transition_position() {
        let store = Arc::new(InMemoryStore::new());
        let repo: Repository<PunchCard> = Repository::new(store.clone());
        let id = Uuid::new_v4();
        let correlation_id = Uuid::new_v4();

        repo.execute(id, &PunchCommand::Issue, Uuid::new_v4(), no_effects).await.unwrap();
        let outcome = repo
            .execute(id, &PunchCommand::Stamp, correlation_id, |card, events| {
                assert_eq!(card.stamps, 1);
                assert_eq!(events, &[PunchEvent::Stamped]);
                Ok(vec![
                    OutboxDraft { effect_type: "First".into(), payload: "{}".into() },
                    OutboxDraft { effect_type: "Second".into(), payload: "{}".into() },
                ])
            })
            .await
            .unwrap();

        assert_eq!(outcome.outbox.len(), 2);
        assert!(outcome.outbox.iter().all(|e| e.sequence_number == 2));
        assert!(outcome.outbox.iter().all(|e| e.correlation_id == correlation_id));
        assert_eq!(outcome.outbox[1].ordinal, 1);
        assert_eq!(store.outbox_snapshot().await.len(), 2);
    }

    #[tokio::test]
    async fn test_conflict_revalidates_against_fresh_state() {
        let inner = Arc::new(InMemoryStore::new());
        let store = Arc::new(RacingStore { inner: inner.clone(), raced: AtomicBool::new(false) });
        let repo: Repository<PunchCard> = Repository::new(store);
        let id = Uuid::new_v4();

        repo.execute(id, &PunchCommand::Issue, Uuid::new_v4(), no_effects).await.unwrap();

        // The competitor's stamp satisfies the target, so the retry is a no-op
        let outcome = repo
            .execute(id, &PunchCommand::StampUpTo(1), Uuid::new_v4(), no_effects)
            .await
            .unwrap();

        assert!(outcome.is_noop());
        assert_eq!(outcome.aggregate.stamps, 1);
        assert_eq!(inner.current_version(id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_conflict_surfaces_when_retries_exhausted() {
        let inner = Arc::new(InMemoryStore::new());
        let store = Arc::new(RacingStore { inner, raced: AtomicBool::new(false) });
        let repo: Repository<PunchCard> = Repository::new(store).with_conflict_retries(0);
        let id = Uuid::new_v4();

        repo.execute(id, &PunchCommand::Issue, Uuid::new_v4(), no_effects).await.unwrap();
        let result = repo.execute(id, &PunchCommand::Stamp, Uuid::new_v4(), no_effects).await;

        assert!(matches!(result, Err(ExecuteError::Store(StoreError::ConcurrencyConflict { .. }))));
    }
}
