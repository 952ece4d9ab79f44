use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scylla::client::session::Session;
use scylla::response::query_result::QueryResult;
use scylla::serialize::row::SerializeRow;
use scylla::statement::batch::Batch;
use scylla::value::{CqlValue, Row};
use std::sync::Arc;
use uuid::Uuid;

use super::{
    DeadLetter, EventStore, InvoiceSequence, OutboxEntry, OutboxStatus, OutboxStore, StoreError,
    StoredEvent, DEFAULT_CLAIM_LEASE_SECS,
};

// ============================================================================
// ScyllaDB Store
// ============================================================================
//
// Tables:
// - event_store         (aggregate_id, sequence_number) append-only events
// - aggregate_sequence  per-stream version, the compare-and-set target
// - outbox_messages     side effects awaiting dispatch, deleted once done
// - dead_letter_queue   side effects that exhausted their attempts
// - invoice_sequence    single-row invoice counter
//
// Append protocol:
// 1. Lightweight transaction moves aggregate_sequence from expected to new
// 2. Logged batch writes the events and their outbox rows together
// 3. If the batch fails and the events are not there, a second lightweight
//    transaction moves the sequence back from new to expected
//
// Only the writer that wins step 1 performs step 2, so two commands racing on
// one stream can never both commit. Step 3 is conditional on the sequence
// still holding our claim.
//
// Outbox rows are claimed, completed and released through lightweight
// transactions on `status`. An in-flight row whose `claimed_at` is older than
// the claim lease can be claimed again.
//
// ============================================================================

const INVOICE_COUNTER: &str = "invoice";

// Event and outbox inserts share one column shape so the batch values are a
// single tuple type.
type BatchRow = (Uuid, i64, i32, Uuid, String, String, Uuid, DateTime<Utc>);

const INSERT_EVENT: &str = "INSERT INTO event_store (
        aggregate_id, sequence_number, event_version, event_id,
        event_type, event_data, correlation_id, timestamp
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)";

const INSERT_OUTBOX: &str = "INSERT INTO outbox_messages (
        aggregate_id, sequence_number, ordinal, id,
        effect_type, payload, correlation_id, created_at, attempts, status
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, 'pending')";

// Compensation for a claimed sequence whose batch never landed
const REWIND_SEQUENCE: &str = "UPDATE aggregate_sequence SET current_sequence = ?, updated_at = ?
     WHERE aggregate_id = ? IF current_sequence = ?";
const DROP_SEQUENCE: &str = "DELETE FROM aggregate_sequence WHERE aggregate_id = ? IF current_sequence = ?";

const SELECT_PENDING: &str = "SELECT id, aggregate_id, sequence_number, ordinal, effect_type, payload,
        correlation_id, created_at, attempts, status, claimed_at
     FROM outbox_messages WHERE status = 'pending' LIMIT ? ALLOW FILTERING";
const SELECT_EXPIRED_CLAIMS: &str = "SELECT id, aggregate_id, sequence_number, ordinal, effect_type, payload,
        correlation_id, created_at, attempts, status, claimed_at
     FROM outbox_messages WHERE status = 'in_flight' AND claimed_at <= ? LIMIT ? ALLOW FILTERING";

const CLAIM_PENDING: &str =
    "UPDATE outbox_messages SET status = 'in_flight', claimed_at = ? WHERE id = ? IF status = 'pending'";
const RETAKE_EXPIRED: &str =
    "UPDATE outbox_messages SET claimed_at = ? WHERE id = ? IF status = 'in_flight' AND claimed_at <= ?";
const COMPLETE_OUTBOX: &str = "DELETE FROM outbox_messages WHERE id = ? IF status = 'in_flight'";
const RELEASE_OUTBOX: &str = "UPDATE outbox_messages
     SET status = 'pending', attempts = ?, last_error = ?, claimed_at = null
     WHERE id = ? IF status = 'in_flight'";
const DROP_OUTBOX: &str = "DELETE FROM outbox_messages WHERE id = ? IF EXISTS";

type OutboxRow = (Uuid, Uuid, i64, i32, String, String, Uuid, DateTime<Utc>, i32, String, Option<DateTime<Utc>>);

pub struct ScyllaStore {
    session: Arc<Session>,
    claim_lease: chrono::Duration,
}

impl ScyllaStore {
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            claim_lease: chrono::Duration::seconds(DEFAULT_CLAIM_LEASE_SECS),
        }
    }

    pub fn with_claim_lease(mut self, lease: chrono::Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    /// Create keyspace and tables, then switch the session to the keyspace
    pub async fn ensure_schema(session: &Session, keyspace: &str) -> Result<(), StoreError> {
        session
            .query_unpaged(
                format!(
                    "CREATE KEYSPACE IF NOT EXISTS {} WITH REPLICATION = \
                     {{'class': 'SimpleStrategy', 'replication_factor': 1}}",
                    keyspace
                ),
                &[],
            )
            .await
            .map_err(StoreError::backend)?;

        session
            .use_keyspace(keyspace, false)
            .await
            .map_err(StoreError::backend)?;

        let tables = [
            "CREATE TABLE IF NOT EXISTS event_store (
                aggregate_id uuid,
                sequence_number bigint,
                event_id uuid,
                event_type text,
                event_version int,
                event_data text,
                correlation_id uuid,
                timestamp timestamp,
                PRIMARY KEY (aggregate_id, sequence_number)
            ) WITH CLUSTERING ORDER BY (sequence_number ASC)",
            "CREATE TABLE IF NOT EXISTS aggregate_sequence (
                aggregate_id uuid PRIMARY KEY,
                aggregate_type text,
                current_sequence bigint,
                updated_at timestamp
            )",
            "CREATE TABLE IF NOT EXISTS outbox_messages (
                id uuid PRIMARY KEY,
                aggregate_id uuid,
                sequence_number bigint,
                ordinal int,
                effect_type text,
                payload text,
                correlation_id uuid,
                created_at timestamp,
                attempts int,
                status text,
                last_error text,
                claimed_at timestamp
            )",
            "CREATE TABLE IF NOT EXISTS dead_letter_queue (
                id uuid PRIMARY KEY,
                aggregate_id uuid,
                sequence_number bigint,
                ordinal int,
                effect_type text,
                payload text,
                correlation_id uuid,
                created_at timestamp,
                attempts int,
                error_message text,
                dead_lettered_at timestamp
            )",
            "CREATE TABLE IF NOT EXISTS invoice_sequence (
                name text PRIMARY KEY,
                last_value bigint
            )",
        ];

        for ddl in tables {
            session
                .query_unpaged(ddl, &[])
                .await
                .map_err(StoreError::backend)?;
        }

        tracing::info!(keyspace = %keyspace, "📦 ScyllaDB schema ready");
        Ok(())
    }

    /// Move the stream version from `expected` to `new_version`.
    /// Returns the version actually found when the condition fails.
    async fn claim_sequence(
        &self,
        aggregate_id: Uuid,
        aggregate_type: &str,
        expected: i64,
        new_version: i64,
    ) -> Result<Result<(), i64>, StoreError> {
        let result = if expected == 0 {
            self.session
                .query_unpaged(
                    "INSERT INTO aggregate_sequence (aggregate_id, aggregate_type, current_sequence, updated_at)
                     VALUES (?, ?, ?, ?) IF NOT EXISTS",
                    (aggregate_id, aggregate_type, new_version, Utc::now()),
                )
                .await
        } else {
            self.session
                .query_unpaged(
                    "UPDATE aggregate_sequence SET current_sequence = ?, updated_at = ?
                     WHERE aggregate_id = ? IF current_sequence = ?",
                    (new_version, Utc::now(), aggregate_id, expected),
                )
                .await
        }
        .map_err(StoreError::backend)?;

        let row = lwt_row(result)?;
        if applied(&row) {
            return Ok(Ok(()));
        }

        let actual = row
            .columns
            .iter()
            .skip(1)
            .find_map(|col| match col {
                Some(CqlValue::BigInt(v)) => Some(*v),
                _ => None,
            })
            .unwrap_or(0);
        Ok(Err(actual))
    }

    /// Undo our sequence claim after a failed batch. Leaves the row alone
    /// if another writer has moved it since.
    async fn rewind_sequence(&self, aggregate_id: Uuid, expected: i64, claimed: i64) -> Result<(), StoreError> {
        let result = if expected == 0 {
            self.session.query_unpaged(DROP_SEQUENCE, (aggregate_id, claimed)).await
        } else {
            self.session
                .query_unpaged(REWIND_SEQUENCE, (expected, Utc::now(), aggregate_id, claimed))
                .await
        }
        .map_err(StoreError::backend)?;

        if applied(&lwt_row(result)?) {
            tracing::warn!(
                aggregate_id = %aggregate_id,
                from = claimed,
                to = expected,
                "↩️ Rewound stream sequence after failed event batch"
            );
        } else {
            tracing::error!(
                aggregate_id = %aggregate_id,
                claimed = claimed,
                "Stream sequence moved before it could be rewound"
            );
        }
        Ok(())
    }

    /// Highest sequence number actually written to event_store
    async fn stored_version(&self, aggregate_id: Uuid) -> Result<i64, StoreError> {
        let result = self
            .session
            .query_unpaged(
                "SELECT sequence_number FROM event_store
                 WHERE aggregate_id = ? ORDER BY sequence_number DESC LIMIT 1",
                (aggregate_id,),
            )
            .await
            .map_err(StoreError::backend)?;

        Ok(result
            .into_rows_result()
            .ok()
            .and_then(|rows| rows.maybe_first_row::<(i64,)>().ok().flatten())
            .map(|(v,)| v)
            .unwrap_or(0))
    }

    async fn outbox_rows(&self, cql: &str, values: impl SerializeRow) -> Result<Vec<OutboxEntry>, StoreError> {
        let result = self
            .session
            .query_unpaged(cql, values)
            .await
            .map_err(StoreError::backend)?;

        let rows = match result.into_rows_result() {
            Ok(rows) => rows,
            Err(_) => return Ok(Vec::new()),
        };

        let mut entries = Vec::new();
        for row in rows.rows::<OutboxRow>().map_err(StoreError::backend)? {
            let (id, aggregate_id, sequence_number, ordinal, effect_type, payload, correlation_id, created_at, attempts, status, claimed_at) =
                row.map_err(StoreError::backend)?;
            entries.push(OutboxEntry {
                id,
                aggregate_id,
                sequence_number,
                ordinal,
                effect_type,
                payload,
                correlation_id,
                created_at,
                attempts,
                status: OutboxStatus::parse(&status)?,
                claimed_at,
            });
        }
        Ok(entries)
    }
}

fn lwt_row(result: QueryResult) -> Result<Row, StoreError> {
    let rows = result.into_rows_result().map_err(StoreError::backend)?;
    rows.maybe_first_row::<Row>()
        .map_err(StoreError::backend)?
        .ok_or_else(|| StoreError::Backend("lightweight transaction returned no row".to_string()))
}

fn applied(row: &Row) -> bool {
    matches!(row.columns.first(), Some(Some(CqlValue::Boolean(true))))
}

#[async_trait]
impl EventStore for ScyllaStore {
    async fn append(
        &self,
        aggregate_id: Uuid,
        aggregate_type: &str,
        expected_version: i64,
        events: Vec<StoredEvent>,
        outbox: Vec<OutboxEntry>,
    ) -> Result<i64, StoreError> {
        if events.is_empty() {
            return Err(StoreError::Backend("cannot append empty event list".to_string()));
        }

        let new_version = expected_version + events.len() as i64;

        if let Err(actual) = self
            .claim_sequence(aggregate_id, aggregate_type, expected_version, new_version)
            .await?
        {
            tracing::warn!(
                aggregate_id = %aggregate_id,
                expected = expected_version,
                actual = actual,
                "⚠️ Stream version moved, append rejected"
            );
            return Err(StoreError::ConcurrencyConflict {
                aggregate_id,
                expected: expected_version,
                actual,
            });
        }

        let mut batch = Batch::default();
        let mut values: Vec<BatchRow> = Vec::with_capacity(events.len() + outbox.len());

        for (offset, event) in events.into_iter().enumerate() {
            batch.append_statement(INSERT_EVENT);
            values.push((
                aggregate_id,
                expected_version + offset as i64 + 1,
                event.event_version,
                event.event_id,
                event.event_type,
                event.payload,
                event.correlation_id,
                event.timestamp,
            ));
        }

        let effect_count = outbox.len();
        for entry in outbox {
            batch.append_statement(INSERT_OUTBOX);
            values.push((
                entry.aggregate_id,
                entry.sequence_number,
                entry.ordinal,
                entry.id,
                entry.effect_type,
                entry.payload,
                entry.correlation_id,
                entry.created_at,
            ));
        }

        if let Err(e) = self.session.batch(&batch, values).await {
            tracing::error!(
                aggregate_id = %aggregate_id,
                new_version = new_version,
                error = %e,
                "Event batch failed after sequence claim"
            );
            if self.stored_version(aggregate_id).await? != new_version {
                self.rewind_sequence(aggregate_id, expected_version, new_version).await?;
                return Err(StoreError::backend(e));
            }
            tracing::warn!(aggregate_id = %aggregate_id, "Event batch reported an error but was applied");
        }

        tracing::info!(
            aggregate_id = %aggregate_id,
            aggregate_type = %aggregate_type,
            new_version = new_version,
            effect_count = effect_count,
            "✅ Appended events to event store"
        );

        Ok(new_version)
    }

    async fn load_events(&self, aggregate_id: Uuid) -> Result<Vec<StoredEvent>, StoreError> {
        let aggregate_type = self
            .session
            .query_unpaged(
                "SELECT aggregate_type FROM aggregate_sequence WHERE aggregate_id = ?",
                (aggregate_id,),
            )
            .await
            .map_err(StoreError::backend)?
            .into_rows_result()
            .ok()
            .and_then(|rows| rows.maybe_first_row::<(Option<String>,)>().ok().flatten())
            .and_then(|(t,)| t)
            .unwrap_or_default();

        let result = self
            .session
            .query_unpaged(
                "SELECT sequence_number, event_id, event_type, event_version,
                        event_data, correlation_id, timestamp
                 FROM event_store
                 WHERE aggregate_id = ?
                 ORDER BY sequence_number ASC",
                (aggregate_id,),
            )
            .await
            .map_err(StoreError::backend)?;

        let rows = match result.into_rows_result() {
            Ok(rows) => rows,
            Err(_) => return Ok(Vec::new()),
        };

        let mut events = Vec::new();
        for row in rows
            .rows::<(i64, Uuid, String, i32, String, Uuid, DateTime<Utc>)>()
            .map_err(StoreError::backend)?
        {
            let (sequence_number, event_id, event_type, event_version, payload, correlation_id, timestamp) =
                row.map_err(StoreError::backend)?;
            events.push(StoredEvent {
                aggregate_id,
                aggregate_type: aggregate_type.clone(),
                sequence_number,
                event_id,
                event_type,
                event_version,
                payload,
                correlation_id,
                timestamp,
            });
        }

        tracing::debug!(aggregate_id = %aggregate_id, count = events.len(), "Loaded events");
        Ok(events)
    }

    async fn current_version(&self, aggregate_id: Uuid) -> Result<i64, StoreError> {
        let result = self
            .session
            .query_unpaged(
                "SELECT current_sequence FROM aggregate_sequence WHERE aggregate_id = ?",
                (aggregate_id,),
            )
            .await
            .map_err(StoreError::backend)?;

        let rows = match result.into_rows_result() {
            Ok(rows) => rows,
            Err(_) => return Ok(0),
        };

        match rows.maybe_first_row::<(i64,)>() {
            Ok(Some((version,))) => Ok(version),
            _ => Ok(0),
        }
    }

    async fn list_aggregates(&self, aggregate_type: &str) -> Result<Vec<Uuid>, StoreError> {
        let result = self
            .session
            .query_unpaged(
                "SELECT aggregate_id FROM aggregate_sequence WHERE aggregate_type = ? ALLOW FILTERING",
                (aggregate_type,),
            )
            .await
            .map_err(StoreError::backend)?;

        let rows = match result.into_rows_result() {
            Ok(rows) => rows,
            Err(_) => return Ok(Vec::new()),
        };

        let mut ids = Vec::new();
        for row in rows.rows::<(Uuid,)>().map_err(StoreError::backend)? {
            let (id,) = row.map_err(StoreError::backend)?;
            ids.push(id);
        }
        Ok(ids)
    }
}

#[async_trait]
impl OutboxStore for ScyllaStore {
    async fn pending(&self, limit: usize) -> Result<Vec<OutboxEntry>, StoreError> {
        let fetch = limit.clamp(1, i32::MAX as usize) as i32;
        let cutoff = Utc::now() - self.claim_lease;

        let mut entries = self.outbox_rows(SELECT_PENDING, (fetch,)).await?;
        entries.extend(self.outbox_rows(SELECT_EXPIRED_CLAIMS, (cutoff, fetch)).await?);

        entries.sort_by_key(|e| e.dispatch_key());
        entries.truncate(limit);
        Ok(entries)
    }

    async fn claim(&self, id: Uuid) -> Result<bool, StoreError> {
        let now = Utc::now();
        let fresh = self
            .session
            .query_unpaged(CLAIM_PENDING, (now, id))
            .await
            .map_err(StoreError::backend)?;
        if applied(&lwt_row(fresh)?) {
            return Ok(true);
        }

        let retaken = self
            .session
            .query_unpaged(RETAKE_EXPIRED, (now, id, now - self.claim_lease))
            .await
            .map_err(StoreError::backend)?;
        let won = applied(&lwt_row(retaken)?);
        if won {
            tracing::warn!(entry_id = %id, "Retaking outbox entry with expired claim");
        }
        Ok(won)
    }

    async fn complete(&self, id: Uuid) -> Result<(), StoreError> {
        let result = self
            .session
            .query_unpaged(COMPLETE_OUTBOX, (id,))
            .await
            .map_err(StoreError::backend)?;
        if !applied(&lwt_row(result)?) {
            tracing::debug!(entry_id = %id, "Outbox entry already settled");
        }
        Ok(())
    }

    async fn release(&self, id: Uuid, attempts: i32, error: &str) -> Result<(), StoreError> {
        let result = self
            .session
            .query_unpaged(RELEASE_OUTBOX, (attempts, error, id))
            .await
            .map_err(StoreError::backend)?;
        if !applied(&lwt_row(result)?) {
            tracing::debug!(entry_id = %id, "Outbox entry no longer in flight, release skipped");
        }
        Ok(())
    }

    async fn dead_letter(&self, entry: &OutboxEntry, error: &str) -> Result<(), StoreError> {
        tracing::error!(
            effect_id = %entry.id,
            effect_type = %entry.effect_type,
            aggregate_id = %entry.aggregate_id,
            attempts = entry.attempts,
            error = %error,
            "💀 Moving side effect to dead letter queue"
        );

        self.session
            .query_unpaged(
                "INSERT INTO dead_letter_queue (
                    id, aggregate_id, sequence_number, ordinal, effect_type, payload,
                    correlation_id, created_at, attempts, error_message, dead_lettered_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    entry.id,
                    entry.aggregate_id,
                    entry.sequence_number,
                    entry.ordinal,
                    &entry.effect_type,
                    &entry.payload,
                    entry.correlation_id,
                    entry.created_at,
                    entry.attempts,
                    error,
                    Utc::now(),
                ),
            )
            .await
            .map_err(StoreError::backend)?;

        self.session
            .query_unpaged(DROP_OUTBOX, (entry.id,))
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, StoreError> {
        let result = self
            .session
            .query_unpaged(
                "SELECT id, aggregate_id, sequence_number, ordinal, effect_type, payload,
                        correlation_id, created_at, attempts, error_message, dead_lettered_at
                 FROM dead_letter_queue LIMIT ?",
                (limit as i32,),
            )
            .await
            .map_err(StoreError::backend)?;

        let rows = match result.into_rows_result() {
            Ok(rows) => rows,
            Err(_) => return Ok(Vec::new()),
        };

        let mut dead = Vec::new();
        for row in rows
            .rows::<(Uuid, Uuid, i64, i32, String, String, Uuid, DateTime<Utc>, i32, String, DateTime<Utc>)>()
            .map_err(StoreError::backend)?
        {
            let (id, aggregate_id, sequence_number, ordinal, effect_type, payload, correlation_id, created_at, attempts, error_message, dead_lettered_at) =
                row.map_err(StoreError::backend)?;
            dead.push(DeadLetter {
                entry: OutboxEntry {
                    id,
                    aggregate_id,
                    sequence_number,
                    ordinal,
                    effect_type,
                    payload,
                    correlation_id,
                    created_at,
                    attempts,
                    status: OutboxStatus::Dead,
                    claimed_at: None,
                },
                error_message,
                dead_lettered_at,
            });
        }
        Ok(dead)
    }
}

#[async_trait]
impl InvoiceSequence for ScyllaStore {
    async fn next_invoice(&self) -> Result<u64, StoreError> {
        loop {
            let result = self
                .session
                .query_unpaged(
                    "SELECT last_value FROM invoice_sequence WHERE name = ?",
                    (INVOICE_COUNTER,),
                )
                .await
                .map_err(StoreError::backend)?;

            let current = result
                .into_rows_result()
                .ok()
                .and_then(|rows| rows.maybe_first_row::<(i64,)>().ok().flatten())
                .map(|(v,)| v);

            let next = current.unwrap_or(0) + 1;

            let attempt = match current {
                None => {
                    self.session
                        .query_unpaged(
                            "INSERT INTO invoice_sequence (name, last_value) VALUES (?, ?) IF NOT EXISTS",
                            (INVOICE_COUNTER, next),
                        )
                        .await
                }
                Some(value) => {
                    self.session
                        .query_unpaged(
                            "UPDATE invoice_sequence SET last_value = ? WHERE name = ? IF last_value = ?",
                            (next, INVOICE_COUNTER, value),
                        )
                        .await
                }
            }
            .map_err(StoreError::backend)?;

            if applied(&lwt_row(attempt)?) {
                return Ok(next as u64);
            }

            tracing::debug!(candidate = next, "Invoice number taken, retrying");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_applied_reads_first_column() {
        let won = Row {
            columns: vec![Some(CqlValue::Boolean(true))],
        };
        let lost = Row {
            columns: vec![Some(CqlValue::Boolean(false)), Some(CqlValue::BigInt(4))],
        };

        assert!(applied(&won));
        assert!(!applied(&lost));
    }

    #[test]
    fn test_outbox_insert_marks_rows_pending() {
        assert!(INSERT_OUTBOX.contains("'pending'"));
        assert_eq!(INSERT_EVENT.matches('?').count(), 8);
        assert_eq!(INSERT_OUTBOX.matches('?').count(), 8);
    }

    #[test]
    fn test_sequence_rewind_is_conditional_on_our_claim() {
        assert!(REWIND_SEQUENCE.ends_with("IF current_sequence = ?"));
        assert_eq!(REWIND_SEQUENCE.matches('?').count(), 4);
        assert!(DROP_SEQUENCE.starts_with("DELETE FROM aggregate_sequence"));
        assert!(DROP_SEQUENCE.ends_with("IF current_sequence = ?"));
    }

    #[test]
    fn test_outbox_writes_are_lightweight_transactions() {
        for cql in [CLAIM_PENDING, RETAKE_EXPIRED, COMPLETE_OUTBOX, RELEASE_OUTBOX] {
            assert!(cql.contains(" IF status = "), "{}", cql);
        }
        assert!(DROP_OUTBOX.ends_with("IF EXISTS"));
        assert!(RELEASE_OUTBOX.contains("claimed_at = null"));
    }

    #[test]
    fn test_pending_queries_push_the_limit_down() {
        assert!(SELECT_PENDING.contains("LIMIT ?"));
        assert!(SELECT_EXPIRED_CLAIMS.contains("claimed_at <= ?"));
        assert!(SELECT_EXPIRED_CLAIMS.contains("LIMIT ?"));
    }

    // Appends, claims and the invoice counter need a live ScyllaDB node and
    // are exercised against InMemoryStore in the unit and integration tests.
}
