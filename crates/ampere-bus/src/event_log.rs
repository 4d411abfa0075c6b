// Persisted event rows. The payload column holds the self-describing JSON
// form of the typed payload; rows that no longer parse are skipped on read.

use std::sync::Arc;

use rusqlite::{params, Connection, Row};

use ampere_store::{Database, StoreError, StoreResult};
use ampere_types::{AmpereEvent, EventClass, EventEnvelope, EventSource, Urgency};

#[derive(Debug, Default)]
pub struct EventBatch {
    pub events: Vec<EventEnvelope>,
    pub scanned: usize,
}

#[derive(Clone)]
pub struct EventLog {
    db: Arc<Database>,
}

impl EventLog {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn append(&self, envelope: &EventEnvelope) -> StoreResult<()> {
        let payload = serde_json::to_string(&envelope.payload)?;
        let envelope = envelope.clone();
        self.db
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT INTO event_log (event_id, event_type, event_class, timestamp, \
                     urgency, source_kind, source_id, payload) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        envelope.event_id,
                        envelope.event_type,
                        envelope.class.as_str(),
                        envelope.timestamp_ms,
                        envelope.urgency.as_str(),
                        envelope.source.kind_str(),
                        envelope.source.actor_id(),
                        payload,
                    ],
                )?;
                Ok(())
            })
            .await
    }

    /// Read one replay batch, ordered by `(timestamp, event_id)` for
    /// determinism. `until_ms` is inclusive. `scanned` counts rows the query
    /// visited, including rows skipped as unparseable, so pagination stays
    /// correct.
    pub async fn read_batch(
        &self,
        since_ms: i64,
        until_ms: i64,
        offset: usize,
        limit: usize,
    ) -> StoreResult<EventBatch> {
        self.db
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT event_id, event_type, event_class, timestamp, urgency, \
                     source_kind, source_id, payload \
                     FROM event_log WHERE timestamp >= ?1 AND timestamp <= ?2 \
                     ORDER BY timestamp, event_id LIMIT ?3 OFFSET ?4",
                )?;
                let rows = stmt.query_map(
                    params![since_ms, until_ms, limit as i64, offset as i64],
                    envelope_from_row,
                )?;
                let mut batch = EventBatch::default();
                for row in rows {
                    batch.scanned += 1;
                    if let Some(envelope) = row? {
                        batch.events.push(envelope);
                    }
                }
                Ok(batch)
            })
            .await
    }

    pub async fn count(&self) -> StoreResult<u64> {
        self.db
            .with_conn(|conn: &mut Connection| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM event_log", [], |row| row.get(0))?;
                Ok::<_, StoreError>(count as u64)
            })
            .await
    }
}

fn envelope_from_row(row: &Row<'_>) -> rusqlite::Result<Option<EventEnvelope>> {
    let event_id: String = row.get(0)?;
    let event_type: String = row.get(1)?;
    let class_raw: String = row.get(2)?;
    let timestamp_ms: i64 = row.get(3)?;
    let urgency_raw: String = row.get(4)?;
    let source_kind: String = row.get(5)?;
    let source_id: Option<String> = row.get(6)?;
    let payload_raw: String = row.get(7)?;

    let Some(class) = EventClass::parse(&class_raw) else {
        tracing::warn!("skipping event {} with unknown class {}", event_id, class_raw);
        return Ok(None);
    };
    let Some(urgency) = Urgency::parse(&urgency_raw) else {
        tracing::warn!("skipping event {} with unknown urgency {}", event_id, urgency_raw);
        return Ok(None);
    };
    let source = match (source_kind.as_str(), source_id) {
        ("agent", Some(id)) => EventSource::Agent { id },
        ("human", Some(id)) => EventSource::Human { id },
        ("system", _) => EventSource::System,
        (kind, _) => {
            tracing::warn!("skipping event {} with unknown source kind {}", event_id, kind);
            return Ok(None);
        }
    };
    let payload: AmpereEvent = match serde_json::from_str(&payload_raw) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::warn!("skipping unparseable event {}: {}", event_id, err);
            return Ok(None);
        }
    };

    Ok(Some(EventEnvelope {
        event_id,
        event_type,
        class,
        timestamp_ms,
        source,
        urgency,
        payload,
    }))
}
