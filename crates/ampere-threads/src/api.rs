// Thread and message rows plus the escalation state machine. Threads and
// tickets reference each other by id only; lookups always go through a
// repository.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rusqlite::{params, OptionalExtension, Row};
use thiserror::Error;

use ampere_bus::{BusError, EventBus};
use ampere_store::{Database, StoreError};
use ampere_types::{
    AmpereEvent, EventEnvelope, EventSource, Message, MessageThread, ThreadChannel, ThreadStatus,
    Urgency,
};

#[derive(Error, Debug)]
pub enum ThreadError {
    #[error("thread not found: {id}")]
    ThreadNotFound { id: String },

    #[error("{0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(#[from] StoreError),

    #[error("event bus error: {0}")]
    Bus(#[from] BusError),
}

impl From<rusqlite::Error> for ThreadError {
    fn from(err: rusqlite::Error) -> Self {
        ThreadError::Database(StoreError::Sqlite(err))
    }
}

pub type ThreadResult<T> = Result<T, ThreadError>;

#[derive(Clone)]
pub struct MessageThreadApi {
    db: Arc<Database>,
    bus: EventBus,
}

impl MessageThreadApi {
    pub fn new(db: Arc<Database>, bus: EventBus) -> Self {
        Self { db, bus }
    }

    pub async fn create_thread(
        &self,
        participants: BTreeSet<String>,
        channel: ThreadChannel,
        initial_author: EventSource,
        initial_message: impl Into<String>,
    ) -> ThreadResult<MessageThread> {
        let thread = MessageThread::new(participants, channel);
        let message = Message::new(&thread.id, initial_author, initial_message);
        let stored = thread.clone();
        self.db
            .with_tx(move |tx| {
                tx.execute(
                    "INSERT INTO message_thread (id, channel, status, ticket_id, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        stored.id,
                        stored.channel.as_str(),
                        stored.status.as_str(),
                        stored.ticket_id,
                        stored.created_at_ms,
                    ],
                )?;
                for participant in &stored.participants {
                    tx.execute(
                        "INSERT OR IGNORE INTO thread_participant (thread_id, agent_id) \
                         VALUES (?1, ?2)",
                        params![stored.id, participant],
                    )?;
                }
                insert_message(tx, &message)?;
                Ok::<(), ThreadError>(())
            })
            .await?;
        Ok(thread)
    }

    /// Bind a thread to the ticket it belongs to. Id reference only.
    pub async fn attach_ticket(&self, thread_id: &str, ticket_id: &str) -> ThreadResult<()> {
        let thread_id = thread_id.to_string();
        let ticket_id = ticket_id.to_string();
        self.db
            .with_conn(move |conn| {
                let updated = conn.execute(
                    "UPDATE message_thread SET ticket_id = ?1 WHERE id = ?2",
                    params![ticket_id, thread_id],
                )?;
                if updated == 0 {
                    return Err(ThreadError::ThreadNotFound { id: thread_id });
                }
                Ok(())
            })
            .await
    }

    /// Append a message. Rejected while the thread is waiting for a human
    /// unless the author is one, and always rejected on closed threads.
    pub async fn post_message(
        &self,
        thread_id: &str,
        author: EventSource,
        content: impl Into<String>,
    ) -> ThreadResult<Message> {
        let thread = self.get_thread(thread_id).await?;
        if !thread.accepts_message_from(&author) {
            return Err(ThreadError::Validation(format!(
                "thread {} does not accept messages from {} while {}",
                thread.id,
                author.kind_str(),
                thread.status.as_str(),
            )));
        }
        let message = Message::new(thread_id, author, content);
        let stored = message.clone();
        self.db
            .with_conn(move |conn| insert_message(conn, &stored))
            .await?;
        Ok(message)
    }

    /// Park the thread on a human and announce the escalation. The posted
    /// message carries the context map so a human reading the thread sees
    /// what was known at escalation time.
    pub async fn escalate_to_human(
        &self,
        thread_id: &str,
        requested_by: EventSource,
        reason: &str,
        context: BTreeMap<String, String>,
    ) -> ThreadResult<()> {
        let thread = self.get_thread(thread_id).await?;
        let mut lines = vec![format!("Escalation requested: {reason}")];
        for (key, value) in &context {
            lines.push(format!("  {key}: {value}"));
        }
        let message = Message::new(thread_id, EventSource::System, lines.join("\n"));
        let thread_id_owned = thread.id.clone();
        self.db
            .with_tx(move |tx| {
                tx.execute(
                    "UPDATE message_thread SET status = ?1 WHERE id = ?2",
                    params![ThreadStatus::WaitingForHuman.as_str(), thread_id_owned],
                )?;
                insert_message(tx, &message)?;
                Ok::<_, ThreadError>(())
            })
            .await?;

        let requested_by_id = requested_by
            .actor_id()
            .unwrap_or("system")
            .to_string();
        self.bus
            .publish(EventEnvelope::new(
                requested_by,
                Urgency::High,
                AmpereEvent::EscalationRequested {
                    thread_id: thread.id,
                    requested_by: requested_by_id,
                    reason: reason.to_string(),
                    context,
                },
            ))
            .await?;
        Ok(())
    }

    /// Idempotent: an already-open thread is left untouched and nothing is
    /// published.
    pub async fn reopen_thread(&self, thread_id: &str) -> ThreadResult<()> {
        let thread = self.get_thread(thread_id).await?;
        if thread.status == ThreadStatus::Open {
            return Ok(());
        }
        let thread_id = thread.id;
        self.db
            .with_conn(move |conn| {
                conn.execute(
                    "UPDATE message_thread SET status = ?1 WHERE id = ?2",
                    params![ThreadStatus::Open.as_str(), thread_id],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn close_thread(&self, thread_id: &str) -> ThreadResult<()> {
        let thread = self.get_thread(thread_id).await?;
        let thread_id = thread.id;
        self.db
            .with_conn(move |conn| {
                conn.execute(
                    "UPDATE message_thread SET status = ?1 WHERE id = ?2",
                    params![ThreadStatus::Closed.as_str(), thread_id],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn get_thread(&self, thread_id: &str) -> ThreadResult<MessageThread> {
        let id = thread_id.to_string();
        self.db
            .with_conn(move |conn| {
                let thread = conn
                    .query_row(
                        "SELECT id, channel, status, ticket_id, created_at FROM message_thread \
                         WHERE id = ?1",
                        params![id],
                        thread_from_row,
                    )
                    .optional()?
                    .ok_or(ThreadError::ThreadNotFound { id })?;
                load_participants(conn, thread)
            })
            .await
    }

    pub async fn find_thread_for_ticket(
        &self,
        ticket_id: &str,
    ) -> ThreadResult<Option<MessageThread>> {
        let ticket_id = ticket_id.to_string();
        self.db
            .with_conn(move |conn| {
                let thread = conn
                    .query_row(
                        "SELECT id, channel, status, ticket_id, created_at FROM message_thread \
                         WHERE ticket_id = ?1 ORDER BY created_at LIMIT 1",
                        params![ticket_id],
                        thread_from_row,
                    )
                    .optional()?;
                match thread {
                    Some(thread) => Ok(Some(load_participants(conn, thread)?)),
                    None => Ok(None),
                }
            })
            .await
    }

    pub async fn get_all_threads(&self) -> ThreadResult<Vec<MessageThread>> {
        self.db
            .with_conn(|conn| {
                let threads = {
                    let mut stmt = conn.prepare(
                        "SELECT id, channel, status, ticket_id, created_at FROM message_thread \
                         ORDER BY created_at, id",
                    )?;
                    let rows = stmt.query_map([], thread_from_row)?;
                    let mut out = Vec::new();
                    for row in rows {
                        out.push(row?);
                    }
                    out
                };
                let mut out = Vec::with_capacity(threads.len());
                for thread in threads {
                    out.push(load_participants(conn, thread)?);
                }
                Ok(out)
            })
            .await
    }

    pub async fn get_messages(&self, thread_id: &str) -> ThreadResult<Vec<Message>> {
        let thread_id = thread_id.to_string();
        self.db
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, thread_id, author_kind, author_id, content, timestamp \
                     FROM message WHERE thread_id = ?1 ORDER BY timestamp, id",
                )?;
                let rows = stmt.query_map(params![thread_id], message_from_row)?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok(out)
            })
            .await
    }
}

fn insert_message(conn: &rusqlite::Connection, message: &Message) -> Result<(), ThreadError> {
    conn.execute(
        "INSERT INTO message (id, thread_id, author_kind, author_id, content, timestamp) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            message.id,
            message.thread_id,
            message.author.kind_str(),
            message.author.actor_id(),
            message.content,
            message.timestamp_ms,
        ],
    )?;
    Ok(())
}

fn thread_from_row(row: &Row<'_>) -> rusqlite::Result<MessageThread> {
    let channel_raw: String = row.get(1)?;
    let status_raw: String = row.get(2)?;
    Ok(MessageThread {
        id: row.get(0)?,
        participants: BTreeSet::new(),
        channel: ThreadChannel::parse(&channel_raw).unwrap_or(ThreadChannel::EngineeringPublic),
        status: ThreadStatus::parse(&status_raw).unwrap_or(ThreadStatus::Open),
        ticket_id: row.get(3)?,
        created_at_ms: row.get(4)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let author_kind: String = row.get(2)?;
    let author_id: Option<String> = row.get(3)?;
    let author = match (author_kind.as_str(), author_id) {
        ("agent", Some(id)) => EventSource::Agent { id },
        ("human", Some(id)) => EventSource::Human { id },
        _ => EventSource::System,
    };
    Ok(Message {
        id: row.get(0)?,
        thread_id: row.get(1)?,
        author,
        content: row.get(4)?,
        timestamp_ms: row.get(5)?,
    })
}

fn load_participants(
    conn: &rusqlite::Connection,
    mut thread: MessageThread,
) -> Result<MessageThread, ThreadError> {
    let mut stmt =
        conn.prepare("SELECT agent_id FROM thread_participant WHERE thread_id = ?1")?;
    let rows = stmt.query_map(params![thread.id], |row| row.get::<_, String>(0))?;
    for row in rows {
        thread.participants.insert(row?);
    }
    Ok(thread)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn api() -> MessageThreadApi {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let bus = EventBus::new(db.clone());
        MessageThreadApi::new(db, bus)
    }

    async fn open_thread(api: &MessageThreadApi) -> MessageThread {
        api.create_thread(
            BTreeSet::from(["pm".to_string()]),
            ThreadChannel::EngineeringPublic,
            EventSource::agent("pm"),
            "kickoff",
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn create_thread_persists_initial_message_and_participants() {
        let api = api().await;
        let thread = open_thread(&api).await;
        let read = api.get_thread(&thread.id).await.unwrap();
        assert_eq!(read.status, ThreadStatus::Open);
        assert!(read.participants.contains("pm"));
        let messages = api.get_messages(&thread.id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "kickoff");
    }

    #[tokio::test]
    async fn waiting_thread_rejects_agent_posts_but_accepts_humans() {
        let api = api().await;
        let thread = open_thread(&api).await;
        api.escalate_to_human(
            &thread.id,
            EventSource::agent("eng"),
            "need a decision",
            BTreeMap::new(),
        )
        .await
        .unwrap();

        let err = api
            .post_message(&thread.id, EventSource::agent("eng"), "hello?")
            .await
            .unwrap_err();
        assert!(matches!(err, ThreadError::Validation(_)));

        api.post_message(&thread.id, EventSource::human("alice"), "on it")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn escalation_posts_structured_message_and_event() {
        let api = api().await;
        let thread = open_thread(&api).await;
        let context = BTreeMap::from([
            ("ticketId".to_string(), "t-1".to_string()),
            ("priority".to_string(), "high".to_string()),
        ]);
        api.escalate_to_human(
            &thread.id,
            EventSource::agent("eng"),
            "architecture decision needed",
            context,
        )
        .await
        .unwrap();

        let read = api.get_thread(&thread.id).await.unwrap();
        assert_eq!(read.status, ThreadStatus::WaitingForHuman);

        let messages = api.get_messages(&thread.id).await.unwrap();
        let escalation = messages.last().unwrap();
        assert!(escalation.content.contains("architecture decision needed"));
        assert!(escalation.content.contains("ticketId: t-1"));
    }

    #[tokio::test]
    async fn reopen_is_idempotent() {
        let api = api().await;
        let thread = open_thread(&api).await;

        // no-op on an open thread
        api.reopen_thread(&thread.id).await.unwrap();
        assert_eq!(
            api.get_thread(&thread.id).await.unwrap().status,
            ThreadStatus::Open
        );

        api.escalate_to_human(&thread.id, EventSource::agent("eng"), "help", BTreeMap::new())
            .await
            .unwrap();
        api.reopen_thread(&thread.id).await.unwrap();
        assert_eq!(
            api.get_thread(&thread.id).await.unwrap().status,
            ThreadStatus::Open
        );

        api.post_message(&thread.id, EventSource::agent("eng"), "resuming")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn closed_thread_rejects_everyone() {
        let api = api().await;
        let thread = open_thread(&api).await;
        api.close_thread(&thread.id).await.unwrap();
        let err = api
            .post_message(&thread.id, EventSource::human("alice"), "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, ThreadError::Validation(_)));
    }

    #[tokio::test]
    async fn threads_are_found_by_ticket_id() {
        let api = api().await;
        let thread = open_thread(&api).await;
        api.attach_ticket(&thread.id, "t-9").await.unwrap();
        let found = api.find_thread_for_ticket("t-9").await.unwrap().unwrap();
        assert_eq!(found.id, thread.id);
        assert!(api.find_thread_for_ticket("t-0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_thread_reports_not_found() {
        let api = api().await;
        let err = api.get_thread("nope").await.unwrap_err();
        assert!(matches!(err, ThreadError::ThreadNotFound { .. }));
    }
}
