// Ticket rows and their status state machine. Reads and writes go through
// the shared connection lock, so concurrent mutations of one ticket are
// serialized; status updates re-read the current row inside the transaction
// before validating the edge.

use std::sync::Arc;

use rusqlite::{params, OptionalExtension, Row};
use thiserror::Error;

use ampere_store::{Database, StoreError};
use ampere_types::{now_ms, Ticket, TicketPriority, TicketStatus, TicketType};

#[derive(Error, Debug)]
pub enum TicketError {
    #[error("invalid ticket status transition: {from} -> {to}")]
    InvalidStateTransition { from: TicketStatus, to: TicketStatus },

    #[error("ticket not found: {id}")]
    TicketNotFound { id: String },

    #[error("database error: {0}")]
    Database(#[from] StoreError),

    #[error("{0}")]
    Validation(String),
}

impl From<rusqlite::Error> for TicketError {
    fn from(err: rusqlite::Error) -> Self {
        TicketError::Database(StoreError::Sqlite(err))
    }
}

pub type TicketResult<T> = Result<T, TicketError>;

/// Partial update for [`TicketRepository::update_ticket_details`]. `None`
/// leaves a field untouched; `due_date_ms: Some(None)` clears the deadline.
#[derive(Debug, Clone, Default)]
pub struct TicketPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub ticket_type: Option<TicketType>,
    pub priority: Option<TicketPriority>,
    pub due_date_ms: Option<Option<i64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TicketMeeting {
    pub ticket_id: String,
    pub meeting_id: String,
    pub created_at_ms: i64,
}

#[derive(Clone)]
pub struct TicketRepository {
    db: Arc<Database>,
}

impl TicketRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn create_ticket(&self, ticket: &Ticket) -> TicketResult<()> {
        if ticket.title.trim().is_empty() {
            return Err(TicketError::Validation("ticket title must not be blank".into()));
        }
        let ticket = ticket.clone();
        self.db
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT INTO ticket (id, title, description, ticket_type, priority, status, \
                     assigned_agent_id, created_by_agent_id, created_at, updated_at, due_date) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        ticket.id,
                        ticket.title,
                        ticket.description,
                        ticket.ticket_type.as_str(),
                        ticket.priority.as_str(),
                        ticket.status.as_str(),
                        ticket.assigned_agent_id,
                        ticket.created_by_agent_id,
                        ticket.created_at_ms,
                        ticket.updated_at_ms,
                        ticket.due_date_ms,
                    ],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn delete_ticket(&self, id: &str) -> TicketResult<()> {
        let id = id.to_string();
        self.db
            .with_tx(move |tx| {
                let deleted = tx.execute("DELETE FROM ticket WHERE id = ?1", params![id])?;
                if deleted == 0 {
                    return Err(TicketError::TicketNotFound { id: id.clone() });
                }
                tx.execute("DELETE FROM ticket_meeting WHERE ticket_id = ?1", params![id])?;
                Ok(())
            })
            .await
    }

    pub async fn get_ticket(&self, id: &str) -> TicketResult<Ticket> {
        let id = id.to_string();
        self.db
            .with_conn(move |conn| {
                conn.query_row(
                    &format!("{TICKET_SELECT} WHERE id = ?1"),
                    params![id],
                    ticket_from_row,
                )
                .optional()?
                .ok_or(TicketError::TicketNotFound { id })
            })
            .await
    }

    pub async fn get_all_tickets(&self) -> TicketResult<Vec<Ticket>> {
        self.db
            .with_conn(|conn| {
                let mut stmt =
                    conn.prepare(&format!("{TICKET_SELECT} ORDER BY created_at, id"))?;
                let rows = stmt.query_map([], ticket_from_row)?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok(out)
            })
            .await
    }

    /// Validated status move. Reads the current status, verifies the edge
    /// exists in the transition graph, then updates with a fresh
    /// `updated_at`.
    pub async fn update_status(&self, id: &str, new: TicketStatus) -> TicketResult<Ticket> {
        let id = id.to_string();
        self.db
            .with_tx(move |tx| {
                let ticket = tx
                    .query_row(
                        &format!("{TICKET_SELECT} WHERE id = ?1"),
                        params![id],
                        ticket_from_row,
                    )
                    .optional()?
                    .ok_or_else(|| TicketError::TicketNotFound { id: id.clone() })?;
                if !ticket.status.can_transition_to(new) {
                    return Err(TicketError::InvalidStateTransition {
                        from: ticket.status,
                        to: new,
                    });
                }
                let updated_at = now_ms().max(ticket.updated_at_ms + 1);
                tx.execute(
                    "UPDATE ticket SET status = ?1, updated_at = ?2 WHERE id = ?3",
                    params![new.as_str(), updated_at, id],
                )?;
                Ok(Ticket {
                    status: new,
                    updated_at_ms: updated_at,
                    ..ticket
                })
            })
            .await
    }

    /// Writes `assigned_agent_id`; `None` unassigns.
    pub async fn assign_ticket(&self, id: &str, agent_id: Option<&str>) -> TicketResult<Ticket> {
        let id = id.to_string();
        let agent_id = agent_id.map(str::to_string);
        self.db
            .with_tx(move |tx| {
                let ticket = tx
                    .query_row(
                        &format!("{TICKET_SELECT} WHERE id = ?1"),
                        params![id],
                        ticket_from_row,
                    )
                    .optional()?
                    .ok_or_else(|| TicketError::TicketNotFound { id: id.clone() })?;
                let updated_at = now_ms().max(ticket.updated_at_ms + 1);
                tx.execute(
                    "UPDATE ticket SET assigned_agent_id = ?1, updated_at = ?2 WHERE id = ?3",
                    params![agent_id, updated_at, id],
                )?;
                Ok(Ticket {
                    assigned_agent_id: agent_id,
                    updated_at_ms: updated_at,
                    ..ticket
                })
            })
            .await
    }

    /// Partial update; unspecified fields are preserved.
    pub async fn update_ticket_details(&self, id: &str, patch: TicketPatch) -> TicketResult<Ticket> {
        if let Some(title) = &patch.title {
            if title.trim().is_empty() {
                return Err(TicketError::Validation("ticket title must not be blank".into()));
            }
        }
        let id = id.to_string();
        self.db
            .with_tx(move |tx| {
                let ticket = tx
                    .query_row(
                        &format!("{TICKET_SELECT} WHERE id = ?1"),
                        params![id],
                        ticket_from_row,
                    )
                    .optional()?
                    .ok_or_else(|| TicketError::TicketNotFound { id: id.clone() })?;
                let next = Ticket {
                    title: patch.title.unwrap_or(ticket.title),
                    description: patch.description.unwrap_or(ticket.description),
                    ticket_type: patch.ticket_type.unwrap_or(ticket.ticket_type),
                    priority: patch.priority.unwrap_or(ticket.priority),
                    due_date_ms: patch.due_date_ms.unwrap_or(ticket.due_date_ms),
                    updated_at_ms: now_ms().max(ticket.updated_at_ms + 1),
                    ..ticket
                };
                tx.execute(
                    "UPDATE ticket SET title = ?1, description = ?2, ticket_type = ?3, \
                     priority = ?4, due_date = ?5, updated_at = ?6 WHERE id = ?7",
                    params![
                        next.title,
                        next.description,
                        next.ticket_type.as_str(),
                        next.priority.as_str(),
                        next.due_date_ms,
                        next.updated_at_ms,
                        id,
                    ],
                )?;
                Ok(next)
            })
            .await
    }

    pub async fn link_meeting(&self, ticket_id: &str, meeting_id: &str) -> TicketResult<()> {
        let ticket_id = ticket_id.to_string();
        let meeting_id = meeting_id.to_string();
        self.db
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO ticket_meeting (ticket_id, meeting_id, created_at) \
                     VALUES (?1, ?2, ?3)",
                    params![ticket_id, meeting_id, now_ms()],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn meetings_for_ticket(&self, ticket_id: &str) -> TicketResult<Vec<TicketMeeting>> {
        let ticket_id = ticket_id.to_string();
        self.db
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT ticket_id, meeting_id, created_at FROM ticket_meeting \
                     WHERE ticket_id = ?1 ORDER BY created_at, meeting_id",
                )?;
                let rows = stmt.query_map(params![ticket_id], |row| {
                    Ok(TicketMeeting {
                        ticket_id: row.get(0)?,
                        meeting_id: row.get(1)?,
                        created_at_ms: row.get(2)?,
                    })
                })?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok(out)
            })
            .await
    }

    pub(crate) fn db(&self) -> &Arc<Database> {
        &self.db
    }
}

pub(crate) const TICKET_SELECT: &str =
    "SELECT id, title, description, ticket_type, priority, status, \
     assigned_agent_id, created_by_agent_id, created_at, updated_at, due_date FROM ticket";

pub(crate) fn ticket_from_row(row: &Row<'_>) -> rusqlite::Result<Ticket> {
    let type_raw: String = row.get(3)?;
    let priority_raw: String = row.get(4)?;
    let status_raw: String = row.get(5)?;
    Ok(Ticket {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        ticket_type: TicketType::parse(&type_raw).unwrap_or(TicketType::Task),
        priority: TicketPriority::parse(&priority_raw).unwrap_or(TicketPriority::Medium),
        status: TicketStatus::parse(&status_raw).unwrap_or(TicketStatus::Backlog),
        assigned_agent_id: row.get(6)?,
        created_by_agent_id: row.get(7)?,
        created_at_ms: row.get(8)?,
        updated_at_ms: row.get(9)?,
        due_date_ms: row.get(10)?,
    })
}
