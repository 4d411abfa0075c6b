// Read-only reporting over ticket rows. A ticket is overdue when its due
// date is in the past and it is not Done.

use std::collections::BTreeMap;

use rusqlite::params;

use ampere_types::{now_ms, Ticket, TicketStatus};

use crate::repository::{ticket_from_row, TicketRepository, TicketResult, TICKET_SELECT};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BacklogSummary {
    pub total: u64,
    pub open: u64,
    pub by_status: BTreeMap<String, u64>,
    pub by_priority: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentWorkload {
    pub agent_id: String,
    pub total_assigned: u64,
    pub in_progress: u64,
    pub blocked: u64,
    pub in_review: u64,
    pub overdue: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeadlineEntry {
    pub ticket: Ticket,
    pub due_date_ms: i64,
    pub overdue: bool,
}

impl TicketRepository {
    pub async fn backlog_summary(&self) -> TicketResult<BacklogSummary> {
        self.db()
            .with_conn(|conn| {
                let mut summary = BacklogSummary::default();
                let mut stmt =
                    conn.prepare("SELECT status, priority, COUNT(*) FROM ticket GROUP BY status, priority")?;
                let rows = stmt.query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                })?;
                for row in rows {
                    let (status, priority, count) = row?;
                    let count = count as u64;
                    summary.total += count;
                    let terminal = matches!(
                        TicketStatus::parse(&status),
                        Some(s) if s.is_terminal()
                    );
                    if !terminal {
                        summary.open += count;
                    }
                    *summary.by_status.entry(status).or_default() += count;
                    *summary.by_priority.entry(priority).or_default() += count;
                }
                Ok(summary)
            })
            .await
    }

    pub async fn agent_workload(&self, agent_id: &str) -> TicketResult<AgentWorkload> {
        let agent_id = agent_id.to_string();
        let now = now_ms();
        self.db()
            .with_conn(move |conn| {
                let mut workload = AgentWorkload {
                    agent_id: agent_id.clone(),
                    ..AgentWorkload::default()
                };
                let mut stmt =
                    conn.prepare(&format!("{TICKET_SELECT} WHERE assigned_agent_id = ?1"))?;
                let rows = stmt.query_map(params![agent_id], ticket_from_row)?;
                for row in rows {
                    let ticket = row?;
                    workload.total_assigned += 1;
                    match ticket.status {
                        TicketStatus::InProgress => workload.in_progress += 1,
                        TicketStatus::Blocked => workload.blocked += 1,
                        TicketStatus::InReview => workload.in_review += 1,
                        _ => {}
                    }
                    if ticket.is_overdue(now) {
                        workload.overdue += 1;
                    }
                }
                Ok(workload)
            })
            .await
    }

    /// Tickets with a due date inside the next `days` days, plus anything
    /// already overdue. Terminal tickets are excluded; ordered by due date.
    pub async fn upcoming_deadlines(&self, days: u32) -> TicketResult<Vec<DeadlineEntry>> {
        let now = now_ms();
        let horizon = now + i64::from(days) * 86_400_000;
        self.db()
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "{TICKET_SELECT} WHERE due_date IS NOT NULL AND due_date <= ?1 \
                     AND status NOT IN ('done', 'cancelled') ORDER BY due_date, id"
                ))?;
                let rows = stmt.query_map(params![horizon], ticket_from_row)?;
                let mut out = Vec::new();
                for row in rows {
                    let ticket = row?;
                    let due_date_ms = ticket.due_date_ms.unwrap_or_default();
                    let overdue = ticket.is_overdue(now);
                    out.push(DeadlineEntry {
                        ticket,
                        due_date_ms,
                        overdue,
                    });
                }
                Ok(out)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use ampere_store::Database;
    use ampere_types::{Ticket, TicketPriority, TicketType};

    async fn repo() -> TicketRepository {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        TicketRepository::new(db)
    }

    fn ticket(title: &str, priority: TicketPriority) -> Ticket {
        Ticket::new(title, "d", TicketType::Task, priority, "pm")
    }

    #[tokio::test]
    async fn backlog_summary_counts_by_status_and_priority() {
        let repo = repo().await;
        repo.create_ticket(&ticket("a", TicketPriority::Low)).await.unwrap();
        repo.create_ticket(&ticket("b", TicketPriority::High)).await.unwrap();
        let done = ticket("c", TicketPriority::High);
        repo.create_ticket(&done).await.unwrap();
        repo.update_status(&done.id, TicketStatus::Cancelled).await.unwrap();

        let summary = repo.backlog_summary().await.unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.open, 2);
        assert_eq!(summary.by_status.get("backlog"), Some(&2));
        assert_eq!(summary.by_status.get("cancelled"), Some(&1));
        assert_eq!(summary.by_priority.get("high"), Some(&2));
    }

    #[tokio::test]
    async fn agent_workload_counts_active_states() {
        let repo = repo().await;
        let a = ticket("a", TicketPriority::Medium);
        repo.create_ticket(&a).await.unwrap();
        repo.assign_ticket(&a.id, Some("eng")).await.unwrap();
        repo.update_status(&a.id, TicketStatus::Ready).await.unwrap();
        repo.update_status(&a.id, TicketStatus::InProgress).await.unwrap();

        let b = ticket("b", TicketPriority::Medium);
        repo.create_ticket(&b).await.unwrap();
        repo.assign_ticket(&b.id, Some("eng")).await.unwrap();

        let workload = repo.agent_workload("eng").await.unwrap();
        assert_eq!(workload.total_assigned, 2);
        assert_eq!(workload.in_progress, 1);
        assert_eq!(workload.blocked, 0);
    }

    #[tokio::test]
    async fn deadlines_include_overdue_and_exclude_terminal() {
        let repo = repo().await;
        let now = now_ms();

        let mut overdue = ticket("late", TicketPriority::High);
        overdue.due_date_ms = Some(now - 1_000);
        repo.create_ticket(&overdue).await.unwrap();

        let mut soon = ticket("soon", TicketPriority::Low);
        soon.due_date_ms = Some(now + 86_400_000);
        repo.create_ticket(&soon).await.unwrap();

        let mut finished = ticket("finished", TicketPriority::Low);
        finished.due_date_ms = Some(now + 3_600_000);
        repo.create_ticket(&finished).await.unwrap();
        repo.update_status(&finished.id, TicketStatus::Cancelled).await.unwrap();

        let deadlines = repo.upcoming_deadlines(7).await.unwrap();
        assert_eq!(deadlines.len(), 2);
        assert_eq!(deadlines[0].ticket.title, "late");
        assert!(deadlines[0].overdue);
        assert!(!deadlines[1].overdue);
    }
}
