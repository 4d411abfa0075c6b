use serde::{Deserialize, Serialize};

use crate::event::Urgency;
use crate::id::{fresh_id, now_ms};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketType {
    Task,
    Feature,
    Bug,
    Chore,
    Epic,
}

impl TicketType {
    pub fn as_str(self) -> &'static str {
        match self {
            TicketType::Task => "task",
            TicketType::Feature => "feature",
            TicketType::Bug => "bug",
            TicketType::Chore => "chore",
            TicketType::Epic => "epic",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "task" => Some(TicketType::Task),
            "feature" => Some(TicketType::Feature),
            "bug" => Some(TicketType::Bug),
            "chore" => Some(TicketType::Chore),
            "epic" => Some(TicketType::Epic),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl TicketPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            TicketPriority::Low => "low",
            TicketPriority::Medium => "medium",
            TicketPriority::High => "high",
            TicketPriority::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(TicketPriority::Low),
            "medium" => Some(TicketPriority::Medium),
            "high" => Some(TicketPriority::High),
            "critical" => Some(TicketPriority::Critical),
            _ => None,
        }
    }

    /// Event urgency carried by ticket lifecycle events. Critical tickets
    /// publish at high urgency, not critical; critical urgency is reserved
    /// for system-level events.
    pub fn to_urgency(self) -> Urgency {
        match self {
            TicketPriority::Low => Urgency::Low,
            TicketPriority::Medium => Urgency::Medium,
            TicketPriority::High | TicketPriority::Critical => Urgency::High,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Backlog,
    Ready,
    InProgress,
    Blocked,
    InReview,
    Done,
    Cancelled,
}

impl TicketStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TicketStatus::Backlog => "backlog",
            TicketStatus::Ready => "ready",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::Blocked => "blocked",
            TicketStatus::InReview => "in_review",
            TicketStatus::Done => "done",
            TicketStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "backlog" => Some(TicketStatus::Backlog),
            "ready" => Some(TicketStatus::Ready),
            "in_progress" => Some(TicketStatus::InProgress),
            "blocked" => Some(TicketStatus::Blocked),
            "in_review" => Some(TicketStatus::InReview),
            "done" => Some(TicketStatus::Done),
            "cancelled" => Some(TicketStatus::Cancelled),
            _ => None,
        }
    }

    /// The outgoing edges of the status graph. Done and Cancelled are
    /// terminal.
    pub fn allowed_transitions(self) -> &'static [TicketStatus] {
        match self {
            TicketStatus::Backlog => &[TicketStatus::Ready, TicketStatus::Cancelled],
            TicketStatus::Ready => &[
                TicketStatus::InProgress,
                TicketStatus::Backlog,
                TicketStatus::Cancelled,
            ],
            TicketStatus::InProgress => &[
                TicketStatus::Blocked,
                TicketStatus::InReview,
                TicketStatus::Done,
                TicketStatus::Cancelled,
            ],
            TicketStatus::Blocked => &[TicketStatus::InProgress, TicketStatus::Cancelled],
            TicketStatus::InReview => &[
                TicketStatus::InProgress,
                TicketStatus::Done,
                TicketStatus::Cancelled,
            ],
            TicketStatus::Done | TicketStatus::Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, next: TicketStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_transitions().is_empty()
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub title: String,
    pub description: String,
    pub ticket_type: TicketType,
    pub priority: TicketPriority,
    pub status: TicketStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_agent_id: Option<String>,
    pub created_by_agent_id: String,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date_ms: Option<i64>,
}

impl Ticket {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        ticket_type: TicketType,
        priority: TicketPriority,
        created_by: impl Into<String>,
    ) -> Self {
        let now = now_ms();
        Self {
            id: fresh_id(),
            title: title.into(),
            description: description.into(),
            ticket_type,
            priority,
            status: TicketStatus::Backlog,
            assigned_agent_id: None,
            created_by_agent_id: created_by.into(),
            created_at_ms: now,
            updated_at_ms: now,
            due_date_ms: None,
        }
    }

    pub fn is_overdue(&self, now_ms: i64) -> bool {
        matches!(self.due_date_ms, Some(due) if due < now_ms) && self.status != TicketStatus::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ticket_starts_in_backlog() {
        let ticket = Ticket::new("Add X", "details", TicketType::Task, TicketPriority::Low, "pm");
        assert_eq!(ticket.status, TicketStatus::Backlog);
        assert_eq!(ticket.created_at_ms, ticket.updated_at_ms);
        assert!(ticket.assigned_agent_id.is_none());
    }

    #[test]
    fn terminal_states_have_no_transitions() {
        assert!(TicketStatus::Done.is_terminal());
        assert!(TicketStatus::Cancelled.is_terminal());
        assert!(!TicketStatus::Blocked.is_terminal());
    }

    #[test]
    fn backlog_cannot_jump_to_done() {
        assert!(!TicketStatus::Backlog.can_transition_to(TicketStatus::Done));
        assert!(TicketStatus::Backlog.can_transition_to(TicketStatus::Ready));
    }

    #[test]
    fn blocked_resumes_only_to_in_progress_or_cancelled() {
        assert_eq!(
            TicketStatus::Blocked.allowed_transitions(),
            &[TicketStatus::InProgress, TicketStatus::Cancelled]
        );
    }

    #[test]
    fn critical_priority_maps_to_high_urgency() {
        assert_eq!(TicketPriority::Critical.to_urgency(), Urgency::High);
        assert_eq!(TicketPriority::Medium.to_urgency(), Urgency::Medium);
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            TicketStatus::Backlog,
            TicketStatus::Ready,
            TicketStatus::InProgress,
            TicketStatus::Blocked,
            TicketStatus::InReview,
            TicketStatus::Done,
            TicketStatus::Cancelled,
        ] {
            assert_eq!(TicketStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn overdue_requires_past_due_date_and_open_status() {
        let mut ticket = Ticket::new("t", "d", TicketType::Bug, TicketPriority::High, "pm");
        assert!(!ticket.is_overdue(1_000));
        ticket.due_date_ms = Some(500);
        assert!(ticket.is_overdue(1_000));
        ticket.status = TicketStatus::Done;
        assert!(!ticket.is_overdue(1_000));
    }
}
