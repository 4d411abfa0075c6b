// Ticket lifecycle coordination across the ticket repository, the thread
// API, and the event bus. Each public call is one logical operation; where
// an effect cannot be rolled back (an already persisted ticket, a published
// event) the tolerated partial state is documented on the method.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use thiserror::Error;

use ampere_bus::{BusError, EventBus};
use ampere_store::StoreError;
use ampere_threads::{MessageThreadApi, ThreadError};
use ampere_tickets::{TicketError, TicketRepository};
use ampere_types::{
    AmpereEvent, EventEnvelope, EventSource, MessageThread, Ticket, TicketPriority, TicketStatus,
    TicketType, ThreadChannel, Urgency,
};

use crate::escalation::{EscalationClassifier, EscalationDecision, TicketSignals};

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("invalid ticket status transition: {from} -> {to}")]
    InvalidStateTransition { from: TicketStatus, to: TicketStatus },

    #[error("ticket not found: {id}")]
    TicketNotFound { id: String },

    #[error("{0}")]
    Validation(String),

    #[error("thread error: {0}")]
    Thread(#[from] ThreadError),

    #[error("event bus error: {0}")]
    Bus(#[from] BusError),

    #[error("database error: {0}")]
    Database(StoreError),
}

impl From<TicketError> for OrchestratorError {
    fn from(err: TicketError) -> Self {
        match err {
            TicketError::InvalidStateTransition { from, to } => {
                OrchestratorError::InvalidStateTransition { from, to }
            }
            TicketError::TicketNotFound { id } => OrchestratorError::TicketNotFound { id },
            TicketError::Validation(msg) => OrchestratorError::Validation(msg),
            TicketError::Database(err) => OrchestratorError::Database(err),
        }
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

pub struct TicketOrchestrator {
    tickets: Arc<TicketRepository>,
    threads: Arc<MessageThreadApi>,
    bus: EventBus,
    classifier: EscalationClassifier,
}

impl TicketOrchestrator {
    pub fn new(
        tickets: Arc<TicketRepository>,
        threads: Arc<MessageThreadApi>,
        bus: EventBus,
        classifier: EscalationClassifier,
    ) -> Self {
        Self {
            tickets,
            threads,
            bus,
            classifier,
        }
    }

    pub fn tickets(&self) -> &Arc<TicketRepository> {
        &self.tickets
    }

    pub fn threads(&self) -> &Arc<MessageThreadApi> {
        &self.threads
    }

    /// Create a ticket with its conversation thread and announce it.
    ///
    /// A persistence failure aborts before any thread or event exists. Once
    /// the ticket row is written it is kept even if thread creation or the
    /// announcement fails; those steps surface the error to the caller.
    pub async fn create_ticket(
        &self,
        title: &str,
        description: &str,
        ticket_type: TicketType,
        priority: TicketPriority,
        created_by: &str,
    ) -> OrchestratorResult<(Ticket, MessageThread)> {
        if title.trim().is_empty() {
            return Err(OrchestratorError::Validation(
                "ticket title must not be blank".into(),
            ));
        }
        let ticket = Ticket::new(title, description, ticket_type, priority, created_by);
        self.tickets.create_ticket(&ticket).await?;

        let thread = self
            .threads
            .create_thread(
                BTreeSet::from([created_by.to_string()]),
                ThreadChannel::EngineeringPublic,
                EventSource::agent(created_by),
                format!(
                    "Ticket {} created: {} ({:?}, {:?} priority)\n{}",
                    ticket.id, ticket.title, ticket.ticket_type, ticket.priority, ticket.description
                ),
            )
            .await?;
        self.threads.attach_ticket(&thread.id, &ticket.id).await?;

        self.bus
            .publish(EventEnvelope::new(
                EventSource::agent(created_by),
                priority.to_urgency(),
                AmpereEvent::TicketCreated {
                    ticket_id: ticket.id.clone(),
                    title: ticket.title.clone(),
                    ticket_type,
                    priority,
                    created_by: created_by.to_string(),
                },
            ))
            .await?;

        let mut thread = thread;
        thread.ticket_id = Some(ticket.id.clone());
        Ok((ticket, thread))
    }

    /// Move a ticket along the status graph. Reopens the thread when leaving
    /// `Blocked`, posts a status note, and publishes the change (plus
    /// `TicketCompleted` when the new status is `Done`).
    pub async fn transition_ticket_status(
        &self,
        ticket_id: &str,
        new_status: TicketStatus,
        actor: &str,
    ) -> OrchestratorResult<Ticket> {
        let ticket = self.tickets.get_ticket(ticket_id).await?;
        ensure_may_mutate(&ticket, actor)?;
        if !ticket.status.can_transition_to(new_status) {
            return Err(OrchestratorError::InvalidStateTransition {
                from: ticket.status,
                to: new_status,
            });
        }
        let previous = ticket.status;
        let updated = self.tickets.update_status(ticket_id, new_status).await?;

        if previous == TicketStatus::Blocked {
            if let Some(thread) = self.threads.find_thread_for_ticket(ticket_id).await? {
                self.threads.reopen_thread(&thread.id).await?;
            }
        }
        self.post_note(
            ticket_id,
            EventSource::agent(actor),
            format!(
                "Status changed: {} -> {} (by {})",
                previous.as_str(),
                new_status.as_str(),
                actor
            ),
        )
        .await;

        self.bus
            .publish(EventEnvelope::new(
                EventSource::agent(actor),
                updated.priority.to_urgency(),
                AmpereEvent::TicketStatusChanged {
                    ticket_id: ticket_id.to_string(),
                    previous,
                    new: new_status,
                    changed_by: actor.to_string(),
                },
            ))
            .await?;
        if new_status == TicketStatus::Done {
            self.bus
                .publish(EventEnvelope::new(
                    EventSource::agent(actor),
                    updated.priority.to_urgency(),
                    AmpereEvent::TicketCompleted {
                        ticket_id: ticket_id.to_string(),
                        completed_by: actor.to_string(),
                    },
                ))
                .await?;
        }
        Ok(updated)
    }

    /// Assign or unassign (`target = None`) a ticket.
    pub async fn assign_ticket(
        &self,
        ticket_id: &str,
        target: Option<&str>,
        assigner: &str,
    ) -> OrchestratorResult<Ticket> {
        let ticket = self.tickets.get_ticket(ticket_id).await?;
        ensure_may_mutate(&ticket, assigner)?;
        let updated = self.tickets.assign_ticket(ticket_id, target).await?;

        self.bus
            .publish(EventEnvelope::new(
                EventSource::agent(assigner),
                updated.priority.to_urgency(),
                AmpereEvent::TicketAssigned {
                    ticket_id: ticket_id.to_string(),
                    assigned_to: target.map(str::to_string),
                    assigned_by: assigner.to_string(),
                },
            ))
            .await?;

        let note = match target {
            Some(agent) => format!("Assigned to {agent} by {assigner}"),
            None => format!("Unassigned by {assigner}"),
        };
        self.post_note(ticket_id, EventSource::agent(assigner), note)
            .await;
        Ok(updated)
    }

    /// Block a ticket and escalate. The blocker reason is classified, the
    /// block is announced at high urgency, and the thread is parked on a
    /// human with the classification attached to the escalation context.
    pub async fn block_ticket(
        &self,
        ticket_id: &str,
        reason: &str,
        reported_by: &str,
    ) -> OrchestratorResult<EscalationDecision> {
        let ticket = self.tickets.get_ticket(ticket_id).await?;
        ensure_may_mutate(&ticket, reported_by)?;
        if !ticket.status.can_transition_to(TicketStatus::Blocked) {
            return Err(OrchestratorError::InvalidStateTransition {
                from: ticket.status,
                to: TicketStatus::Blocked,
            });
        }
        self.tickets
            .update_status(ticket_id, TicketStatus::Blocked)
            .await?;

        let decision = self
            .classifier
            .classify(
                reason,
                Some(&TicketSignals {
                    priority: Some(ticket.priority),
                    due_date_ms: ticket.due_date_ms,
                }),
            )
            .await;

        self.bus
            .publish(EventEnvelope::new(
                EventSource::agent(reported_by),
                Urgency::High,
                AmpereEvent::TicketBlocked {
                    ticket_id: ticket_id.to_string(),
                    reason: reason.to_string(),
                    reported_by: reported_by.to_string(),
                },
            ))
            .await?;

        if let Some(thread) = self.threads.find_thread_for_ticket(ticket_id).await? {
            let context = BTreeMap::from([
                ("ticketId".to_string(), ticket.id.clone()),
                ("title".to_string(), ticket.title.clone()),
                ("reportedBy".to_string(), reported_by.to_string()),
                ("priority".to_string(), ticket.priority.as_str().to_string()),
                (
                    "escalation".to_string(),
                    decision.kind.identifier().to_string(),
                ),
            ]);
            self.threads
                .escalate_to_human(&thread.id, EventSource::agent(reported_by), reason, context)
                .await?;
        } else {
            tracing::warn!(ticket_id, "blocked ticket has no thread to escalate");
        }
        Ok(decision)
    }

    /// Thread notes are best-effort: a failure is logged, never surfaced, so
    /// a conversational hiccup cannot undo a completed state change.
    async fn post_note(&self, ticket_id: &str, author: EventSource, content: String) {
        let thread = match self.threads.find_thread_for_ticket(ticket_id).await {
            Ok(Some(thread)) => thread,
            Ok(None) => {
                tracing::debug!(ticket_id, "no thread for ticket, skipping note");
                return;
            }
            Err(err) => {
                tracing::warn!(ticket_id, "thread lookup failed: {err}");
                return;
            }
        };
        if let Err(err) = self.threads.post_message(&thread.id, author, content).await {
            tracing::warn!(ticket_id, "failed to post ticket note: {err}");
        }
    }
}

fn ensure_may_mutate(ticket: &Ticket, actor: &str) -> OrchestratorResult<()> {
    let is_assignee = ticket.assigned_agent_id.as_deref() == Some(actor);
    let is_creator = ticket.created_by_agent_id == actor;
    if is_assignee || is_creator {
        return Ok(());
    }
    Err(OrchestratorError::Validation(format!(
        "agent '{actor}' does not have permission to modify ticket {}",
        ticket.id
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalation::{DiscussionKind, Escalation, EscalationProcess};
    use ampere_store::Database;
    use ampere_types::ThreadStatus;

    async fn orchestrator() -> TicketOrchestrator {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let bus = EventBus::new(db.clone());
        let tickets = Arc::new(TicketRepository::new(db.clone()));
        let threads = Arc::new(MessageThreadApi::new(db, bus.clone()));
        TicketOrchestrator::new(tickets, threads, bus, EscalationClassifier::keyword_only())
    }

    #[tokio::test]
    async fn create_ticket_persists_thread_and_links_it() {
        let orch = orchestrator().await;
        let (ticket, thread) = orch
            .create_ticket("Add X", "details", TicketType::Task, TicketPriority::Medium, "pm")
            .await
            .unwrap();
        assert_eq!(ticket.status, TicketStatus::Backlog);
        assert_eq!(thread.ticket_id.as_deref(), Some(ticket.id.as_str()));
        assert!(thread.participants.contains("pm"));

        let messages = orch.threads().get_messages(&thread.id).await.unwrap();
        assert!(messages[0].content.contains("Add X"));
    }

    #[tokio::test]
    async fn blank_title_is_rejected_before_any_effect() {
        let orch = orchestrator().await;
        let err = orch
            .create_ticket("  ", "d", TicketType::Task, TicketPriority::Low, "pm")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
        assert!(orch.tickets().get_all_tickets().await.unwrap().is_empty());
        assert!(orch.threads().get_all_threads().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stranger_cannot_transition() {
        let orch = orchestrator().await;
        let (ticket, _) = orch
            .create_ticket("Add X", "d", TicketType::Task, TicketPriority::Low, "pm")
            .await
            .unwrap();
        orch.assign_ticket(&ticket.id, Some("eng"), "pm").await.unwrap();

        let err = orch
            .transition_ticket_status(&ticket.id, TicketStatus::Ready, "stranger")
            .await
            .unwrap_err();
        match err {
            OrchestratorError::Validation(msg) => {
                assert!(msg.contains("does not have permission"))
            }
            other => panic!("expected validation error, got {other:?}"),
        }
        let read = orch.tickets().get_ticket(&ticket.id).await.unwrap();
        assert_eq!(read.status, TicketStatus::Backlog);
    }

    #[tokio::test]
    async fn assignee_may_transition() {
        let orch = orchestrator().await;
        let (ticket, _) = orch
            .create_ticket("Add X", "d", TicketType::Task, TicketPriority::Low, "pm")
            .await
            .unwrap();
        orch.assign_ticket(&ticket.id, Some("eng"), "pm").await.unwrap();
        let updated = orch
            .transition_ticket_status(&ticket.id, TicketStatus::Ready, "eng")
            .await
            .unwrap();
        assert_eq!(updated.status, TicketStatus::Ready);
    }

    #[tokio::test]
    async fn illegal_transition_reports_edge() {
        let orch = orchestrator().await;
        let (ticket, _) = orch
            .create_ticket("Add X", "d", TicketType::Task, TicketPriority::Low, "pm")
            .await
            .unwrap();
        let err = orch
            .transition_ticket_status(&ticket.id, TicketStatus::Done, "pm")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::InvalidStateTransition {
                from: TicketStatus::Backlog,
                to: TicketStatus::Done,
            }
        ));
    }

    #[tokio::test]
    async fn block_classifies_and_escalates() {
        let orch = orchestrator().await;
        let (ticket, thread) = orch
            .create_ticket("Auth", "d", TicketType::Feature, TicketPriority::High, "pm")
            .await
            .unwrap();
        orch.assign_ticket(&ticket.id, Some("eng"), "pm").await.unwrap();
        orch.transition_ticket_status(&ticket.id, TicketStatus::Ready, "eng")
            .await
            .unwrap();
        orch.transition_ticket_status(&ticket.id, TicketStatus::InProgress, "eng")
            .await
            .unwrap();

        let decision = orch
            .block_ticket(
                &ticket.id,
                "architecture decision needed between JWT and OAuth2",
                "eng",
            )
            .await
            .unwrap();
        assert_eq!(
            decision.kind,
            Escalation::Discussion(DiscussionKind::Architecture)
        );
        assert_eq!(
            decision.kind.escalation_process(),
            EscalationProcess::AgentMeeting
        );

        let read = orch.tickets().get_ticket(&ticket.id).await.unwrap();
        assert_eq!(read.status, TicketStatus::Blocked);
        let thread = orch.threads().get_thread(&thread.id).await.unwrap();
        assert_eq!(thread.status, ThreadStatus::WaitingForHuman);

        let messages = orch.threads().get_messages(&thread.id).await.unwrap();
        let escalation = messages.last().unwrap();
        assert!(escalation.content.contains("reportedBy: eng"));
        assert!(escalation.content.contains("priority: high"));
    }

    #[tokio::test]
    async fn unblocking_reopens_the_thread() {
        let orch = orchestrator().await;
        let (ticket, thread) = orch
            .create_ticket("Auth", "d", TicketType::Bug, TicketPriority::Medium, "pm")
            .await
            .unwrap();
        orch.transition_ticket_status(&ticket.id, TicketStatus::Ready, "pm")
            .await
            .unwrap();
        orch.transition_ticket_status(&ticket.id, TicketStatus::InProgress, "pm")
            .await
            .unwrap();
        orch.block_ticket(&ticket.id, "needs design discussion", "pm")
            .await
            .unwrap();

        orch.transition_ticket_status(&ticket.id, TicketStatus::InProgress, "pm")
            .await
            .unwrap();
        let thread = orch.threads().get_thread(&thread.id).await.unwrap();
        assert_eq!(thread.status, ThreadStatus::Open);
    }

    #[tokio::test]
    async fn blocking_a_backlog_ticket_is_illegal() {
        let orch = orchestrator().await;
        let (ticket, _) = orch
            .create_ticket("Add X", "d", TicketType::Task, TicketPriority::Low, "pm")
            .await
            .unwrap();
        let err = orch.block_ticket(&ticket.id, "stuck", "pm").await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::InvalidStateTransition {
                from: TicketStatus::Backlog,
                to: TicketStatus::Blocked,
            }
        ));
    }
}
