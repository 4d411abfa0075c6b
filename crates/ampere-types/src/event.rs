use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::{fresh_id, now_ms};
use crate::knowledge::KnowledgeType;
use crate::ticket::{TicketPriority, TicketStatus, TicketType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl Urgency {
    pub fn as_str(self) -> &'static str {
        match self {
            Urgency::Low => "low",
            Urgency::Medium => "medium",
            Urgency::High => "high",
            Urgency::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Urgency::Low),
            "medium" => Some(Urgency::Medium),
            "high" => Some(Urgency::High),
            "critical" => Some(Urgency::Critical),
            _ => None,
        }
    }
}

/// Who caused an event. Humans are distinguished so the escalation path can
/// bypass agent permission checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventSource {
    Agent { id: String },
    Human { id: String },
    System,
}

impl EventSource {
    pub fn agent(id: impl Into<String>) -> Self {
        EventSource::Agent { id: id.into() }
    }

    pub fn human(id: impl Into<String>) -> Self {
        EventSource::Human { id: id.into() }
    }

    pub fn actor_id(&self) -> Option<&str> {
        match self {
            EventSource::Agent { id } | EventSource::Human { id } => Some(id),
            EventSource::System => None,
        }
    }

    pub fn is_human(&self) -> bool {
        matches!(self, EventSource::Human { .. })
    }

    pub fn kind_str(&self) -> &'static str {
        match self {
            EventSource::Agent { .. } => "agent",
            EventSource::Human { .. } => "human",
            EventSource::System => "system",
        }
    }
}

/// Coarse event grouping used by class-level subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventClass {
    Ticket,
    Plan,
    Message,
    Git,
    Tool,
    Knowledge,
    System,
}

impl EventClass {
    pub fn as_str(self) -> &'static str {
        match self {
            EventClass::Ticket => "ticket",
            EventClass::Plan => "plan",
            EventClass::Message => "message",
            EventClass::Git => "git",
            EventClass::Tool => "tool",
            EventClass::Knowledge => "knowledge",
            EventClass::System => "system",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ticket" => Some(EventClass::Ticket),
            "plan" => Some(EventClass::Plan),
            "message" => Some(EventClass::Message),
            "git" => Some(EventClass::Git),
            "tool" => Some(EventClass::Tool),
            "knowledge" => Some(EventClass::Knowledge),
            "system" => Some(EventClass::System),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed event payloads. The serialized form is self-describing with `type`
/// as the discriminator; readers ignore unknown fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AmpereEvent {
    TicketCreated {
        ticket_id: String,
        title: String,
        ticket_type: TicketType,
        priority: TicketPriority,
        created_by: String,
    },
    TicketAssigned {
        ticket_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        assigned_to: Option<String>,
        assigned_by: String,
    },
    TicketStatusChanged {
        ticket_id: String,
        previous: TicketStatus,
        new: TicketStatus,
        changed_by: String,
    },
    TicketBlocked {
        ticket_id: String,
        reason: String,
        reported_by: String,
    },
    TicketCompleted {
        ticket_id: String,
        completed_by: String,
    },
    PlanStepStarted {
        ticket_id: String,
        plan_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step_index: Option<usize>,
        description: String,
    },
    PlanStepCompleted {
        ticket_id: String,
        plan_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step_index: Option<usize>,
        succeeded: bool,
    },
    TaskAssigned {
        ticket_id: String,
        task_id: String,
        agent_id: String,
    },
    MonitoringStarted {
        agent_id: String,
        subject: String,
    },
    EscalationRequested {
        thread_id: String,
        requested_by: String,
        reason: String,
        #[serde(default)]
        context: BTreeMap<String, String>,
    },
    CodeSubmitted {
        ticket_id: String,
        file_path: String,
        change_description: String,
        review_required: bool,
    },
    CommitRecorded {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ticket_id: Option<String>,
        commit_id: String,
        message: String,
    },
    ToolInvoked {
        agent_id: String,
        tool: String,
        #[serde(default)]
        arguments: Value,
    },
    ToolCompleted {
        agent_id: String,
        tool: String,
        succeeded: bool,
    },
    KnowledgeStored {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
        entry_id: String,
        knowledge_type: KnowledgeType,
    },
    OperationFailed {
        kind: String,
        detail: String,
    },
}

impl AmpereEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            AmpereEvent::TicketCreated { .. } => "ticket.created",
            AmpereEvent::TicketAssigned { .. } => "ticket.assigned",
            AmpereEvent::TicketStatusChanged { .. } => "ticket.status_changed",
            AmpereEvent::TicketBlocked { .. } => "ticket.blocked",
            AmpereEvent::TicketCompleted { .. } => "ticket.completed",
            AmpereEvent::PlanStepStarted { .. } => "plan.step_started",
            AmpereEvent::PlanStepCompleted { .. } => "plan.step_completed",
            AmpereEvent::TaskAssigned { .. } => "plan.task_assigned",
            AmpereEvent::MonitoringStarted { .. } => "system.monitoring_started",
            AmpereEvent::EscalationRequested { .. } => "message.escalation_requested",
            AmpereEvent::CodeSubmitted { .. } => "git.code_submitted",
            AmpereEvent::CommitRecorded { .. } => "git.commit_recorded",
            AmpereEvent::ToolInvoked { .. } => "tool.invoked",
            AmpereEvent::ToolCompleted { .. } => "tool.completed",
            AmpereEvent::KnowledgeStored { .. } => "knowledge.stored",
            AmpereEvent::OperationFailed { .. } => "system.operation_failed",
        }
    }

    pub fn class(&self) -> EventClass {
        match self {
            AmpereEvent::TicketCreated { .. }
            | AmpereEvent::TicketAssigned { .. }
            | AmpereEvent::TicketStatusChanged { .. }
            | AmpereEvent::TicketBlocked { .. }
            | AmpereEvent::TicketCompleted { .. } => EventClass::Ticket,
            AmpereEvent::PlanStepStarted { .. }
            | AmpereEvent::PlanStepCompleted { .. }
            | AmpereEvent::TaskAssigned { .. } => EventClass::Plan,
            AmpereEvent::MonitoringStarted { .. } | AmpereEvent::OperationFailed { .. } => {
                EventClass::System
            }
            AmpereEvent::EscalationRequested { .. } => EventClass::Message,
            AmpereEvent::CodeSubmitted { .. } | AmpereEvent::CommitRecorded { .. } => {
                EventClass::Git
            }
            AmpereEvent::ToolInvoked { .. } | AmpereEvent::ToolCompleted { .. } => EventClass::Tool,
            AmpereEvent::KnowledgeStored { .. } => EventClass::Knowledge,
        }
    }
}

/// Immutable event record as persisted and fanned out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: String,
    pub event_type: String,
    pub class: EventClass,
    pub timestamp_ms: i64,
    pub source: EventSource,
    pub urgency: Urgency,
    pub payload: AmpereEvent,
}

impl EventEnvelope {
    pub fn new(source: EventSource, urgency: Urgency, payload: AmpereEvent) -> Self {
        Self {
            event_id: fresh_id(),
            event_type: payload.event_type().to_string(),
            class: payload.class(),
            timestamp_ms: now_ms(),
            source,
            urgency,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_derives_type_and_class_from_payload() {
        let env = EventEnvelope::new(
            EventSource::agent("eng"),
            Urgency::Medium,
            AmpereEvent::TicketCreated {
                ticket_id: "t-1".into(),
                title: "Add X".into(),
                ticket_type: TicketType::Task,
                priority: TicketPriority::Medium,
                created_by: "pm".into(),
            },
        );
        assert_eq!(env.event_type, "ticket.created");
        assert_eq!(env.class, EventClass::Ticket);
    }

    #[test]
    fn payload_serializes_with_type_discriminator() {
        let payload = AmpereEvent::TicketBlocked {
            ticket_id: "t-1".into(),
            reason: "stuck".into(),
            reported_by: "eng".into(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "ticket_blocked");
        let back: AmpereEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn unknown_payload_fields_are_ignored_on_read() {
        let json = serde_json::json!({
            "type": "ticket_completed",
            "ticket_id": "t-9",
            "completed_by": "eng",
            "added_in_v2": "ignored"
        });
        let event: AmpereEvent = serde_json::from_value(json).unwrap();
        assert_eq!(event.event_type(), "ticket.completed");
    }

    #[test]
    fn tool_and_git_events_round_trip() {
        for payload in [
            AmpereEvent::ToolInvoked {
                agent_id: "eng".into(),
                tool: "run_tests".into(),
                arguments: serde_json::json!({"filter": "auth"}),
            },
            AmpereEvent::ToolCompleted {
                agent_id: "eng".into(),
                tool: "run_tests".into(),
                succeeded: true,
            },
            AmpereEvent::CommitRecorded {
                ticket_id: Some("t-1".into()),
                commit_id: "abc123".into(),
                message: "fix auth".into(),
            },
        ] {
            let json = serde_json::to_value(&payload).unwrap();
            let back: AmpereEvent = serde_json::from_value(json).unwrap();
            assert_eq!(back, payload);
            assert_eq!(back.class(), payload.class());
        }
        assert_eq!(
            AmpereEvent::ToolInvoked {
                agent_id: "a".into(),
                tool: "t".into(),
                arguments: Value::Null,
            }
            .class(),
            EventClass::Tool
        );
    }

    #[test]
    fn human_sources_are_distinguished() {
        assert!(EventSource::human("alice").is_human());
        assert!(!EventSource::agent("eng").is_human());
        assert_eq!(EventSource::System.actor_id(), None);
    }
}
