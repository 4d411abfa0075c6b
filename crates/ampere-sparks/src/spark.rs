// Spark definitions. A spark contributes prompt text and optionally narrows
// tools and file access; `None` means inherit from the rest of the stack.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use ampere_types::{Phase, Ticket};

use crate::scope::FileAccessScope;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SparkKind {
    Role,
    Task,
    Coordination,
    Observability,
    Phase,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spark {
    pub name: String,
    pub kind: SparkKind,
    pub prompt_contribution: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_access: Option<FileAccessScope>,
}

impl Spark {
    pub fn new(name: impl Into<String>, kind: SparkKind, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            prompt_contribution: prompt.into(),
            allowed_tools: None,
            file_access: None,
        }
    }

    pub fn with_tools<I>(mut self, tools: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.allowed_tools = Some(tools.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_file_access(mut self, scope: FileAccessScope) -> Self {
        self.file_access = Some(scope);
        self
    }
}

/// Role sparks fix what kind of work the agent does.
pub struct RoleSpark;

impl RoleSpark {
    pub fn code() -> Spark {
        Spark::new(
            "code",
            SparkKind::Role,
            "You implement code changes. Work in small, verifiable increments; \
             run the tests that cover what you touched before declaring a step done.",
        )
        .with_tools(["read_file", "write_file", "search", "run_tests"])
        .with_file_access(FileAccessScope::scoped(
            ["src/**", "tests/**", "Cargo.toml"],
            ["src/**", "tests/**"],
            ["secrets/**", ".env*"],
        ))
    }

    pub fn research() -> Spark {
        Spark::new(
            "research",
            SparkKind::Role,
            "You investigate and summarize. Prefer primary sources in the \
             workspace; cite file paths in your findings.",
        )
        .with_tools(["read_file", "search"])
        .with_file_access(FileAccessScope::scoped(
            ["**"],
            ["notes/**"],
            ["secrets/**", ".env*"],
        ))
    }

    pub fn operations() -> Spark {
        Spark::new(
            "operations",
            SparkKind::Role,
            "You run operational tasks. State the command you are about to run \
             and what you expect it to change before running it.",
        )
        .with_tools(["read_file", "run_command"])
        .with_file_access(FileAccessScope::scoped(
            ["ops/**", "src/**"],
            ["ops/**"],
            ["secrets/**", ".env*"],
        ))
    }

    pub fn planning() -> Spark {
        Spark::new(
            "planning",
            SparkKind::Role,
            "You break work into ordered, independently verifiable steps. \
             Keep plans short; each step names its deliverable.",
        )
        .with_tools(["read_file", "search"])
        .with_file_access(FileAccessScope::scoped(
            ["**"],
            ["plans/**"],
            ["secrets/**", ".env*"],
        ))
    }
}

/// A task spark binds the stack to one concrete ticket.
pub struct TaskSpark;

impl TaskSpark {
    pub fn for_ticket(ticket: &Ticket) -> Spark {
        Spark::new(
            format!("task:{}", ticket.id),
            SparkKind::Task,
            format!(
                "Current ticket: {} — {}\nType: {:?}, priority: {:?}.\n{}",
                ticket.id, ticket.title, ticket.ticket_type, ticket.priority, ticket.description
            ),
        )
    }
}

pub struct CoordinationSpark;

impl CoordinationSpark {
    pub fn handoff(worker_id: &str) -> Spark {
        Spark::new(
            "handoff",
            SparkKind::Coordination,
            format!(
                "You are planning work that agent `{worker_id}` will execute. \
                 Make each step self-contained; the executor will not see your \
                 reasoning, only the plan."
            ),
        )
    }
}

pub struct ObservabilitySpark;

impl ObservabilitySpark {
    pub fn verbose() -> Spark {
        Spark::new(
            "verbose",
            SparkKind::Observability,
            "Narrate each step you take and why, before taking it.",
        )
    }
}

/// Phase sparks scope the stack to the loop phase currently running.
pub struct PhaseSpark;

impl PhaseSpark {
    pub fn for_phase(phase: Phase) -> Spark {
        let prompt = match phase {
            Phase::Perceive => {
                "Phase: perceive. Observe the ticket and recent events; list the \
                 viable courses of action without committing to one."
            }
            Phase::Recall => {
                "Phase: recall. Surface past approaches and learnings relevant to \
                 this ticket."
            }
            Phase::Plan => {
                "Phase: plan. Turn the chosen idea into ordered steps with clear \
                 completion criteria."
            }
            Phase::Execute => {
                "Phase: execute. Carry out the current step exactly; report \
                 changed files and failures precisely."
            }
            Phase::Learn => {
                "Phase: learn. Extract what worked and what did not into a short, \
                 reusable lesson."
            }
        };
        Spark::new(format!("phase:{phase}"), SparkKind::Phase, prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_sparks_constrain_tools_and_files() {
        let code = RoleSpark::code();
        assert_eq!(code.kind, SparkKind::Role);
        assert!(code.allowed_tools.as_ref().unwrap().contains("run_tests"));
        let scope = code.file_access.unwrap();
        assert!(scope.allows_write("src/lib.rs"));
        assert!(!scope.allows_write("secrets/key.pem"));
    }

    #[test]
    fn research_reads_widely_but_writes_only_notes() {
        let scope = RoleSpark::research().file_access.unwrap();
        assert!(scope.allows_read("src/anything.rs"));
        assert!(scope.allows_write("notes/findings.md"));
        assert!(!scope.allows_write("src/lib.rs"));
    }

    #[test]
    fn operations_cannot_touch_secrets() {
        let ops = RoleSpark::operations();
        assert!(!ops.allowed_tools.as_ref().unwrap().contains("write_file"));
        let scope = ops.file_access.unwrap();
        assert!(!scope.allows_read(".env.production"));
        assert!(scope.allows_write("ops/runbook.md"));
    }

    #[test]
    fn phase_sparks_inherit_capabilities() {
        let spark = PhaseSpark::for_phase(Phase::Execute);
        assert_eq!(spark.name, "phase:execute");
        assert!(spark.allowed_tools.is_none());
        assert!(spark.file_access.is_none());
    }

    #[test]
    fn task_spark_names_the_ticket() {
        let ticket = Ticket::new(
            "Add X",
            "details",
            ampere_types::TicketType::Task,
            ampere_types::TicketPriority::Low,
            "pm",
        );
        let spark = TaskSpark::for_ticket(&ticket);
        assert_eq!(spark.name, format!("task:{}", ticket.id));
        assert!(spark.prompt_contribution.contains("Add X"));
    }
}
