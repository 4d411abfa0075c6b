use serde::{Deserialize, Serialize};

use crate::id::fresh_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Done,
    Failed,
}

/// A unit of plannable work. `Blank` is the sentinel for "nothing yet".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Task {
    Blank,
    CodeChange {
        id: String,
        status: TaskStatus,
        description: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        assigned_to: Option<String>,
    },
    Review {
        id: String,
        status: TaskStatus,
        description: String,
    },
}

impl Task {
    pub fn code_change(description: impl Into<String>) -> Self {
        Task::CodeChange {
            id: fresh_id(),
            status: TaskStatus::Pending,
            description: description.into(),
            assigned_to: None,
        }
    }

    pub fn review(description: impl Into<String>) -> Self {
        Task::Review {
            id: fresh_id(),
            status: TaskStatus::Pending,
            description: description.into(),
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Task::Blank => None,
            Task::CodeChange { id, .. } | Task::Review { id, .. } => Some(id),
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Task::Blank => "",
            Task::CodeChange { description, .. } | Task::Review { description, .. } => description,
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, Task::Blank)
    }
}

/// An ordered plan for a single ticket. Steps execute sequentially in list
/// order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Plan {
    Blank,
    ForTask {
        plan_id: String,
        task: Task,
        steps: Vec<Task>,
        estimated_complexity: u32,
    },
}

impl Plan {
    pub fn for_task(task: Task, steps: Vec<Task>, estimated_complexity: u32) -> Self {
        Plan::ForTask {
            plan_id: fresh_id(),
            task,
            steps,
            estimated_complexity,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Plan::Blank => None,
            Plan::ForTask { plan_id, .. } => Some(plan_id),
        }
    }

    pub fn steps(&self) -> &[Task] {
        match self {
            Plan::Blank => &[],
            Plan::ForTask { steps, .. } => steps,
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, Plan::Blank)
    }
}

/// Shared fields of every non-blank outcome.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OutcomeDetail {
    pub executor_id: String,
    pub ticket_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub started_at_ms: i64,
    pub finished_at_ms: i64,
    #[serde(default)]
    pub changed_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Every non-blank outcome states both whether code changed and whether the
/// work succeeded; there is no variant that leaves the changed-files
/// question open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outcome {
    Blank,
    NoChangesSuccess(OutcomeDetail),
    NoChangesFailure(OutcomeDetail),
    CodeChangedSuccess(OutcomeDetail),
    CodeChangedFailure(OutcomeDetail),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Outcome::NoChangesSuccess(_) | Outcome::CodeChangedSuccess(_)
        )
    }

    pub fn changed_code(&self) -> bool {
        matches!(
            self,
            Outcome::CodeChangedSuccess(_) | Outcome::CodeChangedFailure(_)
        )
    }

    pub fn detail(&self) -> Option<&OutcomeDetail> {
        match self {
            Outcome::Blank => None,
            Outcome::NoChangesSuccess(d)
            | Outcome::NoChangesFailure(d)
            | Outcome::CodeChangedSuccess(d)
            | Outcome::CodeChangedFailure(d) => Some(d),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_plan_has_no_steps() {
        assert!(Plan::Blank.steps().is_empty());
        assert_eq!(Plan::Blank.id(), None);
    }

    #[test]
    fn plan_preserves_step_order() {
        let plan = Plan::for_task(
            Task::code_change("parent"),
            vec![Task::code_change("a"), Task::code_change("b")],
            2,
        );
        let descriptions: Vec<_> = plan.steps().iter().map(|s| s.description()).collect();
        assert_eq!(descriptions, vec!["a", "b"]);
    }

    #[test]
    fn outcome_success_classification() {
        let detail = OutcomeDetail::default();
        assert!(Outcome::NoChangesSuccess(detail.clone()).is_success());
        assert!(Outcome::CodeChangedSuccess(detail.clone()).is_success());
        assert!(!Outcome::NoChangesFailure(detail.clone()).is_success());
        assert!(!Outcome::CodeChangedFailure(detail.clone()).is_success());
        assert!(!Outcome::Blank.is_success());
        assert!(Outcome::Blank.detail().is_none());
    }

    #[test]
    fn outcome_tracks_whether_code_changed() {
        let detail = OutcomeDetail::default();
        assert!(Outcome::CodeChangedSuccess(detail.clone()).changed_code());
        assert!(Outcome::CodeChangedFailure(detail.clone()).changed_code());
        assert!(!Outcome::NoChangesSuccess(detail.clone()).changed_code());
        assert!(!Outcome::Blank.changed_code());
    }

    #[test]
    fn review_tasks_carry_ids_and_descriptions() {
        let review = Task::review("check the auth changes");
        assert!(review.id().is_some());
        assert_eq!(review.description(), "check the auth changes");
        assert!(!review.is_blank());
        assert!(Task::Blank.is_blank());
    }
}
