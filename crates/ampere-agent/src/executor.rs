// Sequential plan execution. Steps share a mutable context map; a critical
// failure short-circuits the rest of the plan. The aggregate outcome is
// CodeChanged* when any step reported changed files, NoChanges* otherwise.

use std::collections::BTreeMap;

use async_trait::async_trait;

use ampere_types::{now_ms, Outcome, OutcomeDetail, Plan, Task};

pub const DEFAULT_PLAN_MAX_STEPS: usize = 64;

/// What a step executor reports back for one step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepResult {
    Completed {
        summary: String,
        context_updates: BTreeMap<String, String>,
        changed_files: Vec<String>,
    },
    Partial {
        summary: String,
        context_updates: BTreeMap<String, String>,
    },
    Failed {
        error: String,
        critical: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Success {
        summary: String,
        changed_files: Vec<String>,
    },
    PartialSuccess {
        summary: String,
    },
    Failure {
        error: String,
        is_critical: bool,
    },
    Skipped {
        reason: String,
    },
}

impl StepOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, StepOutcome::Success { .. } | StepOutcome::PartialSuccess { .. })
    }
}

#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(
        &self,
        step: &Task,
        context: &BTreeMap<String, String>,
    ) -> anyhow::Result<StepResult>;
}

#[derive(Debug)]
pub struct PlanExecution {
    pub outcome: Outcome,
    pub step_outcomes: Vec<StepOutcome>,
    pub context: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct PlanExecutor {
    max_steps: usize,
}

impl PlanExecutor {
    pub fn new(max_steps: usize) -> Self {
        Self {
            max_steps: max_steps.max(1),
        }
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Run the plan's steps in order. An executor error counts as a critical
    /// failure of that step.
    pub async fn execute(
        &self,
        executor_id: &str,
        ticket_id: &str,
        plan: &Plan,
        step_executor: &dyn StepExecutor,
    ) -> PlanExecution {
        let started_at_ms = now_ms();
        let steps = plan.steps();
        if steps.is_empty() {
            return PlanExecution {
                outcome: Outcome::NoChangesSuccess(OutcomeDetail {
                    executor_id: executor_id.to_string(),
                    ticket_id: ticket_id.to_string(),
                    task_id: plan_task_id(plan),
                    started_at_ms,
                    finished_at_ms: now_ms(),
                    changed_files: Vec::new(),
                    message: Some("Plan has no steps to execute.".to_string()),
                    error: None,
                }),
                step_outcomes: Vec::new(),
                context: BTreeMap::new(),
            };
        }

        let mut context: BTreeMap<String, String> = BTreeMap::new();
        let mut step_outcomes: Vec<StepOutcome> = Vec::with_capacity(steps.len());
        let mut skip_reason: Option<String> = None;

        for (index, step) in steps.iter().enumerate() {
            if let Some(reason) = &skip_reason {
                step_outcomes.push(StepOutcome::Skipped {
                    reason: reason.clone(),
                });
                continue;
            }
            if index >= self.max_steps {
                step_outcomes.push(StepOutcome::Skipped {
                    reason: format!("plan exceeds the maximum of {} steps", self.max_steps),
                });
                continue;
            }

            let outcome = match step_executor.execute(step, &context).await {
                Ok(StepResult::Completed {
                    summary,
                    context_updates,
                    changed_files,
                }) => {
                    context.extend(context_updates);
                    StepOutcome::Success {
                        summary,
                        changed_files,
                    }
                }
                Ok(StepResult::Partial {
                    summary,
                    context_updates,
                }) => {
                    context.extend(context_updates);
                    StepOutcome::PartialSuccess { summary }
                }
                Ok(StepResult::Failed { error, critical }) => StepOutcome::Failure {
                    error,
                    is_critical: critical,
                },
                Err(err) => StepOutcome::Failure {
                    error: format!("{err:#}"),
                    is_critical: true,
                },
            };

            if let StepOutcome::Failure {
                is_critical: true, ..
            } = &outcome
            {
                skip_reason = Some(format!(
                    "Skipped due to critical failure in step {}",
                    index + 1
                ));
            }
            step_outcomes.push(outcome);
        }

        let outcome = aggregate(
            executor_id,
            ticket_id,
            plan,
            started_at_ms,
            &step_outcomes,
        );
        PlanExecution {
            outcome,
            step_outcomes,
            context,
        }
    }
}

impl Default for PlanExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_PLAN_MAX_STEPS)
    }
}

fn aggregate(
    executor_id: &str,
    ticket_id: &str,
    plan: &Plan,
    started_at_ms: i64,
    step_outcomes: &[StepOutcome],
) -> Outcome {
    let mut succeeded = 0usize;
    let mut partial = 0usize;
    let mut failed = 0usize;
    let mut skipped = 0usize;
    let mut changed_files: Vec<String> = Vec::new();
    let mut first_error: Option<String> = None;

    for outcome in step_outcomes {
        match outcome {
            StepOutcome::Success {
                changed_files: files,
                ..
            } => {
                succeeded += 1;
                changed_files.extend(files.iter().cloned());
            }
            StepOutcome::PartialSuccess { .. } => partial += 1,
            StepOutcome::Failure { error, .. } => {
                failed += 1;
                if first_error.is_none() {
                    first_error = Some(error.clone());
                }
            }
            StepOutcome::Skipped { .. } => skipped += 1,
        }
    }

    let summary = [
        format!("✓ Success: {succeeded}"),
        format!("⚠ Partial: {partial}"),
        format!("✗ Failure: {failed}"),
        format!("⊘ Skipped: {skipped}"),
    ]
    .join("\n");

    let has_changes = !changed_files.is_empty();
    let detail = OutcomeDetail {
        executor_id: executor_id.to_string(),
        ticket_id: ticket_id.to_string(),
        task_id: plan_task_id(plan),
        started_at_ms,
        finished_at_ms: now_ms(),
        changed_files,
        message: Some(summary),
        error: first_error,
    };
    match (failed == 0, has_changes) {
        (true, true) => Outcome::CodeChangedSuccess(detail),
        (true, false) => Outcome::NoChangesSuccess(detail),
        (false, true) => Outcome::CodeChangedFailure(detail),
        (false, false) => Outcome::NoChangesFailure(detail),
    }
}

fn plan_task_id(plan: &Plan) -> Option<String> {
    match plan {
        Plan::Blank => None,
        Plan::ForTask { task, .. } => task.id().map(str::to_string),
    }
}
