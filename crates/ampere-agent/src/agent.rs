// The PROPEL loop. Each phase runs under a phase spark scope; the system
// prompt handed to the provider is always the stack's composition at call
// time. Provider failures abort the phase, become a failure outcome, and
// still flow through LEARN before the ticket is blocked.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use ampere_bus::{BusError, EventBus};
use ampere_knowledge::{KnowledgeError, MemoryContext, MemoryService};
use ampere_orchestrator::{OrchestratorError, TicketOrchestrator};
use ampere_provider::LlmProvider;
use ampere_sparks::{Affinity, CoordinationSpark, Spark, SparkStack, TaskSpark};
use ampere_tickets::TicketError;
use ampere_types::{
    now_ms, AgentState, AmpereEvent, EventEnvelope, EventSource, Idea, Knowledge, Outcome,
    Perception, Phase, Plan, Task, Ticket, TicketStatus, Urgency,
};

use crate::executor::{PlanExecution, PlanExecutor, StepExecutor, StepOutcome};
use crate::phases::SparkScope;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("model call failed: {0}")]
    Llm(String),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error("ticket error: {0}")]
    Ticket(#[from] TicketError),

    #[error("knowledge error: {0}")]
    Knowledge(#[from] KnowledgeError),

    #[error("event bus error: {0}")]
    Bus(#[from] BusError),

    #[error("agent cancelled")]
    Cancelled,
}

pub type AgentResult<T> = Result<T, AgentError>;

pub struct AgentConfig {
    pub id: String,
    pub affinity: Affinity,
    pub role: Option<Spark>,
    pub plan_max_steps: usize,
    pub recall_limit: usize,
}

impl AgentConfig {
    pub fn new(id: impl Into<String>, affinity: Affinity) -> Self {
        Self {
            id: id.into(),
            affinity,
            role: None,
            plan_max_steps: crate::executor::DEFAULT_PLAN_MAX_STEPS,
            recall_limit: 5,
        }
    }

    pub fn with_role(mut self, role: Spark) -> Self {
        self.role = Some(role);
        self
    }
}

pub struct Agent {
    id: String,
    stack: Arc<Mutex<SparkStack>>,
    state: Arc<Mutex<AgentState>>,
    memory: Option<Arc<MemoryService>>,
    provider: Arc<dyn LlmProvider>,
    orchestrator: Arc<TicketOrchestrator>,
    bus: EventBus,
    step_executor: Arc<dyn StepExecutor>,
    plan_executor: PlanExecutor,
    recall_limit: usize,
    cancel: CancellationToken,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        provider: Arc<dyn LlmProvider>,
        orchestrator: Arc<TicketOrchestrator>,
        bus: EventBus,
        step_executor: Arc<dyn StepExecutor>,
        memory: Option<Arc<MemoryService>>,
    ) -> Self {
        let mut stack = SparkStack::new(config.affinity);
        if let Some(role) = config.role {
            stack = stack.push(role);
        }
        Self {
            id: config.id,
            stack: Arc::new(Mutex::new(stack)),
            state: Arc::new(Mutex::new(AgentState::Blank)),
            memory,
            provider,
            orchestrator,
            bus,
            step_executor,
            plan_executor: PlanExecutor::new(config.plan_max_steps),
            recall_limit: config.recall_limit,
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> AgentState {
        self.state.lock().clone()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn describe_stack(&self) -> String {
        self.stack.lock().describe()
    }

    /// Run the full loop for one ticket. Returns the final outcome;
    /// `Outcome::Blank` means perception produced no ideas and the loop
    /// aborted with no side effects beyond a logged perception.
    pub async fn run_ticket(&self, ticket_id: &str) -> AgentResult<Outcome> {
        let ticket = self.orchestrator.tickets().get_ticket(ticket_id).await?;

        // PERCEIVE
        self.enter_phase(&ticket, Phase::Perceive);
        let perception = {
            let _scope = SparkScope::enter_phase(self.stack.clone(), Phase::Perceive);
            match self.perceive(&ticket).await {
                Ok(perception) => perception,
                Err(err) => {
                    drop(_scope);
                    return self.fail_and_learn(&ticket, Plan::Blank, err).await;
                }
            }
        };
        if perception.ideas.is_empty() {
            tracing::info!(
                agent = %self.id,
                ticket = %ticket.id,
                perception = %perception.id,
                "no viable ideas, aborting loop"
            );
            self.set_state(AgentState::Blank);
            return Ok(Outcome::Blank);
        }

        // RECALL
        self.enter_phase(&ticket, Phase::Recall);
        let recalled = {
            let _scope = SparkScope::enter_phase(self.stack.clone(), Phase::Recall);
            self.recall(&ticket).await
        };

        // PLAN
        self.enter_phase(&ticket, Phase::Plan);
        let plan = {
            let _scope = SparkScope::enter_phase(self.stack.clone(), Phase::Plan);
            let planned = match self.ensure_in_progress(&ticket.id).await {
                Ok(()) => self.plan(&ticket, &perception.ideas[0], &recalled).await,
                Err(err) => Err(err),
            };
            match planned {
                Ok(plan) => plan,
                Err(err) => {
                    drop(_scope);
                    return self.fail_and_learn(&ticket, Plan::Blank, err).await;
                }
            }
        };

        self.execute_and_finish(&ticket, plan).await
    }

    /// Worker entry point for delegated work: begin at EXECUTE with the
    /// inherited plan.
    pub async fn run_from_plan(&self, ticket_id: &str, plan: Plan) -> AgentResult<Outcome> {
        let ticket = self.orchestrator.tickets().get_ticket(ticket_id).await?;
        self.execute_and_finish(&ticket, plan).await
    }

    /// Coordinator path: perceive, recall, and plan under a handoff spark,
    /// assign the ticket to `worker_id`, and return the plan for the worker
    /// to execute.
    pub async fn delegate_ticket(&self, ticket_id: &str, worker_id: &str) -> AgentResult<Plan> {
        let ticket = self.orchestrator.tickets().get_ticket(ticket_id).await?;

        self.enter_phase(&ticket, Phase::Perceive);
        let perception = {
            let _scope = SparkScope::enter_phase(self.stack.clone(), Phase::Perceive);
            self.perceive(&ticket).await?
        };
        let Some(idea) = perception.ideas.first() else {
            return Err(AgentError::Llm("perception produced no ideas".into()));
        };

        self.enter_phase(&ticket, Phase::Recall);
        let recalled = {
            let _scope = SparkScope::enter_phase(self.stack.clone(), Phase::Recall);
            self.recall(&ticket).await
        };

        self.enter_phase(&ticket, Phase::Plan);
        let plan = {
            let _handoff = SparkScope::enter(
                self.stack.clone(),
                CoordinationSpark::handoff(worker_id),
            );
            let _scope = SparkScope::enter_phase(self.stack.clone(), Phase::Plan);
            self.plan(&ticket, idea, &recalled).await?
        };

        let task_id = match &plan {
            Plan::ForTask { task, .. } => task.id().unwrap_or_default().to_string(),
            Plan::Blank => String::new(),
        };
        self.bus
            .publish(EventEnvelope::new(
                EventSource::agent(&self.id),
                Urgency::Medium,
                AmpereEvent::TaskAssigned {
                    ticket_id: ticket.id.clone(),
                    task_id,
                    agent_id: worker_id.to_string(),
                },
            ))
            .await?;
        self.orchestrator
            .assign_ticket(&ticket.id, Some(worker_id), &self.id)
            .await?;
        self.set_state(AgentState::Blank);
        Ok(plan)
    }

    async fn execute_and_finish(&self, ticket: &Ticket, plan: Plan) -> AgentResult<Outcome> {
        self.check_cancelled()?;
        if let Err(err) = self.ensure_in_progress(&ticket.id).await {
            return self.fail_and_learn(ticket, plan, err).await;
        }

        // EXECUTE
        self.enter_phase(ticket, Phase::Execute);
        let execution = {
            let _scope = SparkScope::enter_phase(self.stack.clone(), Phase::Execute);
            self.execute(ticket, &plan).await?
        };

        // LEARN
        self.enter_phase(ticket, Phase::Learn);
        {
            let _scope = SparkScope::enter_phase(self.stack.clone(), Phase::Learn);
            self.learn(ticket, &plan, &execution.outcome).await;
        }

        let outcome = execution.outcome;
        if outcome.is_success() {
            self.orchestrator
                .transition_ticket_status(&ticket.id, TicketStatus::Done, &self.id)
                .await?;
        } else {
            let reason = outcome
                .detail()
                .and_then(|detail| detail.error.clone())
                .unwrap_or_else(|| "plan execution failed".to_string());
            self.report_failure(&ticket.id, "execution", &reason).await;
        }
        self.set_state(AgentState::Blank);
        Ok(outcome)
    }

    async fn perceive(&self, ticket: &Ticket) -> AgentResult<Perception> {
        let task_spark = TaskSpark::for_ticket(ticket);
        let _task_scope = SparkScope::enter(self.stack.clone(), task_spark);
        let prompt = format!(
            "{}\n\nTicket {}: {}\n{}\n\nList up to three viable approaches as a JSON \
             array of objects with \"summary\" and \"approach\" fields. Reply with \
             JSON only.",
            self.system_prompt(),
            ticket.id,
            ticket.title,
            ticket.description
        );
        tracing::debug!(
            agent = %self.id,
            prompt = %ampere_observability::redact_text(&prompt),
            "perceive prompt"
        );
        let reply = self
            .provider
            .complete(&prompt)
            .await
            .map_err(|err| AgentError::Llm(format!("{err:#}")))?;
        let ideas = parse_ideas(&reply);
        let perception = Perception::new(self.state(), ideas);
        tracing::debug!(
            agent = %self.id,
            ticket = %ticket.id,
            ideas = perception.ideas.len(),
            "perception complete"
        );
        Ok(perception)
    }

    async fn recall(&self, ticket: &Ticket) -> Vec<ampere_knowledge::KnowledgeWithScore> {
        let Some(memory) = &self.memory else {
            return Vec::new();
        };
        let context = MemoryContext {
            task_type: Some(ticket.ticket_type.as_str().to_string()),
            tags: vec![ticket.ticket_type.as_str().to_string()],
            description: format!("{} {}", ticket.title, ticket.description),
        };
        match memory.recall_relevant_knowledge(&context, self.recall_limit).await {
            Ok(recalled) => recalled,
            Err(err) => {
                tracing::warn!(agent = %self.id, "recall failed, continuing without: {err}");
                Vec::new()
            }
        }
    }

    async fn plan(
        &self,
        ticket: &Ticket,
        idea: &Idea,
        recalled: &[ampere_knowledge::KnowledgeWithScore],
    ) -> AgentResult<Plan> {
        let learnings = if recalled.is_empty() {
            String::new()
        } else {
            let lines: Vec<String> = recalled
                .iter()
                .map(|k| format!("- {} ({})", k.entry.learnings, k.entry.approach))
                .collect();
            format!("\n\nRelevant past learnings:\n{}", lines.join("\n"))
        };
        let prompt = format!(
            "{}\n\nChosen approach: {}{}\n\nBreak the approach into at most {} ordered \
             steps. Reply with a JSON array of step description strings.",
            self.system_prompt(),
            idea.approach,
            learnings,
            self.plan_executor_max_steps(),
        );
        tracing::debug!(
            agent = %self.id,
            prompt = %ampere_observability::redact_text(&prompt),
            "plan prompt"
        );
        let reply = self
            .provider
            .complete(&prompt)
            .await
            .map_err(|err| AgentError::Llm(format!("{err:#}")))?;
        let mut descriptions = parse_steps(&reply);
        if descriptions.is_empty() {
            descriptions.push(idea.approach.clone());
        }
        descriptions.truncate(self.plan_executor_max_steps());

        let steps: Vec<Task> = descriptions.into_iter().map(Task::code_change).collect();
        let complexity = steps.len() as u32;
        let plan = Plan::for_task(Task::code_change(&idea.approach), steps, complexity);

        self.bus
            .publish(EventEnvelope::new(
                EventSource::agent(&self.id),
                Urgency::Medium,
                AmpereEvent::PlanStepStarted {
                    ticket_id: ticket.id.clone(),
                    plan_id: plan.id().unwrap_or_default().to_string(),
                    step_index: None,
                    description: idea.summary.clone(),
                },
            ))
            .await?;
        Ok(plan)
    }

    async fn execute(&self, ticket: &Ticket, plan: &Plan) -> AgentResult<PlanExecution> {
        let execution = self
            .plan_executor
            .execute(&self.id, &ticket.id, plan, self.step_executor.as_ref())
            .await;

        let plan_id = plan.id().unwrap_or_default().to_string();
        for (index, step_outcome) in execution.step_outcomes.iter().enumerate() {
            self.bus
                .publish(EventEnvelope::new(
                    EventSource::agent(&self.id),
                    Urgency::Medium,
                    AmpereEvent::PlanStepCompleted {
                        ticket_id: ticket.id.clone(),
                        plan_id: plan_id.clone(),
                        step_index: Some(index),
                        succeeded: step_outcome.succeeded(),
                    },
                ))
                .await?;
            if let StepOutcome::Success {
                summary,
                changed_files,
            } = step_outcome
            {
                for file in changed_files {
                    self.bus
                        .publish(EventEnvelope::new(
                            EventSource::agent(&self.id),
                            Urgency::Medium,
                            AmpereEvent::CodeSubmitted {
                                ticket_id: ticket.id.clone(),
                                file_path: file.clone(),
                                change_description: summary.clone(),
                                review_required: false,
                            },
                        ))
                        .await?;
                }
            }
        }
        Ok(execution)
    }

    /// Best-effort: learning never fails the loop.
    async fn learn(&self, ticket: &Ticket, plan: &Plan, outcome: &Outcome) {
        let knowledge = extract_knowledge_from_outcome(outcome, plan);
        let Some(memory) = &self.memory else {
            tracing::debug!(agent = %self.id, "no memory service, skipping learn persistence");
            return;
        };
        let tags = vec![
            ticket.ticket_type.as_str().to_string(),
            if outcome.is_success() {
                "succeeded".to_string()
            } else {
                "failed".to_string()
            },
        ];
        let entry = match memory
            .store_knowledge(&knowledge, &tags, Some(ticket.ticket_type.as_str()))
            .await
        {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(agent = %self.id, "failed to persist learnings: {err}");
                return;
            }
        };
        let published = self
            .bus
            .publish(EventEnvelope::new(
                EventSource::agent(&self.id),
                Urgency::Low,
                AmpereEvent::KnowledgeStored {
                    agent_id: Some(self.id.clone()),
                    entry_id: entry.id.clone(),
                    knowledge_type: entry.knowledge_type,
                },
            ))
            .await;
        if let Err(err) = published {
            tracing::warn!(agent = %self.id, "failed to announce stored knowledge: {err}");
        }
    }

    /// Shared failure tail: synthesize a failure outcome, learn from it,
    /// announce the failure, and try to block the ticket.
    async fn fail_and_learn(
        &self,
        ticket: &Ticket,
        plan: Plan,
        err: AgentError,
    ) -> AgentResult<Outcome> {
        let reason = err.to_string();
        let now = now_ms();
        let outcome = Outcome::NoChangesFailure(ampere_types::OutcomeDetail {
            executor_id: self.id.clone(),
            ticket_id: ticket.id.clone(),
            task_id: None,
            started_at_ms: now,
            finished_at_ms: now,
            changed_files: Vec::new(),
            message: None,
            error: Some(reason.clone()),
        });

        {
            let _scope = SparkScope::enter_phase(self.stack.clone(), Phase::Learn);
            self.learn(ticket, &plan, &outcome).await;
        }
        self.report_failure(&ticket.id, failure_kind(&err), &reason).await;
        self.set_state(AgentState::Blank);
        Ok(outcome)
    }

    async fn report_failure(&self, ticket_id: &str, kind: &str, reason: &str) {
        let published = self
            .bus
            .publish(EventEnvelope::new(
                EventSource::agent(&self.id),
                Urgency::High,
                AmpereEvent::OperationFailed {
                    kind: kind.to_string(),
                    detail: reason.to_string(),
                },
            ))
            .await;
        if let Err(err) = published {
            tracing::warn!(agent = %self.id, "failed to announce failure: {err}");
        }
        if let Err(err) = self
            .orchestrator
            .block_ticket(ticket_id, reason, &self.id)
            .await
        {
            tracing::warn!(
                agent = %self.id,
                ticket = ticket_id,
                "could not block ticket after failure: {err}"
            );
        }
    }

    async fn ensure_in_progress(&self, ticket_id: &str) -> AgentResult<()> {
        let ticket = self.orchestrator.tickets().get_ticket(ticket_id).await?;
        match ticket.status {
            TicketStatus::Backlog => {
                self.orchestrator
                    .transition_ticket_status(ticket_id, TicketStatus::Ready, &self.id)
                    .await?;
                self.orchestrator
                    .transition_ticket_status(ticket_id, TicketStatus::InProgress, &self.id)
                    .await?;
            }
            TicketStatus::Ready => {
                self.orchestrator
                    .transition_ticket_status(ticket_id, TicketStatus::InProgress, &self.id)
                    .await?;
            }
            _ => {}
        }
        Ok(())
    }

    fn system_prompt(&self) -> String {
        self.stack.lock().build_system_prompt()
    }

    fn plan_executor_max_steps(&self) -> usize {
        self.plan_executor.max_steps()
    }

    fn enter_phase(&self, ticket: &Ticket, phase: Phase) {
        tracing::info!(
            agent = %self.id,
            ticket = %ticket.id,
            phase = %phase,
            stack = %self.describe_stack(),
            "entering phase"
        );
        self.set_state(AgentState::Working {
            ticket_id: ticket.id.clone(),
            phase,
        });
    }

    fn set_state(&self, state: AgentState) {
        *self.state.lock() = state;
    }

    fn check_cancelled(&self) -> AgentResult<()> {
        if self.cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        Ok(())
    }
}

fn failure_kind(err: &AgentError) -> &'static str {
    match err {
        AgentError::Llm(_) => "llm",
        AgentError::Cancelled => "cancelled",
        _ => "execution",
    }
}

/// Build the episodic record for an outcome. The outcome id is freshly
/// generated; outcomes themselves are persisted with their ticket.
pub fn extract_knowledge_from_outcome(outcome: &Outcome, plan: &Plan) -> Knowledge {
    let approach = match plan {
        Plan::ForTask { task, .. } => task.description().to_string(),
        Plan::Blank => String::new(),
    };
    let learnings = match outcome.detail() {
        Some(detail) => match (&detail.error, &detail.message) {
            (Some(error), _) => format!("Failed: {error}"),
            (None, Some(message)) => format!("Succeeded.\n{message}"),
            (None, None) => "Succeeded.".to_string(),
        },
        None => "No outcome recorded.".to_string(),
    };
    Knowledge::FromOutcome {
        outcome_id: ampere_types::fresh_id(),
        approach,
        learnings,
        timestamp_ms: now_ms(),
    }
}

#[derive(Deserialize)]
struct IdeaDraft {
    summary: String,
    #[serde(default)]
    approach: Option<String>,
}

/// Lenient idea parsing: a JSON array if one is present, otherwise the
/// reply text as a single idea. A blank reply yields no ideas.
fn parse_ideas(reply: &str) -> Vec<Idea> {
    if let Some(json) = extract_json_array(reply) {
        if let Ok(drafts) = serde_json::from_str::<Vec<IdeaDraft>>(&json) {
            return drafts
                .into_iter()
                .filter(|draft| !draft.summary.trim().is_empty())
                .map(|draft| {
                    let approach = draft
                        .approach
                        .filter(|a| !a.trim().is_empty())
                        .unwrap_or_else(|| draft.summary.clone());
                    Idea::new(draft.summary, approach)
                })
                .collect();
        }
    }
    let trimmed = reply.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    let summary = trimmed.lines().next().unwrap_or(trimmed).to_string();
    vec![Idea::new(summary, trimmed.to_string())]
}

/// Lenient step parsing: JSON array of strings, else bulleted/numbered
/// lines.
fn parse_steps(reply: &str) -> Vec<String> {
    if let Some(json) = extract_json_array(reply) {
        if let Ok(steps) = serde_json::from_str::<Vec<String>>(&json) {
            return steps
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
    }
    reply
        .lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            let without_bullet = trimmed
                .strip_prefix("- ")
                .or_else(|| trimmed.strip_prefix("* "))
                .or_else(|| {
                    trimmed
                        .split_once(". ")
                        .filter(|(n, _)| n.chars().all(|c| c.is_ascii_digit()))
                        .map(|(_, rest)| rest)
                })?;
            let step = without_bullet.trim();
            (!step.is_empty()).then(|| step.to_string())
        })
        .collect()
}

fn extract_json_array(reply: &str) -> Option<String> {
    let start = reply.find('[')?;
    let end = reply.rfind(']')?;
    (end > start).then(|| reply[start..=end].to_string())
}


#[cfg(test)]
mod loop_tests {
    use super::*;
    use std::collections::BTreeMap;

    use async_trait::async_trait;

    use ampere_knowledge::KnowledgeRepository;
    use ampere_orchestrator::EscalationClassifier;
    use ampere_provider::{ScriptedProvider, StaticProvider};
    use ampere_store::Database;
    use ampere_threads::MessageThreadApi;
    use ampere_tickets::TicketRepository;
    use ampere_types::{TicketPriority, TicketType};

    use crate::executor::StepResult;

    struct FileWriter;

    #[async_trait]
    impl StepExecutor for FileWriter {
        async fn execute(
            &self,
            step: &Task,
            _context: &BTreeMap<String, String>,
        ) -> anyhow::Result<StepResult> {
            Ok(StepResult::Completed {
                summary: step.description().to_string(),
                context_updates: BTreeMap::new(),
                changed_files: vec!["src/auth.rs".to_string()],
            })
        }
    }

    struct AlwaysCritical;

    #[async_trait]
    impl StepExecutor for AlwaysCritical {
        async fn execute(
            &self,
            _step: &Task,
            _context: &BTreeMap<String, String>,
        ) -> anyhow::Result<StepResult> {
            Ok(StepResult::Failed {
                error: "cannot write to workspace".to_string(),
                critical: true,
            })
        }
    }

    struct Fixture {
        db: Arc<Database>,
        bus: EventBus,
        orchestrator: Arc<TicketOrchestrator>,
    }

    async fn fixture() -> Fixture {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let bus = EventBus::new(db.clone());
        let tickets = Arc::new(TicketRepository::new(db.clone()));
        let threads = Arc::new(MessageThreadApi::new(db.clone(), bus.clone()));
        let orchestrator = Arc::new(TicketOrchestrator::new(
            tickets,
            threads,
            bus.clone(),
            EscalationClassifier::keyword_only(),
        ));
        Fixture {
            db,
            bus,
            orchestrator,
        }
    }

    fn agent(
        fixture: &Fixture,
        provider: Arc<dyn LlmProvider>,
        steps: Arc<dyn StepExecutor>,
        memory: Option<Arc<MemoryService>>,
    ) -> Agent {
        Agent::new(
            AgentConfig::new("eng", Affinity::Engineering),
            provider,
            fixture.orchestrator.clone(),
            fixture.bus.clone(),
            steps,
            memory,
        )
    }

    async fn assigned_ticket(fixture: &Fixture) -> Ticket {
        let (ticket, _) = fixture
            .orchestrator
            .create_ticket("Add auth", "JWT login", TicketType::Task, TicketPriority::Medium, "pm")
            .await
            .unwrap();
        fixture
            .orchestrator
            .assign_ticket(&ticket.id, Some("eng"), "pm")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn successful_loop_completes_the_ticket() {
        let fixture = fixture().await;
        let memory = Arc::new(MemoryService::new(
            "eng",
            Arc::new(KnowledgeRepository::new(fixture.db.clone())),
        ));
        let provider = Arc::new(ScriptedProvider::new([
            r#"[{"summary": "add jwt middleware", "approach": "wire middleware into router"}]"#,
            r#"["write failing test", "implement middleware"]"#,
        ]));
        let agent = agent(&fixture, provider, Arc::new(FileWriter), Some(memory.clone()));

        let ticket = assigned_ticket(&fixture).await;
        let outcome = agent.run_ticket(&ticket.id).await.unwrap();

        assert!(outcome.is_success());
        // Every step wrote a file, so the aggregate reports changed code.
        match &outcome {
            Outcome::CodeChangedSuccess(detail) => {
                assert!(detail.changed_files.contains(&"src/auth.rs".to_string()))
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        let read = fixture
            .orchestrator
            .tickets()
            .get_ticket(&ticket.id)
            .await
            .unwrap();
        assert_eq!(read.status, TicketStatus::Done);

        // LEARN persisted an episode tagged with the ticket type.
        let repo = KnowledgeRepository::new(fixture.db.clone());
        let learned = repo.find_knowledge_by_tag("task").await.unwrap();
        assert_eq!(learned.len(), 1);
        assert!(learned[0].tags.contains(&"succeeded".to_string()));
        assert_eq!(agent.state(), AgentState::Blank);
    }

    #[tokio::test]
    async fn critical_execution_failure_blocks_the_ticket() {
        let fixture = fixture().await;
        let provider = Arc::new(ScriptedProvider::new([
            r#"[{"summary": "attempt fix", "approach": "patch the handler"}]"#,
            r#"["apply patch"]"#,
        ]));
        let agent = agent(&fixture, provider, Arc::new(AlwaysCritical), None);

        let ticket = assigned_ticket(&fixture).await;
        let outcome = agent.run_ticket(&ticket.id).await.unwrap();

        assert!(!outcome.is_success());
        // Nothing was written before the failure, so no code changed.
        assert!(matches!(outcome, Outcome::NoChangesFailure(_)));
        let read = fixture
            .orchestrator
            .tickets()
            .get_ticket(&ticket.id)
            .await
            .unwrap();
        assert_eq!(read.status, TicketStatus::Blocked);
    }

    #[tokio::test]
    async fn empty_perception_aborts_without_side_effects() {
        let fixture = fixture().await;
        let agent = agent(
            &fixture,
            Arc::new(StaticProvider::new("")),
            Arc::new(FileWriter),
            None,
        );

        let ticket = assigned_ticket(&fixture).await;
        let outcome = agent.run_ticket(&ticket.id).await.unwrap();
        assert_eq!(outcome, Outcome::Blank);
        let read = fixture
            .orchestrator
            .tickets()
            .get_ticket(&ticket.id)
            .await
            .unwrap();
        assert_eq!(read.status, TicketStatus::Backlog);
    }

    #[tokio::test]
    async fn provider_failure_still_learns_and_blocks() {
        let fixture = fixture().await;
        let memory = Arc::new(MemoryService::new(
            "eng",
            Arc::new(KnowledgeRepository::new(fixture.db.clone())),
        ));
        // One perceive reply, then the provider is exhausted and PLAN fails.
        let provider = Arc::new(ScriptedProvider::new([
            r#"[{"summary": "attempt", "approach": "try"}]"#,
        ]));
        let agent = agent(&fixture, provider, Arc::new(FileWriter), Some(memory));

        let ticket = assigned_ticket(&fixture).await;
        let outcome = agent.run_ticket(&ticket.id).await.unwrap();
        assert!(!outcome.is_success());

        let repo = KnowledgeRepository::new(fixture.db.clone());
        let learned = repo.find_knowledge_by_tag("failed").await.unwrap();
        assert_eq!(learned.len(), 1);
        assert!(learned[0].learnings.contains("model call failed"));

        // The plan-phase failure lands after Ready -> InProgress, so the
        // ticket can and does end up Blocked.
        let read = fixture
            .orchestrator
            .tickets()
            .get_ticket(&ticket.id)
            .await
            .unwrap();
        assert_eq!(read.status, TicketStatus::Blocked);
    }

    #[tokio::test]
    async fn delegation_assigns_and_returns_the_plan() {
        let fixture = fixture().await;
        let coordinator_provider = Arc::new(ScriptedProvider::new([
            r#"[{"summary": "split into backend work", "approach": "implement endpoint"}]"#,
            r#"["define schema", "implement endpoint"]"#,
        ]));
        let coordinator = Agent::new(
            AgentConfig::new("pm", Affinity::Coordination),
            coordinator_provider,
            fixture.orchestrator.clone(),
            fixture.bus.clone(),
            Arc::new(FileWriter),
            None,
        );

        let (ticket, _) = fixture
            .orchestrator
            .create_ticket("API", "new endpoint", TicketType::Feature, TicketPriority::High, "pm")
            .await
            .unwrap();
        let plan = coordinator.delegate_ticket(&ticket.id, "eng").await.unwrap();
        assert_eq!(plan.steps().len(), 2);

        let read = fixture
            .orchestrator
            .tickets()
            .get_ticket(&ticket.id)
            .await
            .unwrap();
        assert_eq!(read.assigned_agent_id.as_deref(), Some("eng"));

        // Worker picks the plan up at EXECUTE.
        let worker = agent(
            &fixture,
            Arc::new(StaticProvider::new("unused")),
            Arc::new(FileWriter),
            None,
        );
        let outcome = worker.run_from_plan(&ticket.id, plan).await.unwrap();
        assert!(outcome.is_success());
        assert!(outcome.changed_code());
        let read = fixture
            .orchestrator
            .tickets()
            .get_ticket(&ticket.id)
            .await
            .unwrap();
        assert_eq!(read.status, TicketStatus::Done);
    }
}
