// Explicit context wiring: the bus and repositories are built once, in
// dependency order, and passed around by handle. No process-wide singletons;
// agents are registered against the context and torn down before it.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::Level;

use ampere_agent::Agent;
use ampere_bus::{EventBus, EventHandler, EventSelector, SubscriptionHandle};
use ampere_knowledge::{KnowledgeRepository, MemoryService};
use ampere_observability::{emit_loop_event, LoopEvent, ProcessKind};
use ampere_orchestrator::{EscalationClassifier, TicketOrchestrator};
use ampere_provider::LlmProvider;
use ampere_store::Database;
use ampere_threads::{
    EscalationEventHandler, HumanNotifier, HumanResponseRegistry, MessageThreadApi,
};
use ampere_tickets::TicketRepository;
use ampere_types::{AmpereEvent, EventEnvelope, EventSource, Urgency};

use crate::config::CoreConfig;

pub struct AmpereContext {
    pub config: CoreConfig,
    pub db: Arc<Database>,
    pub bus: EventBus,
    pub tickets: Arc<TicketRepository>,
    pub threads: Arc<MessageThreadApi>,
    pub knowledge: Arc<KnowledgeRepository>,
    pub orchestrator: Arc<TicketOrchestrator>,
    pub responses: Arc<HumanResponseRegistry>,
    agents: Mutex<Vec<Arc<Agent>>>,
    subscriptions: Mutex<Vec<SubscriptionHandle>>,
    cancel: CancellationToken,
}

impl AmpereContext {
    /// Build the full context. `classifier_provider` backs the escalation
    /// classifier's fallback path; `None` keeps classification keyword-only.
    pub async fn init(
        config: CoreConfig,
        classifier_provider: Option<Arc<dyn LlmProvider>>,
    ) -> anyhow::Result<Arc<Self>> {
        let db = Arc::new(match &config.db_path {
            Some(path) => Database::open(path).await?,
            None => Database::open_in_memory().await?,
        });
        let bus = EventBus::new(db.clone()).with_replay_batch_size(config.replay_batch_size);
        let tickets = Arc::new(TicketRepository::new(db.clone()));
        let threads = Arc::new(MessageThreadApi::new(db.clone(), bus.clone()));
        let knowledge = Arc::new(KnowledgeRepository::new(db.clone()));
        let orchestrator = Arc::new(TicketOrchestrator::new(
            tickets.clone(),
            threads.clone(),
            bus.clone(),
            EscalationClassifier::new(classifier_provider),
        ));
        let responses = Arc::new(HumanResponseRegistry::new(config.human_response_timeout()));

        Ok(Arc::new(Self {
            config,
            db,
            bus,
            tickets,
            threads,
            knowledge,
            orchestrator,
            responses,
            agents: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        }))
    }

    /// A memory service bound to one agent over the shared repository.
    pub fn memory_service_for(&self, agent_id: &str) -> Arc<MemoryService> {
        Arc::new(MemoryService::new(agent_id, self.knowledge.clone()))
    }

    /// Wire the escalation side-channel: `EscalationRequested` events are
    /// forwarded to `notifier`.
    pub async fn register_escalation_handler(
        &self,
        notifier: Arc<dyn HumanNotifier>,
    ) -> SubscriptionHandle {
        let handle = self
            .bus
            .subscribe(
                "escalation-forwarder",
                EventSelector::ByType("message.escalation_requested".to_string()),
                Arc::new(EscalationEventHandler::new(notifier)),
            )
            .await;
        self.subscriptions.lock().await.push(handle.clone());
        handle
    }

    /// Subscribe an agent's cognitive loop to its ticket assignments and
    /// announce that monitoring started.
    pub async fn register_agent(&self, agent: Arc<Agent>) -> anyhow::Result<SubscriptionHandle> {
        let agent_id = agent.id().to_string();
        let handle = self
            .bus
            .subscribe(
                format!("{agent_id}-assignments"),
                EventSelector::ByType("ticket.assigned".to_string()),
                Arc::new(AssignmentHandler {
                    agent: agent.clone(),
                }),
            )
            .await;
        self.bus
            .publish(EventEnvelope::new(
                EventSource::System,
                Urgency::Low,
                AmpereEvent::MonitoringStarted {
                    agent_id: agent_id.clone(),
                    subject: "ticket.assigned".to_string(),
                },
            ))
            .await?;
        self.agents.lock().await.push(agent);
        self.subscriptions.lock().await.push(handle.clone());
        Ok(handle)
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel agent scopes, stop subscriptions, and drain the bus. Safe to
    /// call more than once.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        for agent in self.agents.lock().await.iter() {
            agent.cancellation_token().cancel();
        }
        self.bus.quiesce().await;
        for handle in self.subscriptions.lock().await.drain(..) {
            handle.cancel();
        }
    }
}

/// Runs the cognitive loop whenever a ticket is assigned to the wrapped
/// agent. Dispatch is serial per subscription, so one agent works one
/// ticket at a time.
struct AssignmentHandler {
    agent: Arc<Agent>,
}

#[async_trait]
impl EventHandler for AssignmentHandler {
    async fn handle(&self, event: EventEnvelope) -> anyhow::Result<()> {
        let AmpereEvent::TicketAssigned {
            ticket_id,
            assigned_to: Some(assigned_to),
            ..
        } = &event.payload
        else {
            return Ok(());
        };
        if assigned_to != self.agent.id() {
            return Ok(());
        }

        let result = self.agent.run_ticket(ticket_id).await;
        let (level, status, error_code) = match &result {
            Ok(outcome) if outcome.is_success() => (Level::INFO, "succeeded", None),
            Ok(_) => (Level::WARN, "failed", None),
            Err(err) => (Level::WARN, "errored", Some(err.to_string())),
        };
        emit_loop_event(
            level,
            ProcessKind::Agent,
            LoopEvent {
                event: "loop.finished",
                component: "runtime.assignment",
                agent_id: Some(self.agent.id()),
                ticket_id: Some(ticket_id),
                phase: None,
                status: Some(status),
                error_code: error_code.as_deref(),
                detail: None,
            },
        );
        Ok(())
    }
}
