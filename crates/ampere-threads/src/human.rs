// Human-facing side of escalation: a notifier side-channel fed by the bus
// and a registry of requests waiting for a person to answer.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};

use ampere_bus::EventHandler;
use ampere_types::{fresh_id, AmpereEvent, EventEnvelope};

pub const DEFAULT_HUMAN_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[async_trait]
pub trait HumanNotifier: Send + Sync {
    async fn notify_escalation(
        &self,
        thread_id: &str,
        agent_id: &str,
        reason: &str,
        context: &BTreeMap<String, String>,
    );
}

/// Bus subscriber that forwards `EscalationRequested` events to the
/// configured notifier. Registered by the runtime against the message event
/// class.
pub struct EscalationEventHandler {
    notifier: Arc<dyn HumanNotifier>,
}

impl EscalationEventHandler {
    pub fn new(notifier: Arc<dyn HumanNotifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl EventHandler for EscalationEventHandler {
    async fn handle(&self, event: EventEnvelope) -> anyhow::Result<()> {
        if let AmpereEvent::EscalationRequested {
            thread_id,
            requested_by,
            reason,
            context,
        } = &event.payload
        {
            self.notifier
                .notify_escalation(thread_id, requested_by, reason, context)
                .await;
        }
        Ok(())
    }
}

/// What a waiting caller eventually receives. Timeouts and cancellations
/// surface as `NoResponse`, never as an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HumanResponse {
    Answered(String),
    NoResponse,
}

#[derive(Debug, Clone)]
enum Resolution {
    Pending,
    Answered(String),
    Cancelled,
}

/// Pending-request table keyed by generated id. `wait_for_response` suspends
/// the caller until someone answers, cancels, or the timeout elapses.
pub struct HumanResponseRegistry {
    waiters: Mutex<HashMap<String, watch::Sender<Resolution>>>,
    default_timeout: Duration,
}

impl HumanResponseRegistry {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            waiters: Mutex::new(HashMap::new()),
            default_timeout,
        }
    }

    pub async fn register_request(&self) -> String {
        let id = fresh_id();
        let (tx, _rx) = watch::channel(Resolution::Pending);
        self.waiters.lock().await.insert(id.clone(), tx);
        id
    }

    pub async fn wait_for_response(
        &self,
        id: &str,
        timeout: Option<Duration>,
    ) -> HumanResponse {
        let mut rx = {
            let waiters = self.waiters.lock().await;
            match waiters.get(id) {
                Some(tx) => tx.subscribe(),
                None => return HumanResponse::NoResponse,
            }
        };

        let deadline = timeout.unwrap_or(self.default_timeout);
        let response = tokio::time::timeout(deadline, async {
            loop {
                {
                    let current = rx.borrow_and_update().clone();
                    match current {
                        Resolution::Answered(text) => return HumanResponse::Answered(text),
                        Resolution::Cancelled => return HumanResponse::NoResponse,
                        Resolution::Pending => {}
                    }
                }
                if rx.changed().await.is_err() {
                    return HumanResponse::NoResponse;
                }
            }
        })
        .await
        .unwrap_or(HumanResponse::NoResponse);

        self.waiters.lock().await.remove(id);
        response
    }

    /// Resolve a pending request. Returns false when the id is unknown.
    /// `send_replace` keeps the resolution visible even when nobody is
    /// waiting yet.
    pub async fn provide_response(&self, id: &str, text: impl Into<String>) -> bool {
        let waiters = self.waiters.lock().await;
        match waiters.get(id) {
            Some(tx) => {
                tx.send_replace(Resolution::Answered(text.into()));
                true
            }
            None => false,
        }
    }

    pub async fn cancel_request(&self, id: &str) -> bool {
        let waiters = self.waiters.lock().await;
        match waiters.get(id) {
            Some(tx) => {
                tx.send_replace(Resolution::Cancelled);
                true
            }
            None => false,
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.waiters.lock().await.len()
    }
}

impl Default for HumanResponseRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_HUMAN_RESPONSE_TIMEOUT)
    }
}
