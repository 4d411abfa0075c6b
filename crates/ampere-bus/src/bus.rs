// In-process publish/subscribe with durable publish and deterministic
// replay. Persist and fan-out happen under one ingest lock so every
// subscriber observes the same total order; each subscription drains its own
// queue on a dedicated task, which keeps handler invocations strictly
// serial per subscriber.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use ampere_store::{Database, StoreError};
use ampere_types::{EventClass, EventEnvelope};

use crate::event_log::EventLog;

pub const DEFAULT_REPLAY_BATCH_SIZE: usize = 500;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("event persistence failed: {0}")]
    Persistence(#[from] StoreError),
}

/// What a subscription wants to see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventSelector {
    All,
    ByType(String),
    ByClass(EventClass),
    BySourceAgent(String),
}

impl EventSelector {
    pub fn matches(&self, envelope: &EventEnvelope) -> bool {
        match self {
            EventSelector::All => true,
            EventSelector::ByType(event_type) => envelope.event_type == *event_type,
            EventSelector::ByClass(class) => envelope.class == *class,
            EventSelector::BySourceAgent(agent_id) => matches!(
                &envelope.source,
                ampere_types::EventSource::Agent { id } if id == agent_id
            ),
        }
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, event: EventEnvelope) -> anyhow::Result<()>;
}

struct Subscription {
    subscriber_id: String,
    selector: EventSelector,
    queue: mpsc::UnboundedSender<EventEnvelope>,
    pending: Arc<AtomicUsize>,
    cancel: CancellationToken,
}

struct BusInner {
    subscriptions: Vec<Subscription>,
}

/// Handle returned by [`EventBus::subscribe`]. Dropping the handle keeps
/// the subscription alive; call [`SubscriptionHandle::cancel`] to stop it.
#[derive(Clone)]
pub struct SubscriptionHandle {
    subscriber_id: String,
    cancel: CancellationToken,
}

impl SubscriptionHandle {
    pub fn subscriber_id(&self) -> &str {
        &self.subscriber_id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[derive(Clone)]
pub struct EventBus {
    log: EventLog,
    inner: Arc<Mutex<BusInner>>,
    replay_batch_size: usize,
}

impl EventBus {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            log: EventLog::new(db),
            inner: Arc::new(Mutex::new(BusInner {
                subscriptions: Vec::new(),
            })),
            replay_batch_size: DEFAULT_REPLAY_BATCH_SIZE,
        }
    }

    pub fn with_replay_batch_size(mut self, batch_size: usize) -> Self {
        self.replay_batch_size = batch_size.max(1);
        self
    }

    /// Durably persist `envelope`, then fan it out to matching subscribers.
    /// Returns once the event is persisted; handler invocations are
    /// asynchronous but happen-before any subsequent replay observes the
    /// event. On a persistence failure nothing is fanned out.
    pub async fn publish(&self, envelope: EventEnvelope) -> Result<(), BusError> {
        let mut inner = self.inner.lock().await;
        self.log.append(&envelope).await?;
        inner
            .subscriptions
            .retain(|sub| !sub.cancel.is_cancelled());
        for sub in &inner.subscriptions {
            if !sub.selector.matches(&envelope) {
                continue;
            }
            sub.pending.fetch_add(1, Ordering::SeqCst);
            if sub.queue.send(envelope.clone()).is_err() {
                sub.pending.fetch_sub(1, Ordering::SeqCst);
                tracing::warn!(
                    subscriber = %sub.subscriber_id,
                    "dropping event for closed subscription"
                );
            }
        }
        Ok(())
    }

    /// Register `handler` for events matching `selector`. Each subscription
    /// drains its queue serially; a failing handler is logged and isolated.
    pub async fn subscribe(
        &self,
        subscriber_id: impl Into<String>,
        selector: EventSelector,
        handler: Arc<dyn EventHandler>,
    ) -> SubscriptionHandle {
        let subscriber_id = subscriber_id.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<EventEnvelope>();
        let pending = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let drain_pending = pending.clone();
        let drain_cancel = cancel.clone();
        let drain_id = subscriber_id.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = drain_cancel.cancelled() => break,
                    received = rx.recv() => {
                        let Some(event) = received else { break };
                        if let Err(err) = handler.handle(event).await {
                            tracing::warn!(
                                subscriber = %drain_id,
                                "event handler failed: {:#}", err
                            );
                        }
                        drain_pending.fetch_sub(1, Ordering::SeqCst);
                    }
                }
            }
        });

        let handle = SubscriptionHandle {
            subscriber_id: subscriber_id.clone(),
            cancel: cancel.clone(),
        };
        self.inner.lock().await.subscriptions.push(Subscription {
            subscriber_id,
            selector,
            queue: tx,
            pending,
            cancel,
        });
        handle
    }

    /// Replay persisted events from `since_ms` to `until_ms` (inclusive) in
    /// `(timestamp, event_id)` order, invoking `handler` inline for each
    /// match. Returns the number of events delivered.
    pub async fn replay_events(
        &self,
        since_ms: i64,
        until_ms: i64,
        selector: &EventSelector,
        handler: &dyn EventHandler,
    ) -> Result<usize, BusError> {
        let mut delivered = 0usize;
        let mut offset = 0usize;
        loop {
            let batch = self
                .log
                .read_batch(since_ms, until_ms, offset, self.replay_batch_size)
                .await?;
            let scanned = batch.scanned;
            for envelope in batch.events {
                if !selector.matches(&envelope) {
                    continue;
                }
                if let Err(err) = handler.handle(envelope).await {
                    tracing::warn!("replay handler failed: {:#}", err);
                }
                delivered += 1;
            }
            if scanned < self.replay_batch_size {
                break;
            }
            offset += scanned;
        }
        Ok(delivered)
    }

    /// Number of deliveries enqueued but not yet handled across live
    /// subscriptions. Inspect only.
    pub async fn pending_event_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner
            .subscriptions
            .iter()
            .filter(|sub| !sub.cancel.is_cancelled())
            .map(|sub| sub.pending.load(Ordering::SeqCst))
            .sum()
    }

    /// Wait until every enqueued delivery has been handled.
    pub async fn quiesce(&self) {
        loop {
            if self.pending_event_count().await == 0 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
    }

    pub fn event_log(&self) -> &EventLog {
        &self.log
    }
}
