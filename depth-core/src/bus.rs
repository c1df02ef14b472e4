//! Publish/subscribe event bus
//!
//! Decouples the single upstream connection from its consumers. The bus owns
//! the handler registry: handlers are registered once and stay registered
//! until their `Registration` is dropped.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::{BusEvent, FeedResult, Topic};

/// Receives events for one topic
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, event: BusEvent) -> FeedResult<()>;
}

/// Publish/subscribe facility
///
/// Delivery guarantees:
/// - every handler registered on a topic when an event is published receives it
/// - handlers registered later do not (no replay)
/// - a failing or panicking handler affects neither other handlers nor the publisher
pub trait EventBus: Send + Sync {
    /// Publish an event on its topic. Never blocks.
    fn publish(&self, event: BusEvent);

    /// Register a handler for a topic
    fn subscribe(&self, topic: Topic, handler: Arc<dyn EventHandler>) -> Registration;
}

/// Keeps a handler registered; dropping it stops delivery
pub struct Registration {
    id: u64,
    topic: Topic,
    task: JoinHandle<()>,
}

impl Registration {
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .finish()
    }
}

/// One registered handler's queue
struct Slot {
    id: u64,
    tx: mpsc::UnboundedSender<BusEvent>,
}

/// In-process event bus
///
/// Each registration gets its own unbounded queue and delivery task, so a
/// slow handler never holds up the publisher or its peers.
pub struct InProcessBus {
    next_id: AtomicU64,
    slots: RwLock<HashMap<Topic, Vec<Slot>>>,
}

impl InProcessBus {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Number of live handlers on a topic
    pub fn handler_count(&self, topic: Topic) -> usize {
        self.slots
            .read()
            .get(&topic)
            .map(|slots| slots.iter().filter(|s| !s.tx.is_closed()).count())
            .unwrap_or(0)
    }

    async fn deliver(
        id: u64,
        topic: Topic,
        handler: Arc<dyn EventHandler>,
        mut rx: mpsc::UnboundedReceiver<BusEvent>,
    ) {
        while let Some(event) = rx.recv().await {
            match AssertUnwindSafe(handler.handle(event)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!("[EventBus] Handler {} on {} failed: {}", id, topic, e);
                }
                Err(_) => {
                    error!("[EventBus] Handler {} on {} panicked", id, topic);
                }
            }
        }
        debug!("[EventBus] Handler {} on {} stopped", id, topic);
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus for InProcessBus {
    fn publish(&self, event: BusEvent) {
        let topic = event.topic();
        let mut closed = false;

        {
            let slots = self.slots.read();
            let Some(handlers) = slots.get(&topic) else {
                debug!("[EventBus] No handlers registered on {}", topic);
                return;
            };

            for slot in handlers {
                if slot.tx.send(event.clone()).is_err() {
                    closed = true;
                }
            }
        }

        if closed {
            let mut slots = self.slots.write();
            if let Some(handlers) = slots.get_mut(&topic) {
                handlers.retain(|slot| !slot.tx.is_closed());
            }
        }
    }

    fn subscribe(&self, topic: Topic, handler: Arc<dyn EventHandler>) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();

        self.slots
            .write()
            .entry(topic)
            .or_default()
            .push(Slot { id, tx });

        debug!("[EventBus] Registered handler {} on {}", id, topic);

        let task = tokio::spawn(Self::deliver(id, topic, handler, rx));
        Registration { id, topic, task }
    }
}

impl std::fmt::Debug for InProcessBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.slots.read();
        let ids: HashMap<Topic, Vec<u64>> = slots
            .iter()
            .map(|(topic, handlers)| (*topic, handlers.iter().map(|s| s.id).collect()))
            .collect();
        f.debug_struct("InProcessBus").field("handlers", &ids).finish()
    }
}

/// Forwards every event into a channel
///
/// Lets task-style consumers read a topic as a stream of events.
pub struct ForwardingHandler {
    tx: mpsc::UnboundedSender<BusEvent>,
}

impl ForwardingHandler {
    pub fn new(tx: mpsc::UnboundedSender<BusEvent>) -> Self {
        Self { tx }
    }

    /// Create a handler together with the receiving end
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<BusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self::new(tx)), rx)
    }
}

#[async_trait]
impl EventHandler for ForwardingHandler {
    async fn handle(&self, event: BusEvent) -> FeedResult<()> {
        // A dropped receiver just means nobody is listening anymore
        let _ = self.tx.send(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BookContents, FeedError, LifecycleEvent, OrderBookDelta};
    use std::time::Duration;

    struct FailingHandler;

    #[async_trait]
    impl EventHandler for FailingHandler {
        async fn handle(&self, _event: BusEvent) -> FeedResult<()> {
            Err(FeedError::parse("handler rejected event"))
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl EventHandler for PanickingHandler {
        async fn handle(&self, _event: BusEvent) -> FeedResult<()> {
            panic!("handler blew up");
        }
    }

    fn connected(session: u64) -> BusEvent {
        LifecycleEvent::Connected { session }.into()
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<BusEvent>) -> Option<BusEvent> {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn test_delivers_to_all_handlers_in_order() {
        let bus = InProcessBus::new();
        let (first, mut first_rx) = ForwardingHandler::channel();
        let (second, mut second_rx) = ForwardingHandler::channel();
        let _r1 = bus.subscribe(Topic::Connection, first);
        let _r2 = bus.subscribe(Topic::Connection, second);

        bus.publish(connected(1));
        bus.publish(LifecycleEvent::Disconnected { session: 1 }.into());

        for rx in [&mut first_rx, &mut second_rx] {
            assert_eq!(recv(rx).await, Some(connected(1)));
            assert_eq!(
                recv(rx).await,
                Some(BusEvent::Connection(LifecycleEvent::Disconnected { session: 1 }))
            );
        }
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let bus = InProcessBus::new();
        let (handler, mut rx) = ForwardingHandler::channel();
        let _r = bus.subscribe(Topic::OrderBook, handler);

        bus.publish(connected(1));
        let delta = OrderBookDelta {
            instrument_key: "BTC-USD".to_string(),
            session: 1,
            contents: BookContents::default(),
        };
        bus.publish(delta.clone().into());

        assert_eq!(recv(&mut rx).await, Some(BusEvent::OrderBook(delta)));
    }

    #[tokio::test]
    async fn test_late_handler_gets_no_replay() {
        let bus = InProcessBus::new();
        bus.publish(connected(1));

        let (handler, mut rx) = ForwardingHandler::channel();
        let _r = bus.subscribe(Topic::Connection, handler);
        bus.publish(connected(2));

        assert_eq!(recv(&mut rx).await, Some(connected(2)));
    }

    #[tokio::test]
    async fn test_failing_and_panicking_handlers_are_isolated() {
        let bus = InProcessBus::new();
        let _failing = bus.subscribe(Topic::Connection, Arc::new(FailingHandler));
        let _panicking = bus.subscribe(Topic::Connection, Arc::new(PanickingHandler));
        let (handler, mut rx) = ForwardingHandler::channel();
        let _r = bus.subscribe(Topic::Connection, handler);

        bus.publish(connected(1));
        bus.publish(connected(2));

        assert_eq!(recv(&mut rx).await, Some(connected(1)));
        assert_eq!(recv(&mut rx).await, Some(connected(2)));
        // The panicking handler keeps its registration
        assert_eq!(bus.handler_count(Topic::Connection), 3);
    }

    #[tokio::test]
    async fn test_dropped_registration_is_pruned() {
        let bus = InProcessBus::new();
        let (handler, mut rx) = ForwardingHandler::channel();
        let registration = bus.subscribe(Topic::Connection, handler);
        assert_eq!(registration.topic(), Topic::Connection);

        drop(registration);
        tokio::time::timeout(Duration::from_secs(1), async {
            while bus.handler_count(Topic::Connection) > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        bus.publish(connected(1));

        assert_eq!(bus.handler_count(Topic::Connection), 0);
        assert_eq!(recv(&mut rx).await, None);
    }
}
