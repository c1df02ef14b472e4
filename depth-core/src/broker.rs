//! Event bus over Redis pub/sub
//!
//! Lets the stream connection and its consumers live in different processes.
//! Events are published as JSON on a channel named after their topic. Messages
//! coming back from the broker are handed to a local `InProcessBus`, so
//! handlers get the same ordering and failure isolation as in-process delivery.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{
    BusEvent, EventBus, EventHandler, FeedError, FeedResult, InProcessBus, Registration, Topic,
};

/// Encode an event as its broker channel and JSON payload
pub fn encode(event: &BusEvent) -> FeedResult<(Topic, String)> {
    let payload = serde_json::to_string(event)
        .map_err(|e| FeedError::parse(format!("Failed to encode event: {}", e)))?;
    Ok((event.topic(), payload))
}

/// Decode a broker message; the event must belong to the channel it came on
pub fn decode(channel: &str, payload: &str) -> FeedResult<BusEvent> {
    let event: BusEvent = serde_json::from_str(payload)
        .map_err(|e| FeedError::parse(format!("Invalid event on {}: {}", channel, e)))?;

    if event.topic().as_str() != channel {
        return Err(FeedError::parse(format!(
            "{} event received on channel {}",
            event.topic(),
            channel
        )));
    }
    Ok(event)
}

/// Event bus shared through a Redis broker
pub struct RedisBus {
    local: Arc<InProcessBus>,
    outbound: mpsc::UnboundedSender<BusEvent>,
    publisher: JoinHandle<()>,
    subscriber: JoinHandle<()>,
}

impl RedisBus {
    /// Connect to the broker and subscribe to every topic
    pub async fn connect(url: &str) -> FeedResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| FeedError::config(format!("Invalid Redis URL {}: {}", url, e)))?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| FeedError::transport(format!("Redis connection failed: {}", e)))?;

        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| FeedError::transport(format!("Redis pub/sub connection failed: {}", e)))?;
        for topic in Topic::ALL {
            pubsub.subscribe(topic.as_str()).await.map_err(|e| {
                FeedError::transport(format!("Redis subscribe to {} failed: {}", topic, e))
            })?;
        }

        info!("[RedisBus] Connected to {}", url);

        let inbound = pubsub.into_on_message().filter_map(|msg| async move {
            match msg.get_payload::<String>() {
                Ok(payload) => Some((msg.get_channel_name().to_string(), payload)),
                Err(e) => {
                    warn!("[RedisBus] Unreadable payload: {}", e);
                    None
                }
            }
        });

        let local = Arc::new(InProcessBus::new());
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        Ok(Self {
            subscriber: tokio::spawn(relay_inbound(inbound, local.clone())),
            publisher: tokio::spawn(forward_outbound(outbound_rx, connection)),
            local,
            outbound,
        })
    }
}

impl EventBus for RedisBus {
    fn publish(&self, event: BusEvent) {
        if self.outbound.send(event).is_err() {
            warn!("[RedisBus] Publisher stopped, event dropped");
        }
    }

    fn subscribe(&self, topic: Topic, handler: Arc<dyn EventHandler>) -> Registration {
        self.local.subscribe(topic, handler)
    }
}

impl Drop for RedisBus {
    fn drop(&mut self) {
        self.publisher.abort();
        self.subscriber.abort();
    }
}

impl std::fmt::Debug for RedisBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBus").field("local", &self.local).finish()
    }
}

/// Publish events in order on a single connection
async fn forward_outbound(
    mut rx: mpsc::UnboundedReceiver<BusEvent>,
    mut connection: MultiplexedConnection,
) {
    while let Some(event) = rx.recv().await {
        let (topic, payload) = match encode(&event) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("[RedisBus] {}", e);
                continue;
            }
        };

        let result: redis::RedisResult<()> = connection.publish(topic.as_str(), payload).await;
        if let Err(e) = result {
            warn!("[RedisBus] Failed to publish on {}: {}", topic, e);
        }
    }
    debug!("[RedisBus] Publisher stopped");
}

/// Hand every broker message to the local handlers
async fn relay_inbound<S>(inbound: S, local: Arc<InProcessBus>)
where
    S: Stream<Item = (String, String)>,
{
    tokio::pin!(inbound);

    while let Some((channel, payload)) = inbound.next().await {
        match decode(&channel, &payload) {
            Ok(event) => local.publish(event),
            Err(e) => warn!("[RedisBus] Dropping message: {}", e),
        }
    }
    error!("[RedisBus] Subscription stream ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BookContents, ForwardingHandler, LifecycleEvent, OrderBookDelta, PriceLevel};
    use std::time::Duration;

    fn delta() -> BusEvent {
        OrderBookDelta {
            instrument_key: "BTC-USD".to_string(),
            session: 2,
            contents: BookContents {
                bids: Some(vec![PriceLevel::new("99.00", "3")]),
                asks: None,
            },
        }
        .into()
    }

    #[test]
    fn test_encode_uses_topic_channel() {
        let (topic, payload) = encode(&delta()).unwrap();
        assert_eq!(topic.as_str(), "orderbook");
        assert_eq!(decode("orderbook", &payload).unwrap(), delta());

        let (topic, payload) =
            encode(&LifecycleEvent::Disconnected { session: 4 }.into()).unwrap();
        assert_eq!(topic.as_str(), "websocket");
        assert_eq!(
            decode("websocket", &payload).unwrap(),
            BusEvent::Connection(LifecycleEvent::Disconnected { session: 4 })
        );
    }

    #[test]
    fn test_decode_rejects_foreign_channel_and_garbage() {
        let (_, payload) = encode(&delta()).unwrap();
        assert!(matches!(
            decode("websocket", &payload),
            Err(FeedError::Parse(_))
        ));
        assert!(matches!(
            decode("orderbook", "not json"),
            Err(FeedError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_relay_delivers_valid_messages_in_order() {
        let local = Arc::new(InProcessBus::new());
        let (handler, mut rx) = ForwardingHandler::channel();
        let _registration = local.subscribe(Topic::OrderBook, handler);

        let (_, payload) = encode(&delta()).unwrap();
        let messages = vec![
            ("orderbook".to_string(), "{".to_string()),
            ("orderbook".to_string(), payload.clone()),
            ("websocket".to_string(), payload),
            (
                "orderbook".to_string(),
                encode(&delta()).unwrap().1.replace("BTC-USD", "ETH-USD"),
            ),
        ];

        relay_inbound(futures::stream::iter(messages), local).await;

        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert_eq!(first, Some(delta()));
        match tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
        {
            Some(BusEvent::OrderBook(d)) => assert_eq!(d.instrument_key, "ETH-USD"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connect_rejects_non_redis_url() {
        assert!(matches!(
            RedisBus::connect("http://localhost:6379").await,
            Err(FeedError::Config(_))
        ));
    }
}
