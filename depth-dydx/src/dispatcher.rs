//! Market data dispatcher
//!
//! Decodes raw indexer frames and publishes the order book updates they carry
//! on the event bus. Nothing here fails outward: malformed frames are logged
//! and dropped.

use std::sync::Arc;

use depth_core::{EventBus, FeedError, FeedResult, OrderBookDelta};
use tracing::{debug, warn};

use crate::types::{ChannelMessage, ControlMessage};

/// Decoded form of one inbound frame
#[derive(Debug)]
pub enum Decoded {
    /// Frame without a channel (`connected`, `error`, ...)
    Control(ControlMessage),
    /// Book updates, in arrival order
    OrderBook(Vec<OrderBookDelta>),
    /// Recognized but not relevant to the replica
    Ignored(String),
}

/// Decode a raw text frame received on `session`
pub fn decode(raw: &str, session: u64) -> FeedResult<Decoded> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| FeedError::parse(format!("invalid JSON: {}", e)))?;

    if value.get("channel").is_none() {
        let control: ControlMessage = serde_json::from_value(value)
            .map_err(|e| FeedError::parse(format!("invalid control frame: {}", e)))?;
        return Ok(Decoded::Control(control));
    }

    let message: ChannelMessage = serde_json::from_value(value)
        .map_err(|e| FeedError::parse(format!("invalid channel frame: {}", e)))?;

    match message {
        ChannelMessage::OrderBook(book) => {
            let Some(contents) = book.contents else {
                return Ok(Decoded::Ignored(format!(
                    "{} without contents for {}",
                    book.msg_type.as_deref().unwrap_or("orderbook frame"),
                    book.id
                )));
            };

            let deltas = contents
                .into_updates()
                .into_iter()
                .map(|update| OrderBookDelta {
                    instrument_key: book.id.clone(),
                    session,
                    contents: update.into_contents(),
                })
                .collect();
            Ok(Decoded::OrderBook(deltas))
        }
        ChannelMessage::Markets { .. } => Ok(Decoded::Ignored("markets update".to_string())),
        ChannelMessage::Unknown => Ok(Decoded::Ignored("unknown channel".to_string())),
    }
}

/// Routes decoded frames onto the bus
#[derive(Clone)]
pub struct Dispatcher {
    bus: Arc<dyn EventBus>,
}

impl Dispatcher {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }

    /// Handle one raw frame
    pub fn dispatch(&self, raw: &str, session: u64) {
        match decode(raw, session) {
            Ok(Decoded::OrderBook(deltas)) => {
                for delta in deltas {
                    self.bus.publish(delta.into());
                }
            }
            Ok(Decoded::Control(control)) if control.msg_type == "error" => {
                warn!(
                    "[dYdX WS] Server error: {}",
                    control.message.as_deref().unwrap_or("no message")
                );
            }
            Ok(Decoded::Control(control)) => {
                debug!(
                    "[dYdX WS] Control frame: {} (connection {})",
                    control.msg_type,
                    control.connection_id.as_deref().unwrap_or("-")
                );
            }
            Ok(Decoded::Ignored(reason)) => {
                debug!("[dYdX WS] Ignoring frame: {}", reason);
            }
            Err(e) => {
                warn!("[dYdX WS] Dropping frame: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depth_core::{BusEvent, ForwardingHandler, InProcessBus, PriceLevel, Topic};
    use std::time::Duration;

    fn deltas(raw: &str) -> Vec<OrderBookDelta> {
        match decode(raw, 3).unwrap() {
            Decoded::OrderBook(deltas) => deltas,
            other => panic!("expected order book frame, got {:?}", other),
        }
    }

    #[test]
    fn test_decodes_channel_data() {
        let raw = r#"{"type":"channel_data","connection_id":"c1","message_id":4,"channel":"v4_orderbook","id":"BTC-USD","version":"1.0.0","contents":{"asks":[["50000","1"]]}}"#;
        let deltas = deltas(raw);

        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].instrument_key, "BTC-USD");
        assert_eq!(deltas[0].session, 3);
        assert_eq!(deltas[0].contents.bids, None);
        assert_eq!(
            deltas[0].contents.asks,
            Some(vec![PriceLevel::new("50000", "1")])
        );
    }

    #[test]
    fn test_decodes_subscribed_snapshot_objects() {
        let raw = r#"{"type":"subscribed","channel":"v4_orderbook","id":"ETH-USD","contents":{"bids":[{"price":"3000.1","size":"2"}],"asks":[{"price":"3000.5","size":"0.5"}]}}"#;
        let deltas = deltas(raw);

        assert_eq!(deltas.len(), 1);
        assert_eq!(
            deltas[0].contents.bids,
            Some(vec![PriceLevel::new("3000.1", "2")])
        );
        assert_eq!(
            deltas[0].contents.asks,
            Some(vec![PriceLevel::new("3000.5", "0.5")])
        );
    }

    #[test]
    fn test_batch_is_split_in_order() {
        let raw = r#"{"type":"channel_batch_data","channel":"v4_orderbook","id":"BTC-USD","contents":[{"bids":[["1","1"]]},{"bids":[["2","1"]]}]}"#;
        let deltas = deltas(raw);

        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].contents.bids.as_ref().unwrap()[0].price, "1");
        assert_eq!(deltas[1].contents.bids.as_ref().unwrap()[0].price, "2");
    }

    #[test]
    fn test_non_book_frames() {
        assert!(matches!(
            decode(r#"{"type":"connected","connection_id":"abc","message_id":0}"#, 1).unwrap(),
            Decoded::Control(_)
        ));
        assert!(matches!(
            decode(r#"{"type":"unsubscribed","channel":"v4_orderbook","id":"BTC-USD"}"#, 1)
                .unwrap(),
            Decoded::Ignored(_)
        ));
        assert!(matches!(
            decode(r#"{"type":"subscribed","channel":"v4_markets","contents":{}}"#, 1).unwrap(),
            Decoded::Ignored(_)
        ));
        assert!(matches!(
            decode("not json", 1),
            Err(FeedError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_dispatch_publishes_on_orderbook_topic() {
        let bus = Arc::new(InProcessBus::new());
        let (handler, mut rx) = ForwardingHandler::channel();
        let _registration = bus.subscribe(Topic::OrderBook, handler);
        let dispatcher = Dispatcher::new(bus.clone());

        dispatcher.dispatch("garbage", 1);
        dispatcher.dispatch(
            r#"{"type":"channel_data","channel":"v4_orderbook","id":"BTC-USD","contents":{"bids":[["100","1"]]}}"#,
            1,
        );

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            BusEvent::OrderBook(delta) => assert_eq!(delta.instrument_key, "BTC-USD"),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
