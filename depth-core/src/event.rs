//! Events carried on the bus
//!
//! Payloads are plain serde types so the same events can be relayed through
//! an external broker.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::PriceLevel;

/// Bus topics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    /// Connection lifecycle (`connected` / `disconnected`)
    #[serde(rename = "websocket")]
    Connection,
    /// Order book deltas
    OrderBook,
}

impl Topic {
    pub const ALL: [Topic; 2] = [Topic::Connection, Topic::OrderBook];

    /// Topic name on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Connection => "websocket",
            Topic::OrderBook => "orderbook",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Connection lifecycle event
///
/// `session` is the connection epoch: it increases by one on every
/// successful connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Connected { session: u64 },
    Disconnected { session: u64 },
}

impl LifecycleEvent {
    pub fn session(&self) -> u64 {
        match self {
            LifecycleEvent::Connected { session } | LifecycleEvent::Disconnected { session } => {
                *session
            }
        }
    }
}

/// Sides present in a single book update
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookContents {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bids: Option<Vec<PriceLevel>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asks: Option<Vec<PriceLevel>>,
}

/// Order book delta for one venue instrument
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookDelta {
    /// Venue symbol the update was received for
    pub instrument_key: String,
    /// Connection session the update arrived on
    pub session: u64,
    pub contents: BookContents,
}

/// Any event published on the bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "topic", content = "payload")]
pub enum BusEvent {
    #[serde(rename = "websocket")]
    Connection(LifecycleEvent),
    #[serde(rename = "orderbook")]
    OrderBook(OrderBookDelta),
}

impl BusEvent {
    /// Topic this event is published on
    pub fn topic(&self) -> Topic {
        match self {
            BusEvent::Connection(_) => Topic::Connection,
            BusEvent::OrderBook(_) => Topic::OrderBook,
        }
    }
}

impl From<LifecycleEvent> for BusEvent {
    fn from(event: LifecycleEvent) -> Self {
        BusEvent::Connection(event)
    }
}

impl From<OrderBookDelta> for BusEvent {
    fn from(delta: OrderBookDelta) -> Self {
        BusEvent::OrderBook(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_event_wire_format() {
        let event = BusEvent::Connection(LifecycleEvent::Connected { session: 3 });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"topic": "websocket", "payload": {"event": "connected", "session": 3}})
        );
        assert_eq!(serde_json::from_value::<BusEvent>(json).unwrap(), event);
    }

    #[test]
    fn test_delta_round_trip_keeps_absent_sides() {
        let event = BusEvent::OrderBook(OrderBookDelta {
            instrument_key: "MANA-USD".to_string(),
            session: 1,
            contents: BookContents {
                bids: None,
                asks: Some(vec![PriceLevel::new("0.44", "100")]),
            },
        });

        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("bids"));
        assert_eq!(serde_json::from_str::<BusEvent>(&json).unwrap(), event);
        assert_eq!(event.topic(), Topic::OrderBook);
    }
}
