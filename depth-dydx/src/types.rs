//! dYdX v4 indexer wire types
//!
//! Covers the WebSocket frames the replica cares about and the REST
//! responses used by the instrument catalog.

use std::collections::HashMap;

use depth_core::{BookContents, PriceLevel, Subscription};
use serde::{Deserialize, Serialize};

/// Order book channel name
pub const ORDERBOOK_CHANNEL: &str = "v4_orderbook";

/// Markets channel name, subscribed as a liveness check
pub const MARKETS_CHANNEL: &str = "v4_markets";

// ============================================================================
// Network Endpoints
// ============================================================================

/// dYdX deployment to connect to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
}

impl Network {
    pub fn from_testnet_flag(is_testnet: bool) -> Self {
        if is_testnet {
            Network::Testnet
        } else {
            Network::Mainnet
        }
    }

    /// Indexer WebSocket endpoint
    pub fn ws_url(&self) -> &'static str {
        match self {
            Network::Mainnet => "wss://indexer.dydx.trade/v4/ws",
            Network::Testnet => "wss://indexer.v4testnet.dydx.exchange/v4/ws",
        }
    }

    /// Indexer REST endpoint
    pub fn indexer_url(&self) -> &'static str {
        match self {
            Network::Mainnet => "https://indexer.dydx.trade/v4",
            Network::Testnet => "https://indexer.v4testnet.dydx.exchange/v4",
        }
    }
}

// ============================================================================
// Outbound Frames
// ============================================================================

/// Subscribe/unsubscribe request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionRequest<'a> {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub channel: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<&'a str>,
}

impl<'a> SubscriptionRequest<'a> {
    pub fn subscribe(subscription: &'a Subscription) -> Self {
        Self {
            msg_type: "subscribe",
            channel: &subscription.channel,
            id: subscription.topic.as_deref(),
        }
    }

    pub fn unsubscribe(subscription: &'a Subscription) -> Self {
        Self {
            msg_type: "unsubscribe",
            channel: &subscription.channel,
            id: subscription.topic.as_deref(),
        }
    }
}

// ============================================================================
// Inbound Frames
// ============================================================================

/// Channel frame, discriminated by `channel`
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "channel")]
pub enum ChannelMessage {
    #[serde(rename = "v4_orderbook")]
    OrderBook(OrderBookMessage),
    #[serde(rename = "v4_markets")]
    Markets {
        #[serde(default)]
        contents: Option<serde_json::Value>,
    },
    #[serde(other)]
    Unknown,
}

/// Order book frame (`subscribed`, `channel_data` or `channel_batch_data`)
#[derive(Debug, Clone, Deserialize)]
pub struct OrderBookMessage {
    #[serde(rename = "type", default)]
    pub msg_type: Option<String>,
    pub id: String,
    #[serde(default)]
    pub contents: Option<OrderBookContents>,
}

/// Batch frames carry an array of updates, everything else a single one
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OrderBookContents {
    Batch(Vec<BookUpdate>),
    Single(BookUpdate),
}

impl OrderBookContents {
    pub fn into_updates(self) -> Vec<BookUpdate> {
        match self {
            OrderBookContents::Batch(updates) => updates,
            OrderBookContents::Single(update) => vec![update],
        }
    }
}

/// One order book update
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookUpdate {
    #[serde(default)]
    pub bids: Option<Vec<WireLevel>>,
    #[serde(default)]
    pub asks: Option<Vec<WireLevel>>,
}

impl BookUpdate {
    pub fn into_contents(self) -> BookContents {
        BookContents {
            bids: self.bids.map(into_levels),
            asks: self.asks.map(into_levels),
        }
    }
}

fn into_levels(levels: Vec<WireLevel>) -> Vec<PriceLevel> {
    levels.into_iter().map(PriceLevel::from).collect()
}

/// Price level as sent by the indexer
///
/// Updates use `[price, size]` pairs, the initial snapshot uses objects.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum WireLevel {
    Pair(String, String),
    Object { price: String, size: String },
}

impl From<WireLevel> for PriceLevel {
    fn from(level: WireLevel) -> Self {
        match level {
            WireLevel::Pair(price, qty) => PriceLevel::new(price, qty),
            WireLevel::Object { price, size } => PriceLevel::new(price, size),
        }
    }
}

/// Control frame without a channel (`connected`, `error`, ...)
#[derive(Debug, Clone, Deserialize)]
pub struct ControlMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub connection_id: Option<String>,
}

// ============================================================================
// REST Responses
// ============================================================================

/// `GET /perpetualMarkets` response
#[derive(Debug, Clone, Deserialize)]
pub struct PerpetualMarketsResponse {
    pub markets: HashMap<String, PerpetualMarket>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerpetualMarket {
    pub ticker: Option<String>,
    pub status: Option<String>,
}
