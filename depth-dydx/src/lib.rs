//! dYdX v4 integration for the market depth replica
//!
//! Provides the indexer WebSocket connection (heartbeat, reconnect and
//! subscription forwarding), the frame dispatcher that publishes order book
//! updates on the event bus, and the REST client used as instrument catalog.

pub mod client;
pub mod dispatcher;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod types;
pub mod websocket;

pub use client::IndexerClient;
pub use dispatcher::Dispatcher;
#[cfg(any(test, feature = "test-util"))]
pub use memory::{MemoryConnector, MemoryRemote};
pub use types::{Network, MARKETS_CHANNEL, ORDERBOOK_CHANNEL};
pub use websocket::{
    Connector, FrameSink, FrameStream, ReconnectBackoff, StreamConfig, StreamConnection,
    StreamHandle, WsConnector,
};
