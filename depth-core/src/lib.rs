//! Core types for the Market Depth Replica
//!
//! This crate defines the shared data structures used across the replica,
//! including price levels, book events, connection state, the event bus
//! (in-process or over Redis) and the error taxonomy.

pub mod book;
pub mod broker;
pub mod bus;
pub mod connection;
pub mod error;
pub mod event;
pub mod instrument;

pub use book::{OrderBookSnapshot, PriceLevel, Side};
pub use broker::RedisBus;
pub use bus::{EventBus, EventHandler, ForwardingHandler, InProcessBus, Registration};
pub use connection::{ConnectionHealth, ConnectionStatus, FeedControl, Subscription};
pub use error::{FeedError, FeedResult};
pub use event::{BookContents, BusEvent, LifecycleEvent, OrderBookDelta, Topic};
pub use instrument::{InstrumentCatalog, InstrumentMapping};
