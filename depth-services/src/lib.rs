//! Replica services for the market depth replica
//!
//! This crate maps configured instruments onto venue symbols, keeps the
//! replicated order books, computes their checksums, and wires the stream
//! lifecycle to both.

pub mod checksum;
pub mod feed;
pub mod replica;
pub mod resolver;

pub use checksum::{checksum, CHECKSUM_DEPTH};
pub use feed::{FeedSettings, MarketFeed, DEFAULT_ORDERBOOK_CHANNEL};
pub use replica::{
    ApplyOutcome, BookSummary, MergeMode, OrderBookReplica, ReplicaConfig, ReplicaStore, MAX_DEPTH,
};
pub use resolver::{InstrumentResolver, MappingSet, SymbolConvention};
