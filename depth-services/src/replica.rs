//! Order book replica store
//!
//! Keeps one replica per canonical instrument, built from the deltas that
//! arrive on the bus. Replicas are created on the first delta, capped at a
//! fixed depth per side, and dropped wholesale when the stream disconnects.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use depth_core::{
    BookContents, FeedError, FeedResult, OrderBookDelta, OrderBookSnapshot, PriceLevel, Side,
};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::checksum::{checksum, CHECKSUM_DEPTH};
use crate::resolver::InstrumentResolver;

/// Default maximum levels kept per side
pub const MAX_DEPTH: usize = 1000;

// ============================================================================
// Configuration
// ============================================================================

/// How incoming levels are merged into a side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// Replace the level at an equal price, remove it on zero quantity,
    /// insert new prices in sorted position
    #[default]
    ByPrice,
    /// Prepend every incoming level as received
    Prepend,
}

impl FromStr for MergeMode {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "by_price" => Ok(MergeMode::ByPrice),
            "prepend" => Ok(MergeMode::Prepend),
            other => Err(FeedError::config(format!("unknown merge mode: {}", other))),
        }
    }
}

/// Configuration for the replica store
#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    pub max_depth: usize,
    pub merge_mode: MergeMode,
    pub checksum_depth: usize,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            max_depth: MAX_DEPTH,
            merge_mode: MergeMode::ByPrice,
            checksum_depth: CHECKSUM_DEPTH,
        }
    }
}

// ============================================================================
// Replica
// ============================================================================

/// A level as stored: the venue strings plus the parsed price for ordering
#[derive(Debug, Clone)]
struct RestingLevel {
    price: Decimal,
    level: PriceLevel,
}

/// One side of a replica, best price first
#[derive(Debug)]
struct BookSide {
    side: Side,
    levels: Vec<RestingLevel>,
}

impl BookSide {
    fn new(side: Side) -> Self {
        Self {
            side,
            levels: Vec::new(),
        }
    }

    fn merge(&mut self, updates: &[PriceLevel], config: &ReplicaConfig) {
        for update in updates {
            let (Ok(price), Ok(qty)) = (
                Decimal::from_str(&update.price),
                Decimal::from_str(&update.qty),
            ) else {
                warn!(
                    "[ReplicaStore] Skipping invalid {} level {}@{}",
                    self.side, update.qty, update.price
                );
                continue;
            };

            let resting = RestingLevel {
                price,
                level: update.clone(),
            };

            match config.merge_mode {
                MergeMode::Prepend => self.levels.insert(0, resting),
                MergeMode::ByPrice => self.upsert(resting, qty.is_zero()),
            }
        }

        self.levels.truncate(config.max_depth);
    }

    fn upsert(&mut self, resting: RestingLevel, remove: bool) {
        let price = resting.price;
        let position = match self.side {
            Side::Bid => self.levels.binary_search_by(|l| price.cmp(&l.price)),
            Side::Ask => self.levels.binary_search_by(|l| l.price.cmp(&price)),
        };

        match (position, remove) {
            (Ok(i), true) => {
                self.levels.remove(i);
            }
            (Ok(i), false) => self.levels[i] = resting,
            (Err(_), true) => {}
            (Err(i), false) => self.levels.insert(i, resting),
        }
    }

    fn iter(&self) -> impl Iterator<Item = &PriceLevel> {
        self.levels.iter().map(|l| &l.level)
    }

    fn top(&self, limit: usize) -> Vec<PriceLevel> {
        self.iter().take(limit).cloned().collect()
    }

    fn len(&self) -> usize {
        self.levels.len()
    }
}

/// Replicated order book for one instrument
#[derive(Debug)]
pub struct OrderBookReplica {
    instrument: String,
    bids: BookSide,
    asks: BookSide,
    last_updated: DateTime<Utc>,
}

impl OrderBookReplica {
    fn new(instrument: &str) -> Self {
        Self {
            instrument: instrument.to_string(),
            bids: BookSide::new(Side::Bid),
            asks: BookSide::new(Side::Ask),
            last_updated: Utc::now(),
        }
    }

    fn apply(&mut self, contents: &BookContents, config: &ReplicaConfig) {
        if let Some(bids) = &contents.bids {
            self.bids.merge(bids, config);
        }
        if let Some(asks) = &contents.asks {
            self.asks.merge(asks, config);
        }
        self.last_updated = Utc::now();
    }

    fn snapshot(&self, limit: usize, checksum_depth: usize) -> OrderBookSnapshot {
        OrderBookSnapshot {
            instrument: self.instrument.clone(),
            bids: self.bids.top(limit),
            asks: self.asks.top(limit),
            checksum: checksum(self.asks.iter(), self.bids.iter(), checksum_depth),
            ts: Utc::now(),
        }
    }
}

// ============================================================================
// Store
// ============================================================================

/// Result of applying a delta
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Merged into the replica for this canonical instrument
    Applied { instrument: String },
    /// Arrived on a session that has since been cleared
    Stale,
}

/// Size and freshness of one replica
#[derive(Debug, Clone, Serialize)]
pub struct BookSummary {
    pub instrument: String,
    pub bid_levels: usize,
    pub ask_levels: usize,
    pub last_updated: DateTime<Utc>,
}

/// Replicas for all tracked instruments
pub struct ReplicaStore {
    config: ReplicaConfig,
    resolver: Arc<InstrumentResolver>,
    books: DashMap<String, Arc<RwLock<OrderBookReplica>>>,
    /// Deltas from this session or earlier are discarded
    stale_session: AtomicU64,
}

impl ReplicaStore {
    pub fn new(config: ReplicaConfig, resolver: Arc<InstrumentResolver>) -> Self {
        Self {
            config,
            resolver,
            books: DashMap::new(),
            stale_session: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ReplicaConfig {
        &self.config
    }

    fn is_stale(&self, session: u64) -> bool {
        session <= self.stale_session.load(Ordering::SeqCst)
    }

    /// Merge a delta into the replica of its instrument
    pub fn apply_delta(&self, delta: &OrderBookDelta) -> FeedResult<ApplyOutcome> {
        if self.is_stale(delta.session) {
            return Ok(ApplyOutcome::Stale);
        }

        let instrument = self
            .resolver
            .canonical_for(&delta.instrument_key)
            .ok_or_else(|| FeedError::unmapped(&delta.instrument_key))?;

        let book = {
            // Re-checked under the shard lock; clear() takes every shard lock
            let entry = self.books.entry(instrument.clone());
            if self.is_stale(delta.session) {
                return Ok(ApplyOutcome::Stale);
            }
            entry
                .or_insert_with(|| {
                    debug!("[ReplicaStore] Creating replica for {}", instrument);
                    Arc::new(RwLock::new(OrderBookReplica::new(&instrument)))
                })
                .clone()
        };

        book.write().apply(&delta.contents, &self.config);
        Ok(ApplyOutcome::Applied { instrument })
    }

    /// Snapshot of the top `limit` levels per side
    ///
    /// The checksum always covers the untruncated book.
    pub fn snapshot(&self, instrument: &str, limit: usize) -> FeedResult<OrderBookSnapshot> {
        let book = self
            .books
            .get(instrument)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| FeedError::not_found(instrument))?;

        let book = book.read();
        Ok(book.snapshot(limit, self.config.checksum_depth))
    }

    /// Drop every replica
    pub fn clear(&self) {
        let count = self.books.len();
        self.books.clear();
        debug!("[ReplicaStore] Cleared {} replicas", count);
    }

    /// Drop every replica and ignore further deltas from `session` or earlier
    pub fn invalidate_through(&self, session: u64) {
        self.stale_session.fetch_max(session, Ordering::SeqCst);
        self.clear();
    }

    /// Canonical instruments with a live replica, sorted
    pub fn instruments(&self) -> Vec<String> {
        let mut instruments: Vec<String> =
            self.books.iter().map(|entry| entry.key().clone()).collect();
        instruments.sort();
        instruments
    }

    /// Per-instrument depth and last update time, sorted by instrument
    pub fn summaries(&self) -> Vec<BookSummary> {
        let books: Vec<Arc<RwLock<OrderBookReplica>>> =
            self.books.iter().map(|entry| entry.value().clone()).collect();

        let mut summaries: Vec<BookSummary> = books
            .iter()
            .map(|book| {
                let book = book.read();
                BookSummary {
                    instrument: book.instrument.clone(),
                    bid_levels: book.bids.len(),
                    ask_levels: book.asks.len(),
                    last_updated: book.last_updated,
                }
            })
            .collect();
        summaries.sort_by(|a, b| a.instrument.cmp(&b.instrument));
        summaries
    }
}

impl std::fmt::Debug for ReplicaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaStore")
            .field("config", &self.config)
            .field("instruments", &self.instruments())
            .finish()
    }
}
