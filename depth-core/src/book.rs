//! Order book primitives shared by the store and the query surface

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Price Levels
// ============================================================================

/// A single price level in the order book
///
/// Price and quantity are kept as the venue's decimal strings so the
/// checksum can be computed over exactly what was received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Price as a decimal string
    pub price: String,
    /// Quantity at this level as a decimal string
    pub qty: String,
}

impl PriceLevel {
    /// Create a new price level
    pub fn new(price: impl Into<String>, qty: impl Into<String>) -> Self {
        Self {
            price: price.into(),
            qty: qty.into(),
        }
    }
}

/// Side of the book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Buy side, best (highest) price first
    Bid,
    /// Sell side, best (lowest) price first
    Ask,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Bid => write!(f, "bids"),
            Side::Ask => write!(f, "asks"),
        }
    }
}

// ============================================================================
// Snapshots
// ============================================================================

/// Point-in-time view of a replicated order book
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    /// Canonical instrument identifier
    pub instrument: String,
    /// Bids (sorted by price descending - best bid first)
    pub bids: Vec<PriceLevel>,
    /// Asks (sorted by price ascending - best ask first)
    pub asks: Vec<PriceLevel>,
    /// CRC-32 over the top levels of the untruncated book
    pub checksum: u32,
    /// Time the snapshot was taken
    pub ts: DateTime<Utc>,
}
