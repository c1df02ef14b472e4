//! Instrument catalog and mapping types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::FeedResult;

/// Pairing of a canonical instrument with its venue symbol
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstrumentMapping {
    /// Service-wide identifier, e.g. `BTC/USDT`
    pub canonical: String,
    /// Identifier used on the venue, e.g. `BTC-USD`
    pub venue_symbol: String,
}

impl InstrumentMapping {
    pub fn new(canonical: impl Into<String>, venue_symbol: impl Into<String>) -> Self {
        Self {
            canonical: canonical.into(),
            venue_symbol: venue_symbol.into(),
        }
    }
}

/// Source of the symbols a venue currently lists
#[async_trait]
pub trait InstrumentCatalog: Send + Sync {
    /// Fetch all venue symbols currently listed
    async fn venue_symbols(&self) -> FeedResult<Vec<String>>;
}
