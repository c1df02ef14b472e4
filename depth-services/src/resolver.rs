//! Instrument mapping resolver
//!
//! Translates between canonical instrument names (`BTC/USDT`) and venue
//! symbols (`BTC-USD`). The mapping set is rebuilt from the venue catalog on
//! every connect and swapped in as a whole.

use std::collections::HashMap;
use std::sync::Arc;

use depth_core::InstrumentMapping;
use parking_lot::RwLock;
use tracing::{debug, warn};

/// Naming conventions on both sides of the mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolConvention {
    pub canonical_separator: char,
    pub canonical_quote: String,
    pub venue_separator: char,
    pub venue_quote: String,
}

impl Default for SymbolConvention {
    fn default() -> Self {
        Self {
            canonical_separator: '/',
            canonical_quote: "USDT".to_string(),
            venue_separator: '-',
            venue_quote: "USD".to_string(),
        }
    }
}

impl SymbolConvention {
    /// `BTC-USD` -> `BTC/USDT`
    pub fn to_canonical(&self, venue_symbol: &str) -> Option<String> {
        let (base, quote) = venue_symbol.split_once(self.venue_separator)?;
        if base.is_empty() || quote != self.venue_quote {
            return None;
        }
        Some(format!(
            "{}{}{}",
            base, self.canonical_separator, self.canonical_quote
        ))
    }

    /// `BTC/USDT` -> `BTC-USD`
    pub fn to_venue(&self, canonical: &str) -> Option<String> {
        let (base, quote) = canonical.split_once(self.canonical_separator)?;
        if base.is_empty() || quote != self.canonical_quote {
            return None;
        }
        Some(format!("{}{}{}", base, self.venue_separator, self.venue_quote))
    }
}

/// Bidirectional mapping between configured instruments and venue symbols
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingSet {
    by_canonical: HashMap<String, String>,
    by_venue: HashMap<String, String>,
}

impl MappingSet {
    /// Match configured instruments against the venue catalog
    ///
    /// Instruments the venue does not list are left out with a warning.
    pub fn build(
        catalog: &[String],
        configured: &[String],
        convention: &SymbolConvention,
    ) -> Self {
        let listed: HashMap<String, &String> = catalog
            .iter()
            .filter_map(|symbol| convention.to_canonical(symbol).map(|c| (c, symbol)))
            .collect();

        let mut set = MappingSet::default();
        for instrument in configured {
            match listed.get(instrument) {
                Some(venue_symbol) => {
                    set.by_canonical
                        .insert(instrument.clone(), (*venue_symbol).clone());
                    set.by_venue
                        .insert((*venue_symbol).clone(), instrument.clone());
                }
                None => {
                    warn!("[Resolver] Instrument {} is not listed on the venue", instrument);
                }
            }
        }
        set
    }

    pub fn venue_for(&self, canonical: &str) -> Option<&str> {
        self.by_canonical.get(canonical).map(String::as_str)
    }

    pub fn canonical_for(&self, venue_symbol: &str) -> Option<&str> {
        self.by_venue.get(venue_symbol).map(String::as_str)
    }

    /// All mappings, sorted by canonical name
    pub fn mappings(&self) -> Vec<InstrumentMapping> {
        let mut mappings: Vec<InstrumentMapping> = self
            .by_canonical
            .iter()
            .map(|(canonical, venue)| InstrumentMapping::new(canonical, venue))
            .collect();
        mappings.sort_by(|a, b| a.canonical.cmp(&b.canonical));
        mappings
    }

    pub fn len(&self) -> usize {
        self.by_canonical.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_canonical.is_empty()
    }
}

/// Holds the current mapping set
#[derive(Debug, Default)]
pub struct InstrumentResolver {
    convention: SymbolConvention,
    current: RwLock<Arc<MappingSet>>,
}

impl InstrumentResolver {
    pub fn new(convention: SymbolConvention) -> Self {
        Self {
            convention,
            current: RwLock::new(Arc::new(MappingSet::default())),
        }
    }

    /// Rebuild from a fresh catalog listing and swap it in
    pub fn rebuild(&self, catalog: &[String], configured: &[String]) -> Arc<MappingSet> {
        let set = Arc::new(MappingSet::build(catalog, configured, &self.convention));
        debug!(
            "[Resolver] Mapped {} of {} configured instruments",
            set.len(),
            configured.len()
        );
        *self.current.write() = set.clone();
        set
    }

    /// Current mapping set
    pub fn current(&self) -> Arc<MappingSet> {
        self.current.read().clone()
    }

    pub fn canonical_for(&self, venue_symbol: &str) -> Option<String> {
        self.current.read().canonical_for(venue_symbol).map(str::to_string)
    }

    pub fn venue_for(&self, canonical: &str) -> Option<String> {
        self.current.read().venue_for(canonical).map(str::to_string)
    }

    pub fn mappings(&self) -> Vec<InstrumentMapping> {
        self.current.read().mappings()
    }
}
