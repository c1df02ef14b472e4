//! Market feed
//!
//! Wires the stream lifecycle to the replica: on every connect the symbol
//! mappings are rebuilt from the venue catalog and the order book channel is
//! subscribed for each mapped instrument; on disconnect every replica is
//! dropped. Book deltas from the bus are merged into the store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use depth_core::{
    BusEvent, EventBus, EventHandler, FeedControl, FeedError, FeedResult, InstrumentCatalog,
    InstrumentMapping, LifecycleEvent, Registration, Subscription, Topic,
};
use tracing::{debug, info, warn};

use crate::replica::{ApplyOutcome, ReplicaStore};
use crate::resolver::InstrumentResolver;

/// Order book channel used when none is configured
pub const DEFAULT_ORDERBOOK_CHANNEL: &str = "v4_orderbook";

/// Settings for the market feed
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// Canonical instruments to replicate
    pub instruments: Vec<String>,
    /// Venue channel carrying order book updates
    pub orderbook_channel: String,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            instruments: vec!["MANA/USDT".to_string(), "BTC/USDT".to_string()],
            orderbook_channel: DEFAULT_ORDERBOOK_CHANNEL.to_string(),
        }
    }
}

/// Consumer of stream lifecycle and book events
pub struct MarketFeed {
    settings: FeedSettings,
    resolver: Arc<InstrumentResolver>,
    store: Arc<ReplicaStore>,
    catalog: Arc<dyn InstrumentCatalog>,
    control: Arc<dyn FeedControl>,
    registered: AtomicBool,
}

impl MarketFeed {
    pub fn new(
        settings: FeedSettings,
        resolver: Arc<InstrumentResolver>,
        store: Arc<ReplicaStore>,
        catalog: Arc<dyn InstrumentCatalog>,
        control: Arc<dyn FeedControl>,
    ) -> Self {
        Self {
            settings,
            resolver,
            store,
            catalog,
            control,
            registered: AtomicBool::new(false),
        }
    }

    /// Register the lifecycle and order book handlers on the bus
    ///
    /// Only the first call registers; later calls return nothing.
    pub fn register(self: &Arc<Self>, bus: &dyn EventBus) -> Vec<Registration> {
        if self.registered.swap(true, Ordering::SeqCst) {
            warn!("[MarketFeed] Handlers already registered");
            return Vec::new();
        }

        vec![
            bus.subscribe(
                Topic::Connection,
                Arc::new(LifecycleHandler { feed: self.clone() }),
            ),
            bus.subscribe(
                Topic::OrderBook,
                Arc::new(OrderBookHandler {
                    store: self.store.clone(),
                }),
            ),
        ]
    }

    /// Ask the stream to connect
    pub fn start(&self) {
        info!(
            "[MarketFeed] Starting feed for {} instruments",
            self.settings.instruments.len()
        );
        self.control.connect();
    }

    /// Rebuild mappings and subscribe every mapped instrument
    pub async fn on_connected(&self, session: u64) {
        let mappings = match self.catalog.venue_symbols().await {
            Ok(symbols) => self.resolver.rebuild(&symbols, &self.settings.instruments),
            Err(e) => {
                warn!(
                    "[MarketFeed] Catalog query failed, reusing previous mappings: {}",
                    e
                );
                self.resolver.current()
            }
        };

        if mappings.is_empty() {
            warn!("[MarketFeed] No configured instrument is listed on the venue");
            return;
        }

        for mapping in mappings.mappings() {
            info!(
                "[MarketFeed] Subscribing to {} as {} (session {})",
                mapping.canonical, mapping.venue_symbol, session
            );
            self.control.subscribe(Subscription::new(
                &self.settings.orderbook_channel,
                mapping.venue_symbol,
            ));
        }
    }

    /// Drop every replica built on `session` or earlier
    pub fn on_disconnected(&self, session: u64) {
        info!("[MarketFeed] Clearing all orderbook data due to stream disconnect");
        self.store.invalidate_through(session);
    }

    /// Instruments currently mapped to venue symbols
    pub fn tracked_instruments(&self) -> Vec<InstrumentMapping> {
        self.resolver.mappings()
    }
}

impl std::fmt::Debug for MarketFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketFeed")
            .field("settings", &self.settings)
            .field("registered", &self.registered.load(Ordering::SeqCst))
            .finish()
    }
}

struct LifecycleHandler {
    feed: Arc<MarketFeed>,
}

#[async_trait]
impl EventHandler for LifecycleHandler {
    async fn handle(&self, event: BusEvent) -> FeedResult<()> {
        match event {
            BusEvent::Connection(LifecycleEvent::Connected { session }) => {
                self.feed.on_connected(session).await;
            }
            BusEvent::Connection(LifecycleEvent::Disconnected { session }) => {
                self.feed.on_disconnected(session);
            }
            BusEvent::OrderBook(_) => {}
        }
        Ok(())
    }
}

struct OrderBookHandler {
    store: Arc<ReplicaStore>,
}

#[async_trait]
impl EventHandler for OrderBookHandler {
    async fn handle(&self, event: BusEvent) -> FeedResult<()> {
        let BusEvent::OrderBook(delta) = event else {
            return Ok(());
        };

        match self.store.apply_delta(&delta) {
            Ok(ApplyOutcome::Applied { .. }) => Ok(()),
            Ok(ApplyOutcome::Stale) => {
                debug!(
                    "[MarketFeed] Dropping delta for {} from cleared session {}",
                    delta.instrument_key, delta.session
                );
                Ok(())
            }
            Err(FeedError::UnmappedInstrument(key)) => {
                warn!("[MarketFeed] Received update for unmapped instrument {}", key);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
