//! End-to-end replica scenario over an in-memory venue connection

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use depth_core::{
    ConnectionStatus, EventBus, FeedError, FeedResult, InProcessBus, InstrumentCatalog,
    PriceLevel,
};
use depth_dydx::{MemoryConnector, MemoryRemote, StreamConfig, StreamConnection};
use depth_services::{FeedSettings, InstrumentResolver, MarketFeed, ReplicaConfig, ReplicaStore};

struct StaticCatalog(Vec<String>);

#[async_trait]
impl InstrumentCatalog for StaticCatalog {
    async fn venue_symbols(&self) -> FeedResult<Vec<String>> {
        Ok(self.0.clone())
    }
}

async fn wait_until(check: impl Fn() -> bool) {
    for _ in 0..1000 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

async fn next_frame(remote: &mut MemoryRemote) -> serde_json::Value {
    let frame = tokio::time::timeout(Duration::from_secs(10), remote.outbound.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("transport closed");
    serde_json::from_str(&frame).unwrap()
}

#[tokio::test(start_paused = true)]
async fn replica_follows_stream_lifecycle() {
    let bus: Arc<dyn EventBus> = Arc::new(InProcessBus::new());
    let connector = Arc::new(MemoryConnector::new());
    let mut remote = connector.push_session();

    let stream = Arc::new(StreamConnection::spawn(
        StreamConfig {
            url: "memory://venue".to_string(),
            ..StreamConfig::default()
        },
        connector.clone(),
        bus.clone(),
    ));

    let resolver = Arc::new(InstrumentResolver::default());
    let store = Arc::new(ReplicaStore::new(ReplicaConfig::default(), resolver.clone()));
    let feed = Arc::new(MarketFeed::new(
        FeedSettings::default(),
        resolver,
        store.clone(),
        Arc::new(StaticCatalog(vec![
            "BTC-USD".to_string(),
            "ETH-USD".to_string(),
        ])),
        stream.clone(),
    ));
    let _registrations = feed.register(bus.as_ref());

    feed.start();

    // MANA/USDT is configured but not listed, so only BTC is subscribed
    assert_eq!(
        next_frame(&mut remote).await,
        serde_json::json!({"type": "subscribe", "channel": "v4_orderbook", "id": "BTC-USD"})
    );
    assert_eq!(stream.status(), ConnectionStatus::Connected);

    remote.send(
        r#"{"type":"channel_data","channel":"v4_orderbook","id":"BTC-USD","contents":{"asks":[["50000","1"]]}}"#,
    );
    wait_until(|| store.snapshot("BTC/USDT", 10).is_ok()).await;

    let snapshot = store.snapshot("BTC/USDT", 10).unwrap();
    assert_eq!(snapshot.instrument, "BTC/USDT");
    assert_eq!(snapshot.asks, vec![PriceLevel::new("50000", "1")]);
    assert!(snapshot.bids.is_empty());
    assert_eq!(snapshot.checksum, 512533699);

    remote.fail("connection reset by peer");
    wait_until(|| store.snapshot("BTC/USDT", 10).is_err()).await;

    assert_eq!(
        store.snapshot("BTC/USDT", 10).unwrap_err(),
        FeedError::not_found("BTC/USDT")
    );
    assert_ne!(stream.status(), ConnectionStatus::Connected);

    stream.shutdown().await;
    assert_eq!(stream.status(), ConnectionStatus::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn replica_rebuilds_after_reconnect() {
    let bus: Arc<dyn EventBus> = Arc::new(InProcessBus::new());
    let connector = Arc::new(MemoryConnector::new());
    let first = connector.push_session();
    let mut second = connector.push_session();

    let stream = Arc::new(StreamConnection::spawn(
        StreamConfig::default(),
        connector.clone(),
        bus.clone(),
    ));
    let resolver = Arc::new(InstrumentResolver::default());
    let store = Arc::new(ReplicaStore::new(ReplicaConfig::default(), resolver.clone()));
    let feed = Arc::new(MarketFeed::new(
        FeedSettings::default(),
        resolver,
        store.clone(),
        Arc::new(StaticCatalog(vec![
            "BTC-USD".to_string(),
            "MANA-USD".to_string(),
        ])),
        stream.clone(),
    ));
    let _registrations = feed.register(bus.as_ref());
    feed.start();

    first.send(
        r#"{"type":"channel_data","channel":"v4_orderbook","id":"MANA-USD","contents":{"bids":[["0.44","100"]]}}"#,
    );
    wait_until(|| store.snapshot("MANA/USDT", 10).is_ok()).await;
    first.close();

    // Both instruments are subscribed again on the new session
    let mut topics = vec![
        next_frame(&mut second).await["id"].as_str().unwrap().to_string(),
        next_frame(&mut second).await["id"].as_str().unwrap().to_string(),
    ];
    topics.sort();
    assert_eq!(topics, vec!["BTC-USD", "MANA-USD"]);
    assert!(store.snapshot("MANA/USDT", 10).is_err());
    assert_eq!(stream.health().session, 2);

    second.send(
        r#"{"type":"channel_data","channel":"v4_orderbook","id":"MANA-USD","contents":{"bids":[["0.43","50"]]}}"#,
    );
    wait_until(|| store.snapshot("MANA/USDT", 10).is_ok()).await;
    assert_eq!(
        store.snapshot("MANA/USDT", 10).unwrap().bids,
        vec![PriceLevel::new("0.43", "50")]
    );

    stream.shutdown().await;
}
