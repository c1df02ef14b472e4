//! API route definitions

mod health;
mod orderbook;

use axum::Router;

use crate::AppState;

/// Error response
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Create versioned API routes
pub fn api_routes() -> Router<AppState> {
    Router::new().merge(orderbook::routes())
}

/// Create health routes (unversioned)
pub fn health_routes() -> Router<AppState> {
    health::routes()
}

/// Full application router without middleware
pub fn app(state: AppState) -> Router {
    Router::new()
        .nest("/v1", api_routes())
        .merge(health_routes())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use async_trait::async_trait;
    use depth_core::{EventBus, FeedResult, InProcessBus, InstrumentCatalog};
    use depth_dydx::{MemoryConnector, StreamConfig, StreamConnection};
    use depth_services::{
        FeedSettings, InstrumentResolver, MarketFeed, ReplicaConfig, ReplicaStore,
    };

    use crate::AppState;

    struct StaticCatalog;

    #[async_trait]
    impl InstrumentCatalog for StaticCatalog {
        async fn venue_symbols(&self) -> FeedResult<Vec<String>> {
            Ok(vec!["BTC-USD".to_string()])
        }
    }

    /// State over an in-memory stream with BTC/USDT mapped
    pub fn state(connector: Arc<MemoryConnector>) -> AppState {
        let bus: Arc<dyn EventBus> = Arc::new(InProcessBus::new());
        let stream = StreamConnection::spawn(StreamConfig::default(), connector, bus);

        let resolver = Arc::new(InstrumentResolver::default());
        resolver.rebuild(&["BTC-USD".to_string()], &["BTC/USDT".to_string()]);
        let store = Arc::new(ReplicaStore::new(
            ReplicaConfig {
                max_depth: 50,
                ..ReplicaConfig::default()
            },
            resolver.clone(),
        ));
        let feed = Arc::new(MarketFeed::new(
            FeedSettings::default(),
            resolver,
            store.clone(),
            Arc::new(StaticCatalog),
            Arc::new(stream.clone()),
        ));

        AppState {
            store,
            stream,
            feed,
        }
    }
}
