//! Market Depth Replica API Server
//!
//! Replicates dYdX order books in memory and serves checksummed snapshots
//! over HTTP.

mod config;
mod routes;

use axum::http::{header, Method};
use std::net::SocketAddr;
use std::sync::Arc;

use depth_core::{EventBus, InProcessBus, RedisBus};
use depth_dydx::{IndexerClient, StreamConnection, StreamHandle, WsConnector};
use depth_services::{InstrumentResolver, MarketFeed, ReplicaStore};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::AppConfig;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ReplicaStore>,
    pub stream: StreamHandle,
    pub feed: Arc<MarketFeed>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env.local file
    if let Err(e) = dotenvy::from_filename(".env.local") {
        // Not an error if the file doesn't exist
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env.local: {}", e);
        }
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,depth_api=debug")),
        )
        .init();

    info!("Starting Market Depth Replica API");

    let config = AppConfig::from_env()?;
    info!(
        "Using dYdX {:?} ({}), tracking {}",
        config.network,
        config.stream.url,
        config.feed.instruments.join(", ")
    );

    let bus: Arc<dyn EventBus> = match &config.redis_url {
        Some(url) => Arc::new(RedisBus::connect(url).await?),
        None => Arc::new(InProcessBus::new()),
    };

    // Stream connection stays idle until the feed asks it to connect
    let connector = Arc::new(WsConnector::new(config.stream.url.clone()));
    let stream = StreamConnection::spawn(config.stream.clone(), connector, bus.clone());

    let catalog = Arc::new(IndexerClient::new(config.indexer_url.clone())?);
    let resolver = Arc::new(InstrumentResolver::default());
    let store = Arc::new(ReplicaStore::new(config.replica.clone(), resolver.clone()));

    let feed = Arc::new(MarketFeed::new(
        config.feed.clone(),
        resolver,
        store.clone(),
        catalog,
        Arc::new(stream.clone()),
    ));
    let _registrations = feed.register(bus.as_ref());
    feed.start();

    let state = AppState {
        store,
        stream: stream.clone(),
        feed,
    };

    // Configure CORS for frontend
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    let app = routes::app(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Closing dYdX stream");
    stream.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received");
}
