//! dYdX indexer REST client
//!
//! Lists the perpetual markets the venue currently offers. Used as the
//! instrument catalog when building symbol mappings.

use std::time::Duration;

use async_trait::async_trait;
use depth_core::{FeedError, FeedResult, InstrumentCatalog};
use reqwest::Client;
use tracing::{debug, instrument};

use crate::types::PerpetualMarketsResponse;

/// dYdX indexer API client
#[derive(Clone, Debug)]
pub struct IndexerClient {
    client: Client,
    base_url: String,
}

impl IndexerClient {
    /// Create a client for an indexer base URL (e.g. `https://indexer.dydx.trade/v4`)
    pub fn new(base_url: impl Into<String>) -> FeedResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| FeedError::catalog(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// List all perpetual markets keyed by ticker
    #[instrument(skip(self))]
    pub async fn perpetual_markets(&self) -> FeedResult<PerpetualMarketsResponse> {
        let url = format!("{}/perpetualMarkets", self.base_url);
        debug!("Fetching dYdX perpetual markets from: {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FeedError::catalog(format!("Failed to fetch markets: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(FeedError::catalog(format!(
                "dYdX indexer error ({}): {}",
                status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| FeedError::parse(format!("Failed to parse markets response: {}", e)))
    }
}

#[async_trait]
impl InstrumentCatalog for IndexerClient {
    async fn venue_symbols(&self) -> FeedResult<Vec<String>> {
        let response = self.perpetual_markets().await?;
        let mut symbols: Vec<String> = response.markets.into_keys().collect();
        symbols.sort();
        Ok(symbols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let client = IndexerClient::new("https://indexer.dydx.trade/v4/").unwrap();
        assert_eq!(client.base_url(), "https://indexer.dydx.trade/v4");
    }

    #[test]
    fn test_parses_perpetual_markets() {
        let body = r#"{"markets":{"BTC-USD":{"ticker":"BTC-USD","status":"ACTIVE","oraclePrice":"50000"},"MANA-USD":{"ticker":"MANA-USD","status":"ACTIVE"}}}"#;
        let response: PerpetualMarketsResponse = serde_json::from_str(body).unwrap();
        let mut keys: Vec<_> = response.markets.keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["BTC-USD", "MANA-USD"]);
        assert_eq!(response.markets["BTC-USD"].status.as_deref(), Some("ACTIVE"));
    }
}
