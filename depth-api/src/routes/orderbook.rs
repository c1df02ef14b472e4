//! Order book snapshot endpoint

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use depth_core::FeedError;
use serde::Deserialize;
use tracing::{debug, error};

use super::ErrorResponse;
use crate::AppState;

/// Levels per side returned when no limit is given
const DEFAULT_LIMIT: usize = 10;

/// Query parameters for an order book snapshot
#[derive(Debug, Deserialize)]
pub struct OrderBookQuery {
    /// Canonical instrument, e.g. `BTC/USDT`
    pub instrument: String,
    /// Levels per side
    pub limit: Option<usize>,
}

/// Create order book routes
pub fn routes() -> Router<AppState> {
    Router::new().route("/orderbook", get(get_orderbook))
}

/// Get the replicated order book for an instrument
async fn get_orderbook(
    State(state): State<AppState>,
    Query(params): Query<OrderBookQuery>,
) -> impl IntoResponse {
    let max_depth = state.store.config().max_depth;
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);

    if limit == 0 || limit > max_depth {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("limit must be between 1 and {}", max_depth),
            }),
        )
            .into_response();
    }

    debug!("Getting orderbook for {} (limit {})", params.instrument, limit);

    match state.store.snapshot(&params.instrument, limit) {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(e @ FeedError::NotFound(_)) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to read orderbook: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::routes::{app, test_support};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use depth_core::{BookContents, OrderBookDelta, PriceLevel};
    use depth_dydx::MemoryConnector;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn get(state: crate::AppState, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null))
    }

    fn seed(state: &crate::AppState) {
        let asks: Vec<PriceLevel> = (0..15)
            .map(|i| PriceLevel::new(format!("{}", 50000 + i), "1"))
            .collect();
        state
            .store
            .apply_delta(&OrderBookDelta {
                instrument_key: "BTC-USD".to_string(),
                session: 1,
                contents: BookContents {
                    bids: Some(vec![PriceLevel::new("49999", "2")]),
                    asks: Some(asks),
                },
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_snapshot_with_default_limit() {
        let state = test_support::state(Arc::new(MemoryConnector::new()));
        seed(&state);

        let (status, body) = get(state, "/v1/orderbook?instrument=BTC/USDT").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["instrument"], "BTC/USDT");
        assert_eq!(body["asks"].as_array().unwrap().len(), 10);
        assert_eq!(body["asks"][0]["price"], "50000");
        assert_eq!(body["bids"][0]["qty"], "2");
        assert!(body["checksum"].is_u64());
        assert!(body["ts"].is_string());
    }

    #[tokio::test]
    async fn test_snapshot_with_limit() {
        let state = test_support::state(Arc::new(MemoryConnector::new()));
        seed(&state);

        let (status, body) = get(state, "/v1/orderbook?instrument=BTC%2FUSDT&limit=3").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["asks"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_instrument_is_404() {
        let state = test_support::state(Arc::new(MemoryConnector::new()));

        let (status, body) = get(state, "/v1/orderbook?instrument=ETH/USDT").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(
            body["error"],
            "Orderbook for instrument: ETH/USDT was not found"
        );
    }

    #[tokio::test]
    async fn test_out_of_range_limit_is_400() {
        for uri in [
            "/v1/orderbook?instrument=BTC/USDT&limit=0",
            "/v1/orderbook?instrument=BTC/USDT&limit=51",
        ] {
            let state = test_support::state(Arc::new(MemoryConnector::new()));
            seed(&state);

            let (status, body) = get(state, uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["error"], "limit must be between 1 and 50");
        }
    }
}
