//! Server configuration from the environment

use std::str::FromStr;
use std::time::Duration;

use depth_core::{FeedError, FeedResult};
use depth_dydx::{Network, ReconnectBackoff, StreamConfig, ORDERBOOK_CHANNEL};
use depth_services::{FeedSettings, MergeMode, ReplicaConfig, MAX_DEPTH};
use url::Url;

const DEFAULT_INSTRUMENTS: &str = "MANA/USDT,BTC/USDT";
const DEFAULT_PORT: u16 = 3000;

/// Everything the server needs to start
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub network: Network,
    pub indexer_url: String,
    pub stream: StreamConfig,
    pub replica: ReplicaConfig,
    /// Broker used as the event bus; in-process when unset
    pub redis_url: Option<String>,
    pub feed: FeedSettings,
    pub server_port: u16,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> FeedResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> FeedResult<Self> {
        let network = Network::from_testnet_flag(parse_bool(&get, "IS_TESTNET")?);

        let mut stream = StreamConfig::for_network(network);
        stream.url = validated_url(&get, "DYDX_WS_URL", &stream.url)?;
        let indexer_url = validated_url(&get, "DYDX_INDEXER_URL", network.indexer_url())?;

        let instruments: Vec<String> = get("INSTRUMENTS")
            .unwrap_or_else(|| DEFAULT_INSTRUMENTS.to_string())
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if instruments.is_empty() {
            return Err(FeedError::config("INSTRUMENTS must name at least one instrument"));
        }

        let max_depth: usize = parse_or(&get, "ORDERBOOK_MAX_DEPTH", MAX_DEPTH)?;
        if max_depth == 0 {
            return Err(FeedError::config("ORDERBOOK_MAX_DEPTH must be positive"));
        }
        let merge_mode = match get("ORDERBOOK_MERGE_MODE") {
            Some(mode) => MergeMode::from_str(&mode)?,
            None => MergeMode::default(),
        };

        stream.reconnect_interval =
            millis(&get, "RECONNECT_INTERVAL_MS", stream.reconnect_interval)?;
        stream.backoff = match get("RECONNECT_BACKOFF").as_deref().map(str::trim) {
            None | Some("fixed") => ReconnectBackoff::Fixed,
            Some("exponential") => match get("RECONNECT_MAX_DELAY_MS") {
                None => ReconnectBackoff::exponential(),
                Some(_) => ReconnectBackoff::Exponential {
                    max_delay: millis(&get, "RECONNECT_MAX_DELAY_MS", Duration::ZERO)?,
                },
            },
            Some(other) => {
                return Err(FeedError::config(format!(
                    "unknown RECONNECT_BACKOFF: {}",
                    other
                )))
            }
        };

        stream.heartbeat_interval =
            millis(&get, "HEARTBEAT_INTERVAL_MS", stream.heartbeat_interval)?;
        stream.ping_timeout = millis(&get, "PING_TIMEOUT_MS", stream.ping_timeout)?;
        if stream.heartbeat_interval.is_zero() || stream.ping_timeout.is_zero() {
            return Err(FeedError::config(
                "HEARTBEAT_INTERVAL_MS and PING_TIMEOUT_MS must be positive",
            ));
        }

        let redis_url = match get("REDIS_URL").filter(|url| !url.trim().is_empty()) {
            Some(_) => Some(validated_url(&get, "REDIS_URL", "")?),
            None => None,
        };

        Ok(Self {
            network,
            indexer_url,
            stream,
            redis_url,
            replica: ReplicaConfig {
                max_depth,
                merge_mode,
                ..ReplicaConfig::default()
            },
            feed: FeedSettings {
                instruments,
                orderbook_channel: ORDERBOOK_CHANNEL.to_string(),
            },
            server_port: parse_or(&get, "SERVER_PORT", DEFAULT_PORT)?,
        })
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> FeedResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| FeedError::config(format!("Invalid value for {}: {} ({})", key, raw, e))),
        None => Ok(default),
    }
}

fn millis(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> FeedResult<Duration> {
    parse_or(get, key, default.as_millis() as u64).map(Duration::from_millis)
}

fn parse_bool(get: &impl Fn(&str) -> Option<String>, key: &str) -> FeedResult<bool> {
    match get(key).as_deref().map(str::trim) {
        None | Some("") => Ok(false),
        Some("true") | Some("1") => Ok(true),
        Some("false") | Some("0") => Ok(false),
        Some(other) => Err(FeedError::config(format!(
            "Invalid value for {}: {}",
            key, other
        ))),
    }
}

fn validated_url(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: &str,
) -> FeedResult<String> {
    let raw = get(key).unwrap_or_else(|| default.to_string());
    Url::parse(&raw)
        .map_err(|e| FeedError::config(format!("Invalid URL for {}: {} ({})", key, raw, e)))?;
    Ok(raw)
}
