//! Connection status and subscription types
//!
//! The stream connection owns its state exclusively. Everything else sees it
//! through these read-only views and through lifecycle events on the bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection state for the upstream stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Not connected and no attempt pending
    Disconnected,
    /// Attempting to connect
    Connecting,
    /// Connected and receiving data
    Connected,
    /// Connection lost, reconnect scheduled
    Reconnecting,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
        };
        write!(f, "{}", label)
    }
}

/// Health report for the stream connection
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionHealth {
    pub status: ConnectionStatus,
    pub last_message_time: Option<DateTime<Utc>>,
    pub message_count: u64,
    pub reconnect_attempts: u32,
    pub session: u64,
}

/// A channel subscription on the upstream stream
///
/// `topic` is the venue symbol the channel is scoped to. Channel-wide
/// subscriptions (such as the markets channel used as a liveness check)
/// have no topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subscription {
    pub channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

impl Subscription {
    /// Subscription to a channel for a single venue symbol
    pub fn new(channel: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            topic: Some(topic.into()),
        }
    }

    /// Subscription to a whole channel
    pub fn channel(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            topic: None,
        }
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.topic {
            Some(topic) => write!(f, "{}:{}", self.channel, topic),
            None => write!(f, "{}", self.channel),
        }
    }
}

/// Control surface of the stream connection used by consumers
///
/// Requests are fire-and-forget: failures are logged by the connection and
/// never raised to the caller.
pub trait FeedControl: Send + Sync {
    /// Ask the stream to connect; no-op if already connecting or connected
    fn connect(&self);

    /// Forward a subscription on the live transport
    fn subscribe(&self, subscription: Subscription);

    /// Forward an unsubscription on the live transport
    fn unsubscribe(&self, subscription: Subscription);
}
