//! Error types for the replica

use thiserror::Error;

/// Replica-wide error type
///
/// Only `NotFound` is meant to reach query callers. Everything else is
/// raised on the ingestion path and is logged and contained there.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("No mapping found for instrument: {0}")]
    UnmappedInstrument(String),

    #[error("Orderbook for instrument: {0} was not found")]
    NotFound(String),

    #[error("Cannot subscribe to {0}: stream not connected")]
    SubscriptionFailure(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl FeedError {
    pub fn transport(msg: impl Into<String>) -> Self {
        FeedError::Transport(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        FeedError::Parse(msg.into())
    }

    pub fn unmapped(instrument: impl Into<String>) -> Self {
        FeedError::UnmappedInstrument(instrument.into())
    }

    pub fn not_found(instrument: impl Into<String>) -> Self {
        FeedError::NotFound(instrument.into())
    }

    pub fn subscription(target: impl Into<String>) -> Self {
        FeedError::SubscriptionFailure(target.into())
    }

    pub fn catalog(msg: impl Into<String>) -> Self {
        FeedError::Catalog(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        FeedError::Config(msg.into())
    }
}

/// Result type alias for replica operations
pub type FeedResult<T> = Result<T, FeedError>;
