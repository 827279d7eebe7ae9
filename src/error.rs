//! Error types for the ingestion and distribution pipeline.

use thiserror::Error;

/// Failures talking to the upstream rate provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network failure or timeout.
    #[error("provider unreachable: {0}")]
    Unreachable(String),

    /// The provider answered with a non-success status.
    #[error("provider returned status {0}")]
    Status(u16),

    /// A body was returned but could not be parsed.
    #[error("provider response malformed: {0}")]
    Malformed(String),
}

/// Failures that leave an ingestion call without a record.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The provider answered without any rates.
    #[error("no exchange rates received for {0}")]
    Empty(String),
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    #[error("invalid topic definition: {0}")]
    InvalidTopic(String),

    #[error("broker database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store write failed: {0}")]
    Write(String),

    #[error("store query failed: {0}")]
    Query(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
