use std::io;
use std::path::PathBuf;

/// Failure reading or writing durable storage.
///
/// `Unavailable` covers every I/O failure (missing permissions, full disk,
/// a storage directory that cannot be created). `Corrupt` means the bytes
/// were read but could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("durable storage unavailable: {0}")]
    Unavailable(#[from] io::Error),

    #[error("durable storage holds undecodable data: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Failure handing a body to the ingestion endpoint.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Connectivity is known to be absent; nothing was sent.
    #[error("connectivity absent")]
    Offline,

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("endpoint answered with status {0}")]
    Status(u16),

    #[error("failed to encode body: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("transport i/o error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Connectivity-absent is expected and logged at info level; everything
    /// else is a transmission error.
    pub fn is_offline(&self) -> bool {
        matches!(self, TransportError::Offline)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("batch_size must be at least 1")]
    InvalidBatchSize,

    #[error("ledger_capacity must be at least 1")]
    InvalidLedgerCapacity,

    #[error("invalid endpoint {endpoint:?}: {source}")]
    InvalidEndpoint {
        endpoint: String,
        #[source]
        source: url::ParseError,
    },
}

#[derive(Debug, thiserror::Error)]
#[error("unknown event type {0:?}")]
pub struct UnknownEventType(pub String);

/// Errors that can stop a tracker from starting.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build transport: {0}")]
    Transport(#[from] TransportError),

    #[error("failed to spawn pipeline worker: {0}")]
    Spawn(#[source] io::Error),
}
