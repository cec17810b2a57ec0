//! Error handling for the diagnosis core

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
///
/// Transient stream I/O faults are absorbed by the owning worker and
/// reflected in its status counters; only the variants below cross an
/// operation boundary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or missing input
    #[error("Invalid input: {0}")]
    Input(String),

    /// Container/codec the decoder cannot handle
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Memory/buffer ceiling exceeded
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Soft or hard deadline elapsed
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Detector name not present in the registry
    #[error("Unknown detector: {0}")]
    UnknownDetector(String),

    /// Detector factory failed
    #[error("Detector construction failed: {0}")]
    DetectorConstruction(String),

    /// Source could not be opened
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// Live source dropped mid-read
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Unknown stream/task/execution id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Busy task, stream already started
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Invalid cron, unknown profile, out-of-range threshold
    #[error("Config error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable code for result envelopes and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Input(_) => "INVALID_INPUT",
            Error::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            Error::ResourceExhausted(_) => "RESOURCE_EXHAUSTED",
            Error::Timeout(_) => "TIMEOUT",
            Error::UnknownDetector(_) => "UNKNOWN_DETECTOR",
            Error::DetectorConstruction(_) => "DETECTOR_CONSTRUCTION",
            Error::SourceUnavailable(_) => "SOURCE_UNAVAILABLE",
            Error::ConnectionLost(_) => "CONNECTION_LOST",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Conflict(_) => "CONFLICT",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether a stream worker should keep retrying after this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::ConnectionLost(_) | Error::SourceUnavailable(_) | Error::Timeout(_)
        )
    }
}
