use thiserror::Error;

/// Application level error type used throughout the crate.
#[derive(Error, Debug)]
pub enum AlarmError {
    /// Malformed record rejected before it reached the registry map
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// The registry process or the channel to it is unreachable
    #[error("Transport error: {0}")]
    Transport(String),

    /// A notification could not be pushed to one subscriber
    #[error("Delivery failure on subscription {subscription} ({topic}): {reason}")]
    DeliveryFailure {
        subscription: u64,
        topic: String,
        reason: String,
    },

    /// A subscriber callback panicked; the record is not offered to it again
    #[error("Callback failed: {0}")]
    Callback(String),

    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O related failure
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    /// Error while parsing YAML configuration files
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Error while encoding or decoding JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AlarmError {
    pub(crate) fn transport(err: impl std::fmt::Display) -> Self {
        AlarmError::Transport(err.to_string())
    }

    /// True for errors the caller should fix rather than retry
    pub fn is_invalid_record(&self) -> bool {
        matches!(self, AlarmError::InvalidRecord(_))
    }

    /// False for failures a repeated attempt cannot fix
    pub fn is_retryable(&self) -> bool {
        !matches!(self, AlarmError::InvalidRecord(_) | AlarmError::Callback(_))
    }

    /// True when the registry could not be reached
    pub fn is_transport(&self) -> bool {
        matches!(self, AlarmError::Transport(_))
    }
}

/// Convenient alias over [`Result`] using [`AlarmError`]
pub type Result<T> = std::result::Result<T, AlarmError>;
