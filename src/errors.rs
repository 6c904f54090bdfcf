//! Registry Watch Error Hierarchy
//!
//! Server errors (5xx) never show up here: they are recovered inside the watch
//! loop. Anything that reaches a consumer as [`Error`] has already ended the
//! stream that produced it.

use config::ConfigError;

use crate::model::Cursor;
use crate::model::Resource;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A watch loop could not talk to the registry. Fatal to the whole
    /// dependency stream.
    #[error("transport failure watching {resource} at cursor {cursor}: {source}")]
    Transport {
        resource: Resource,
        cursor: Cursor,
        #[source]
        source: TransportError,
    },

    /// Configuration sources could not be read or deserialized
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Configuration loaded but failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An internal task stopped abnormally (panicked) and its output is gone.
    /// Fatal to the whole dependency stream.
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

/// Failures below the status-code layer: nothing usable came back.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Registry endpoint could not be reached
    #[error("registry unreachable: {0}")]
    Unreachable(String),

    /// Response arrived but could not be interpreted
    #[error("malformed response: {0}")]
    Malformed(String),

    /// HTTP client errors
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Resource whose loop produced this error, if any
    pub fn resource(&self) -> Option<&Resource> {
        match self {
            Error::Transport { resource, .. } => Some(resource),
            _ => None,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport { .. })
    }
}
