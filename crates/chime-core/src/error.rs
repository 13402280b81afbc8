//! Error types for chime.

use thiserror::Error;

/// Result type alias using chime's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for chime.
///
/// Every fallible operation in the playback core surfaces one of these
/// immediately, with the message naming the failing stage. Nothing is
/// retried internally; retries are a caller concern.
#[derive(Error, Debug)]
pub enum Error {
    // Device errors
    #[error("audio device error: {0}")]
    Device(String),

    // Decode errors
    #[error("decode error: {0}")]
    Decode(String),

    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    // Registry errors
    #[error("sound already registered: {0}")]
    DuplicateName(String),

    #[error("sound not found: {0}")]
    NotFound(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true if this error came from the native audio service.
    pub const fn is_device(&self) -> bool {
        matches!(self, Self::Device(_))
    }

    /// Prefix a device error's message with the stage that issued the call.
    ///
    /// Other error kinds pass through untouched so that, for example, a
    /// decode failure inside `load` keeps its own stage description.
    pub fn at_stage(self, stage: &str) -> Self {
        match self {
            Self::Device(msg) => Self::Device(format!("{stage}: {msg}")),
            other => other,
        }
    }
}
