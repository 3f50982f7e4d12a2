//! Protocol error types

use thiserror::Error;

/// Errors that can occur while framing or parsing protocol messages
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A line exceeded the configured maximum length
    #[error("Frame too large: {size} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },

    /// The frame was not a valid JSON message
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether the connection can keep reading after this error.
    ///
    /// A malformed line has already been consumed, so the stream is still
    /// aligned on a frame boundary. Oversized frames and I/O errors are not.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ProtocolError::Malformed(_))
    }
}
