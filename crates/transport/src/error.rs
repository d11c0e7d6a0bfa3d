//! Error types for transport implementations.

use std::io;
use thiserror::Error;

/// Errors surfaced by transport implementations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to establish a connection.
    #[error("Failed to connect: {0}")]
    ConnectionFailed(String),

    /// Connection closed, either cleanly or unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The address could not be parsed or resolved.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// A message violated the transport's size bounds.
    #[error("Message size {size} outside allowed range [{min}, {max}]")]
    MessageSize {
        /// Size of the offending message.
        size: usize,
        /// Smallest allowed message.
        min: usize,
        /// Largest allowed message.
        max: usize,
    },

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Anything else.
    #[error("{0}")]
    Other(String),
}
