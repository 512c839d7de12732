//! Bridge error types
//!
//! The protocol state machines themselves are infallible: stray frames are
//! dropped and timeouts reset silently. Errors only arise at the transport
//! boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("serial port error: {0}")]
    Port(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed cable frame: {0}")]
    Framing(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
