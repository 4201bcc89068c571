//! # Runtime Errors
//!
//! Failures around session acceptance and script lifecycle. Call-level
//! failures never surface here; those travel back to the script as wire
//! error messages.

use std::fmt;

use tickwire::WireError;

pub type RunResult<T> = std::result::Result<T, RunError>;

#[derive(Debug)]
pub enum RunError {
    Io(std::io::Error),
    Wire(WireError),
    /// The peer closed before completing the handshake.
    HandshakeClosed,
    /// No auth message arrived within the accept window.
    HandshakeTimeout,
    /// The first message was not an auth, or carried the wrong token.
    AuthRejected,
    /// A script process could not be started.
    Launch(String),
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {}", e),
            Self::Wire(e) => write!(f, "wire error: {}", e),
            Self::HandshakeClosed => write!(f, "peer closed during handshake"),
            Self::HandshakeTimeout => write!(f, "handshake timed out"),
            Self::AuthRejected => write!(f, "authentication rejected"),
            Self::Launch(detail) => write!(f, "failed to launch script: {}", detail),
        }
    }
}

impl std::error::Error for RunError {}

impl From<std::io::Error> for RunError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<WireError> for RunError {
    fn from(e: WireError) -> Self {
        Self::Wire(e)
    }
}
