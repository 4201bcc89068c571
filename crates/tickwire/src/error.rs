//! # Error Definitions
//!
//! Failures at the wire layer: framing violations and malformed messages.

/// Errors raised while framing or parsing wire traffic.
#[derive(Debug)]
pub enum WireError {
    /// The frame length prefix was zero, negative, or above the cap.
    BadFrameLength(i64),
    /// The connection closed mid-frame.
    Truncated,
    /// The frame body was not valid UTF-8 JSON of the expected shape.
    Malformed(String),
    /// Underlying socket failure.
    Io(std::io::Error),
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadFrameLength(len) => write!(f, "Invalid message length: {}", len),
            Self::Truncated => write!(f, "Connection closed mid-frame"),
            Self::Malformed(msg) => write!(f, "Malformed message: {}", msg),
            Self::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for WireError {}

impl From<std::io::Error> for WireError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for WireError {
    fn from(e: serde_json::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WireError>;
