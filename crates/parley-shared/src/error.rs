use thiserror::Error;

/// Bearer token verification failures.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("No token provided")]
    Missing,

    #[error("Malformed token")]
    Malformed,

    #[error("Token expired")]
    Expired,

    #[error("Invalid token signature")]
    BadSignature,
}

/// Live-channel framing failures.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid event payload: {0}")]
    InvalidEvent(#[from] serde_json::Error),

    #[error("Unsupported frame type")]
    UnsupportedFrame,
}
