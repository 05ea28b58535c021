//! Error taxonomy for the session engine.
//!
//! Transport failures flip connection state and are recovered locally where
//! possible; fetch failures terminate the current exposure; everything else
//! is returned to the caller. Nothing here is permitted to abort the host
//! process.

use thiserror::Error;

use origin_protocol::ProtocolError;

/// Result alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors raised by the control channel.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Low-level socket read/write failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to resolve, connect, or complete the WebSocket handshake.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Operation attempted on a channel that is not open.
    #[error("Channel is not connected")]
    NotConnected,

    /// The peer closed the connection.
    #[error("Peer closed the connection")]
    Closed,

    /// WebSocket framing or protocol violation.
    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

/// Errors raised by the out-of-band image retrieval channel.
///
/// A fetch failure terminates the exposure in flight but never affects the
/// control channel's connectivity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Image server address could not be resolved.
    #[error("Could not resolve image host {0}")]
    Unresolvable(String),

    /// TCP connection to the image server failed.
    #[error("Failed to connect to image server: {0}")]
    ConnectFailed(String),

    /// No complete response within the retrieval timeout.
    #[error("Timed out waiting for image data")]
    Timeout,

    /// Response could not be parsed as an HTTP payload.
    #[error("Malformed image response: {0}")]
    MalformedResponse(String),

    /// Response parsed but carried no payload bytes.
    #[error("Image response had an empty body")]
    EmptyBody,
}

/// Umbrella error surfaced by the session API.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Command attempted while the session is disconnected. Commands are
    /// fire-and-forget: nothing is queued, the caller re-issues after
    /// reconnect.
    #[error("Not connected to the telescope")]
    NotConnected,

    /// Exposure requested while one is already active.
    #[error("An exposure is already in progress")]
    ExposureBusy,

    /// Command argument outside the accepted range.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_display() {
        let err = FetchError::Unresolvable("origin.local".to_string());
        assert_eq!(err.to_string(), "Could not resolve image host origin.local");
    }

    #[test]
    fn test_transport_error_wraps_into_backend() {
        let err: BackendError = TransportError::NotConnected.into();
        assert!(matches!(err, BackendError::Transport(_)));
    }
}
