//! # Network Errors
//!
//! Every fallible network operation returns [`NetworkError`]. The variants
//! are grouped into coarse [`ErrorKind`]s so callers can branch on the
//! category (e.g. route an unregistered message id to a filter) without
//! matching every variant.

use crate::codec::CodecError;
use crate::config::ServerKey;
use std::time::Duration;

/// Errors raised by the packet framer.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame length {len} outside [{min}, {max}]")]
    LengthOutOfRange { len: usize, min: u32, max: u32 },
    #[error("frame truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
    #[error("frame of {len} bytes followed by {extra} stray bytes")]
    TrailingBytes { len: usize, extra: usize },
    #[error("frame I/O: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("message id {msg_id} is not registered")]
    UnregisteredMsgId { msg_id: u16 },
    #[error("unknown encode type {encode_type} for message id {msg_id}")]
    UnknownEncodeType { encode_type: u16, msg_id: u16 },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("listen on {addr} failed: {source}")]
    Listen {
        addr: String,
        source: std::io::Error,
    },
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("websocket: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("tls: {0}")]
    Tls(#[from] tokio_native_tls::native_tls::Error),
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("invalid service config: {0}")]
    InvalidConfig(String),
    #[error("filter not registered: {0}")]
    FilterNotFound(String),
    #[error("middleware not registered: {0}")]
    MiddleNotFound(String),
    #[error("message id {0} already has a handler")]
    DuplicateHandler(u16),
    #[error("session closed")]
    SessionClosed,
    #[error("send queue full")]
    SendQueueFull,
    #[error("service {0} is already running")]
    ServiceExists(ServerKey),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No handler is registered for the message id.
    Unregistered,
    /// The envelope names an encoding this build does not know.
    UnknownEncoding,
    /// Payload encode/decode failure.
    Codec,
    /// Length bounds, truncated frame or stray bytes after one.
    Framing,
    /// Socket, TLS, WebSocket or timeout failure.
    Transport,
    /// Bad configuration or registry setup.
    Setup,
    /// The session can no longer accept work.
    Session,
}

impl NetworkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnregisteredMsgId { .. } => ErrorKind::Unregistered,
            Self::UnknownEncodeType { .. } => ErrorKind::UnknownEncoding,
            Self::Codec(_) => ErrorKind::Codec,
            Self::Frame(FrameError::Io(_)) => ErrorKind::Transport,
            Self::Frame(_) => ErrorKind::Framing,
            Self::Io(_)
            | Self::Listen { .. }
            | Self::Timeout(_)
            | Self::WebSocket(_)
            | Self::Tls(_)
            | Self::ConnectionClosed => ErrorKind::Transport,
            Self::InvalidConfig(_)
            | Self::FilterNotFound(_)
            | Self::MiddleNotFound(_)
            | Self::DuplicateHandler(_)
            | Self::ServiceExists(_) => ErrorKind::Setup,
            Self::SessionClosed | Self::SendQueueFull => ErrorKind::Session,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for NetworkError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_group_variants() {
        assert_eq!(NetworkError::UnregisteredMsgId { msg_id: 9 }.kind(), ErrorKind::Unregistered);
        assert_eq!(
            NetworkError::from(FrameError::LengthOutOfRange { len: 0, min: 1, max: 10 }).kind(),
            ErrorKind::Framing
        );
        let eof = std::io::Error::from(std::io::ErrorKind::UnexpectedEof);
        assert_eq!(NetworkError::from(FrameError::Io(eof)).kind(), ErrorKind::Transport);
        assert_eq!(NetworkError::SendQueueFull.kind(), ErrorKind::Session);
        assert_eq!(NetworkError::FilterNotFound("x".into()).kind(), ErrorKind::Setup);
    }
}
