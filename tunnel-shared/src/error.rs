//! Error type shared by the tunnel client and server.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TunnelError>;

#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("handshake failed: {reason}")]
    HandshakeFailed { reason: String },

    #[error("quote rejected: {0}")]
    QuoteRejected(String),

    #[error("missing symmetric key")]
    SymmetricKeyMissing,

    #[error("websocket not connected")]
    NotConnected,

    #[error("request timeout")]
    RequestTimeout,

    #[error("tunnel disconnected")]
    TunnelDisconnected,

    #[error("port mismatch")]
    PortMismatch,

    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}
