//! Abstraction over the outer WebSocket connection that carries the
//! control channel.
//!
//! The hosting WS server itself is an external collaborator (out of
//! scope); this trait is the seam test harnesses and the client/server
//! crates program against, with an in-memory duplex implementation for
//! tests.

use async_trait::async_trait;

/// One side of a duplex message-framed transport: send and receive whole
/// WebSocket messages (text or binary — the tunnel only ever exchanges
/// binary CBOR frames, so callers pass/receive raw bytes).
#[async_trait]
pub trait OuterTransport: Send {
    async fn send(&mut self, bytes: Vec<u8>) -> bool;
    /// `None` means the transport is closed.
    async fn recv(&mut self) -> Option<Vec<u8>>;
    fn close(&mut self);
}

/// In-memory duplex transport built on `tokio::sync::mpsc`, used by tests
/// that exercise the handshake and dispatchers without a real socket.
pub struct DuplexTransport {
    tx: tokio::sync::mpsc::UnboundedSender<Vec<u8>>,
    rx: tokio::sync::mpsc::UnboundedReceiver<Vec<u8>>,
}

impl DuplexTransport {
    /// Build a connected pair: `(a, b)`, where messages sent on `a` arrive
    /// on `b` and vice versa.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = tokio::sync::mpsc::unbounded_channel();
        let (tx_b, rx_b) = tokio::sync::mpsc::unbounded_channel();
        (
            DuplexTransport { tx: tx_a, rx: rx_b },
            DuplexTransport { tx: tx_b, rx: rx_a },
        )
    }
}

#[async_trait]
impl OuterTransport for DuplexTransport {
    async fn send(&mut self, bytes: Vec<u8>) -> bool {
        self.tx.send(bytes).is_ok()
    }

    async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    fn close(&mut self) {
        self.rx.close();
    }
}
