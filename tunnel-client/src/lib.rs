//! Client-side control channel, quote verification, HTTP fetch and
//! WebSocket mux for the attested tunnel.
//!
//! This is the only crate in the workspace that depends on `qvl`: the
//! server presents its quote opaquely and it's the client's job to verify
//! it during the handshake (see [`control::ClientControlChannel::handshake`]).

pub mod control;
pub mod error;
pub mod fetch;
pub mod reconnect;
pub mod ws;

pub use control::ClientControlChannel;
pub use error::{quote_rejected, Result, TunnelError};
pub use fetch::{await_response, FetchResponse, PendingRequests};
pub use reconnect::{ReconnectingSession, TransportFactory};
pub use ws::{ReadyState, WsEvent, WsHandle, WsManager};
