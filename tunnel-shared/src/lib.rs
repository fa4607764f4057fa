//! Types and crypto shared between the tunnel client and server: the wire
//! envelope/frame schemas, X25519 key-exchange + secretbox crypto, the
//! `TunnelConfig` timing knobs, and the common error taxonomy.

pub mod config;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod transport;

pub use config::TunnelConfig;
pub use envelope::{Envelope, Frame, WsData, WsDataType, WsEventType};
pub use error::{Result, TunnelError};
pub use transport::{DuplexTransport, OuterTransport};
