//! Server-side control channel, HTTP dispatcher, encrypted-only gate and
//! WebSocket mux for the attested tunnel.
//!
//! This crate never touches `qvl` — quote *production* is delegated to an
//! injected [`quote_source::QuoteSource`]; only the client verifies quotes.

pub mod connection;
pub mod control;
pub mod dispatcher;
pub mod mux;
pub mod quote_source;

pub use connection::Connection;
pub use dispatcher::{encrypted_only, Body, HttpHandler, HttpResult, SyntheticRequest};
pub use mux::{MockEndpoint, MuxRegistry, WsApplication};
pub use quote_source::{QuoteMaterial, QuoteSource, VerifierData};
