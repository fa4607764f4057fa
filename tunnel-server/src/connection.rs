//! Ties the control channel, HTTP dispatcher and WS mux into one
//! per-outer-connection actor with a single `mpsc` inbox for outbound
//! frames, so ordering on the wire matches arrival order of whichever
//! component produced them (§5).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::warn;
use tunnel_shared::{Frame, OuterTransport, TunnelConfig};

use crate::control::ControlChannel;
use crate::dispatcher::{self, HttpHandler};
use crate::mux::{MuxRegistry, WsApplication};
use crate::quote_source::QuoteSource;
use tunnel_shared::crypto::ServerKeypair;

pub struct Connection<T: OuterTransport> {
    control: ControlChannel<T>,
    http_handler: Arc<dyn HttpHandler>,
    ws_app: Arc<dyn WsApplication>,
    mux: MuxRegistry,
    outbound_tx: mpsc::UnboundedSender<Frame>,
    outbound_rx: mpsc::UnboundedReceiver<Frame>,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
}

impl<T: OuterTransport> Connection<T> {
    pub fn new(
        transport: T,
        keypair: ServerKeypair,
        http_handler: Arc<dyn HttpHandler>,
        ws_app: Arc<dyn WsApplication>,
        config: &TunnelConfig,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Connection {
            control: ControlChannel::new(transport, keypair),
            http_handler,
            ws_app,
            mux: MuxRegistry::new(),
            outbound_tx,
            outbound_rx,
            heartbeat_interval: Duration::from_millis(config.heartbeat_interval_ms),
            heartbeat_timeout: Duration::from_millis(config.heartbeat_timeout_ms),
        }
    }

    /// Run until the outer transport closes or the heartbeat times out.
    /// `quote_source` supplies the material for the opening `server_kx`.
    pub async fn run(mut self, quote_source: Arc<dyn QuoteSource>) {
        let material = quote_source
            .produce_quote(&self.control_public_key())
            .await;
        if let Err(e) = self.control.announce(material).await {
            warn!("failed to announce server_kx: {e}");
            return;
        }

        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        loop {
            tokio::select! {
                inbound = self.control.recv() => {
                    match inbound {
                        None => break,
                        Some(Err(e)) => {
                            warn!("tearing down connection after handshake/crypto failure: {e}");
                            break;
                        }
                        Some(Ok(None)) => {}
                        Some(Ok(Some(frame))) => self.handle_inbound(frame).await,
                    }
                }
                Some(frame) = self.outbound_rx.recv() => {
                    if let Err(e) = self.control.send(&frame).await {
                        warn!("dropping outbound frame, send failed: {e}");
                    }
                }
                _ = heartbeat.tick() => {
                    if self.control.is_stale(self.heartbeat_timeout) {
                        warn!("control socket stale, tearing down");
                        break;
                    }
                }
            }
        }
        self.mux.close_all(self.ws_app.as_ref()).await;
        self.control.close();
    }

    async fn handle_inbound(&mut self, frame: Frame) {
        match frame {
            Frame::HttpRequest { .. } => {
                let response = dispatcher::dispatch(self.http_handler.as_ref(), frame).await;
                let _ = self.outbound_tx.send(response);
            }
            Frame::WsConnect { .. } | Frame::WsMessage { .. } | Frame::WsClose { .. } => {
                self.mux
                    .handle(frame, self.ws_app.as_ref(), &self.outbound_tx)
                    .await;
            }
            other => warn!("unexpected frame on control channel: {other:?}"),
        }
    }

    fn control_public_key(&self) -> [u8; 32] {
        self.control.public_key()
    }
}
