//! Server-side WebSocket mux (§4.H): one `ws_connect` per logical stream,
//! each exposed to the application as a mock endpoint; broadcast is a fold
//! over the registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tunnel_shared::envelope::{WsData, WsDataType, WsEventType};
use tunnel_shared::Frame;

/// Handed to the application when a logical stream opens. `send` enqueues
/// a frame onto the connection's single outbound channel, preserving
/// arrival-order delivery to the control channel's send loop.
#[derive(Clone)]
pub struct MockEndpoint {
    pub connection_id: String,
    outbound: UnboundedSender<Frame>,
    buffered_amount: Arc<std::sync::atomic::AtomicU64>,
}

impl MockEndpoint {
    pub fn send(&self, payload: Vec<u8>) {
        let (data, data_type) = WsData::from_payload(payload);
        self.buffered_amount
            .fetch_add(data.len() as u64, std::sync::atomic::Ordering::SeqCst);
        let _ = self.outbound.send(Frame::WsMessage {
            connection_id: self.connection_id.clone(),
            data,
            data_type,
        });
    }

    pub fn send_text(&self, text: String) {
        self.send(text.into_bytes())
    }

    pub fn close(&self, code: Option<u16>, reason: Option<String>) {
        let _ = self.outbound.send(Frame::WsClose {
            connection_id: self.connection_id.clone(),
            code,
            reason,
        });
    }

    pub fn buffered_amount(&self) -> u64 {
        self.buffered_amount.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
pub trait WsApplication: Send + Sync {
    async fn on_open(&self, endpoint: MockEndpoint);
    async fn on_message(&self, connection_id: &str, data: WsData, data_type: WsDataType);
    async fn on_close(&self, connection_id: &str, code: Option<u16>, reason: Option<String>);
}

#[derive(Default)]
pub struct MuxRegistry {
    endpoints: HashMap<String, MockEndpoint>,
}

impl MuxRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route one incoming mux-related frame. `outbound` is the
    /// connection's shared outbound sender (used both to register new
    /// endpoints and to emit `ws_event{open}`).
    pub async fn handle(
        &mut self,
        frame: Frame,
        app: &dyn WsApplication,
        outbound: &UnboundedSender<Frame>,
    ) {
        match frame {
            Frame::WsConnect { connection_id, .. } => {
                let endpoint = MockEndpoint {
                    connection_id: connection_id.clone(),
                    outbound: outbound.clone(),
                    buffered_amount: Arc::new(std::sync::atomic::AtomicU64::new(0)),
                };
                self.endpoints.insert(connection_id.clone(), endpoint.clone());
                let _ = outbound.send(Frame::WsEvent {
                    connection_id,
                    event_type: WsEventType::Open,
                    code: None,
                    reason: None,
                    error: None,
                });
                app.on_open(endpoint).await;
            }
            Frame::WsMessage {
                connection_id,
                data,
                data_type,
            } => {
                if self.endpoints.contains_key(&connection_id) {
                    app.on_message(&connection_id, data, data_type).await;
                }
            }
            Frame::WsClose {
                connection_id,
                code,
                reason,
            } => {
                if self.endpoints.remove(&connection_id).is_some() {
                    app.on_close(&connection_id, code, reason.clone()).await;
                    let _ = outbound.send(Frame::WsEvent {
                        connection_id,
                        event_type: WsEventType::Close,
                        code,
                        reason,
                        error: None,
                    });
                }
            }
            other => {
                tracing::warn!("mux registry handed a non-mux frame: {other:?}");
            }
        }
    }

    /// Fold a payload out to every currently registered endpoint.
    pub fn broadcast(&self, payload: &[u8]) {
        for endpoint in self.endpoints.values() {
            endpoint.send(payload.to_vec());
        }
    }

    /// Drain the registry on outer-connection teardown, notifying the
    /// application of a 1006/"tunnel closed" close for every stream still
    /// registered (§3/§5: streams fail with a defined close code when their
    /// owning connection tears down). The outer transport is already gone
    /// by the time this runs, so this only fires the application callback —
    /// there's no peer left to deliver a `ws_event`/`ws_close` frame to.
    pub async fn close_all(&mut self, app: &dyn WsApplication) {
        for (connection_id, _) in std::mem::take(&mut self.endpoints) {
            app.on_close(
                &connection_id,
                Some(1006),
                Some("tunnel closed".to_string()),
            )
            .await;
        }
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
