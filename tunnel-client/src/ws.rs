//! Client half of the WebSocket mux (§4.H): a `readyState` lifecycle per
//! logical stream, a FIFO send queue flushed on open, and the port-mismatch
//! guard that keeps a tunneled `WebSocket` from silently reaching a
//! different origin than the control channel's.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tunnel_shared::envelope::{WsData, WsDataType, WsEventType};
use tunnel_shared::Frame;

use crate::error::{Result, TunnelError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

struct StreamState {
    ready_state: ReadyState,
    send_queue: VecDeque<Vec<u8>>,
    buffered_amount: u64,
    outbound: tokio::sync::mpsc::UnboundedSender<Frame>,
}

/// Client-side handle to one tunneled WebSocket. Cheap to clone; all
/// mutable state lives behind the shared lock so the frame-pump task and
/// the application's handle agree on `readyState`.
#[derive(Clone)]
pub struct WsHandle {
    connection_id: String,
    state: Arc<Mutex<StreamState>>,
    outbound: tokio::sync::mpsc::UnboundedSender<Frame>,
}

impl WsHandle {
    pub fn ready_state(&self) -> ReadyState {
        self.state.lock().unwrap().ready_state
    }

    pub fn buffered_amount(&self) -> u64 {
        self.state.lock().unwrap().buffered_amount
    }

    /// Send a payload. Queued (not transmitted) while `CONNECTING`; flushed
    /// in FIFO order once `open` arrives. Errors if the stream is already
    /// `CLOSING`/`CLOSED`, matching a real `WebSocket.send` throwing after
    /// close.
    pub fn send(&self, payload: Vec<u8>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match state.ready_state {
            ReadyState::Closing | ReadyState::Closed => {
                Err(TunnelError::NotConnected)
            }
            ReadyState::Connecting => {
                state.buffered_amount += payload.len() as u64;
                state.send_queue.push_back(payload);
                Ok(())
            }
            ReadyState::Open => {
                state.buffered_amount += payload.len() as u64;
                let (data, data_type) = WsData::from_payload(payload);
                let _ = self.outbound.send(Frame::WsMessage {
                    connection_id: self.connection_id.clone(),
                    data,
                    data_type,
                });
                Ok(())
            }
        }
    }

    pub fn close(&self, code: Option<u16>, reason: Option<String>) {
        let mut state = self.state.lock().unwrap();
        if state.ready_state == ReadyState::Closed {
            return;
        }
        state.ready_state = ReadyState::Closing;
        let _ = self.outbound.send(Frame::WsClose {
            connection_id: self.connection_id.clone(),
            code,
            reason,
        });
    }
}

pub enum WsEvent {
    Open,
    Message { data: WsData, data_type: WsDataType },
    Close { code: Option<u16>, reason: Option<String> },
    Error { message: String },
}

/// Tracks every logical stream opened by this client and enforces the
/// port-mismatch guard against the control channel's origin.
pub struct WsManager {
    origin_port: u16,
    streams: HashMap<String, Arc<Mutex<StreamState>>>,
}

impl WsManager {
    pub fn new(origin_port: u16) -> Self {
        WsManager {
            origin_port,
            streams: HashMap::new(),
        }
    }

    /// Open a new logical stream. Returns `PortMismatch` without sending
    /// `ws_connect` if `url`'s port differs from the control channel's
    /// origin port (§4.H: "the client enforces that the target port
    /// matches the control channel's origin port").
    pub fn connect(
        &mut self,
        connection_id: String,
        url: &str,
        protocols: Option<Vec<String>>,
        outbound: &tokio::sync::mpsc::UnboundedSender<Frame>,
    ) -> Result<WsHandle> {
        let parsed = url::Url::parse(url).map_err(|e| TunnelError::MalformedFrame(e.to_string()))?;
        let target_port = parsed
            .port_or_known_default()
            .ok_or_else(|| TunnelError::MalformedFrame("url has no port".to_string()))?;
        if target_port != self.origin_port {
            return Err(TunnelError::PortMismatch);
        }

        let state = Arc::new(Mutex::new(StreamState {
            ready_state: ReadyState::Connecting,
            send_queue: VecDeque::new(),
            buffered_amount: 0,
            outbound: outbound.clone(),
        }));
        self.streams.insert(connection_id.clone(), state.clone());

        let _ = outbound.send(Frame::WsConnect {
            connection_id: connection_id.clone(),
            url: url.to_string(),
            protocols,
        });

        Ok(WsHandle {
            connection_id,
            state,
            outbound: outbound.clone(),
        })
    }

    /// Dispatch an inbound mux frame (`ws_event`/`ws_message`/`ws_close`),
    /// returning the application-facing event alongside the id it belongs
    /// to, or `None` for frames referencing an unknown/already-closed
    /// stream.
    pub fn handle(&mut self, frame: Frame) -> Option<(String, WsEvent)> {
        match frame {
            Frame::WsEvent {
                connection_id,
                event_type,
                code,
                reason,
                error,
            } => {
                let state = self.streams.get(&connection_id)?;
                let event = match event_type {
                    WsEventType::Open => {
                        let mut guard = state.lock().unwrap();
                        guard.ready_state = ReadyState::Open;
                        let queued: Vec<_> = guard.send_queue.drain(..).collect();
                        let outbound = guard.outbound.clone();
                        drop(guard);
                        for payload in queued {
                            let (data, data_type) = WsData::from_payload(payload);
                            let _ = outbound.send(Frame::WsMessage {
                                connection_id: connection_id.clone(),
                                data,
                                data_type,
                            });
                        }
                        WsEvent::Open
                    }
                    WsEventType::Close => {
                        let mut guard = state.lock().unwrap();
                        guard.ready_state = ReadyState::Closed;
                        drop(guard);
                        self.streams.remove(&connection_id);
                        WsEvent::Close { code, reason }
                    }
                    WsEventType::Error => WsEvent::Error {
                        message: error.unwrap_or_default(),
                    },
                };
                Some((connection_id, event))
            }
            Frame::WsMessage {
                connection_id,
                data,
                data_type,
            } => {
                self.streams.get(&connection_id)?;
                Some((connection_id, WsEvent::Message { data, data_type }))
            }
            Frame::WsClose {
                connection_id,
                code,
                reason,
            } => {
                if let Some(state) = self.streams.remove(&connection_id) {
                    state.lock().unwrap().ready_state = ReadyState::Closed;
                }
                Some((connection_id, WsEvent::Close { code, reason }))
            }
            other => {
                tracing::warn!("WsManager handed a non-mux frame: {other:?}");
                None
            }
        }
    }

    /// Synthesize a local `error` event for a port mismatch, used by
    /// callers that want the same event-driven surface `connect`'s `Err`
    /// return would otherwise bypass.
    pub fn port_mismatch_event() -> WsEvent {
        WsEvent::Error {
            message: "Port mismatch".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_rejects_mismatched_port() {
        let mut manager = WsManager::new(8443);
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let err = manager
            .connect("c1".into(), "wss://host:9000/stream", None, &tx)
            .unwrap_err();
        assert!(matches!(err, TunnelError::PortMismatch));
    }

    #[test]
    fn connect_accepts_matching_port() {
        let mut manager = WsManager::new(8443);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = manager
            .connect("c1".into(), "wss://host:8443/stream", None, &tx)
            .unwrap();
        assert_eq!(handle.ready_state(), ReadyState::Connecting);
        match rx.try_recv().unwrap() {
            Frame::WsConnect { connection_id, .. } => assert_eq!(connection_id, "c1"),
            _ => panic!("expected ws_connect"),
        }
    }

    #[test]
    fn send_before_open_is_queued_not_transmitted() {
        let mut manager = WsManager::new(443);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = manager
            .connect("c1".into(), "wss://host/stream", None, &tx)
            .unwrap();
        let _ = rx.try_recv(); // drain ws_connect
        handle.send(b"hello".to_vec()).unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(handle.buffered_amount(), 5);
    }

    #[test]
    fn open_event_transitions_ready_state() {
        let mut manager = WsManager::new(443);
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = manager
            .connect("c1".into(), "wss://host/stream", None, &tx)
            .unwrap();
        manager.handle(Frame::WsEvent {
            connection_id: "c1".into(),
            event_type: WsEventType::Open,
            code: None,
            reason: None,
            error: None,
        });
        assert_eq!(handle.ready_state(), ReadyState::Open);
    }

    #[test]
    fn send_after_close_fails() {
        let mut manager = WsManager::new(443);
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = manager
            .connect("c1".into(), "wss://host/stream", None, &tx)
            .unwrap();
        manager.handle(Frame::WsClose {
            connection_id: "c1".into(),
            code: Some(1000),
            reason: None,
        });
        assert_eq!(handle.ready_state(), ReadyState::Closed);
        assert!(matches!(
            handle.send(b"x".to_vec()),
            Err(TunnelError::NotConnected)
        ));
    }
}
