//! Client half of the HTTP dispatcher (§4.G): a pending-request book keyed
//! by `request_id`, each entry resolved or rejected exactly once.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::oneshot;
use tunnel_shared::Frame;

use crate::error::{Result, TunnelError};

pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

pub struct FetchResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: BTreeMap<String, String>,
    /// `None` for a 204, or when the server sent no body.
    pub body: Option<String>,
    pub error: Option<String>,
}

/// Tracks in-flight `http_request`s awaiting their `http_response`.
#[derive(Default)]
pub struct PendingRequests {
    inflight: BTreeMap<String, oneshot::Sender<FetchResponse>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request about to be sent, returning the receiver the
    /// caller awaits (with the configured timeout).
    pub fn register(&mut self, request_id: String) -> oneshot::Receiver<FetchResponse> {
        let (tx, rx) = oneshot::channel();
        self.inflight.insert(request_id, tx);
        rx
    }

    /// Resolve a pending request from an `http_response` frame. No-op if
    /// the request_id is unknown (already timed out, or duplicate).
    pub fn resolve(&mut self, frame: Frame) {
        let Frame::HttpResponse {
            request_id,
            status,
            status_text,
            headers,
            body,
            error,
        } = frame
        else {
            return;
        };
        if let Some(tx) = self.inflight.remove(&request_id) {
            let body = if status == 204 { None } else { body };
            let _ = tx.send(FetchResponse {
                status,
                status_text,
                headers,
                body,
                error,
            });
        }
    }

    /// Reject every in-flight request with `TunnelDisconnected`, used on
    /// teardown/reconnect (§5: "cancellation ... rejects with Tunnel
    /// disconnected").
    pub fn fail_all_disconnected(&mut self) {
        for (_, tx) in std::mem::take(&mut self.inflight) {
            drop(tx); // dropping the sender fails the receiver with RecvError
        }
    }

    pub fn len(&self) -> usize {
        self.inflight.len()
    }
}

/// Await a pending request's receiver with the request timeout, mapping a
/// dropped sender (disconnect) or elapsed timer to the matching error.
pub async fn await_response(
    rx: oneshot::Receiver<FetchResponse>,
    timeout_ms: u64,
) -> Result<FetchResponse> {
    match tokio::time::timeout(Duration::from_millis(timeout_ms), rx).await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(_)) => Err(TunnelError::TunnelDisconnected),
        Err(_) => Err(TunnelError::RequestTimeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_completes_matching_request() {
        let mut book = PendingRequests::new();
        let rx = book.register("r1".to_string());
        book.resolve(Frame::HttpResponse {
            request_id: "r1".into(),
            status: 200,
            status_text: "OK".into(),
            headers: BTreeMap::new(),
            body: Some("hi".into()),
            error: None,
        });
        let response = await_response(rx, DEFAULT_REQUEST_TIMEOUT_MS).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn status_204_clears_body() {
        let mut book = PendingRequests::new();
        let rx = book.register("r1".to_string());
        book.resolve(Frame::HttpResponse {
            request_id: "r1".into(),
            status: 204,
            status_text: "No Content".into(),
            headers: BTreeMap::new(),
            body: Some("ignored".into()),
            error: None,
        });
        let response = await_response(rx, DEFAULT_REQUEST_TIMEOUT_MS).await.unwrap();
        assert_eq!(response.body, None);
    }

    #[tokio::test]
    async fn disconnect_fails_pending_requests() {
        let mut book = PendingRequests::new();
        let rx = book.register("r1".to_string());
        book.fail_all_disconnected();
        let err = await_response(rx, DEFAULT_REQUEST_TIMEOUT_MS).await.unwrap_err();
        assert!(matches!(err, TunnelError::TunnelDisconnected));
    }
}
