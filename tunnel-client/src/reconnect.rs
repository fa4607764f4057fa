//! Reconnect/heartbeat driver (§4.J client half): on loss of the outer
//! transport, waits `reconnect_delay`, opens a fresh transport and
//! re-handshakes, failing every in-flight request in the gap rather than
//! leaving them to time out individually.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};
use tunnel_shared::OuterTransport;

use crate::control::ClientControlChannel;
use crate::error::{Result, TunnelError};
use crate::fetch::PendingRequests;

/// Produces a fresh outer transport each time the session needs to
/// (re)connect. The hosting WS client is out of scope; implementors wrap
/// whatever real connector the embedding application uses.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    type Transport: OuterTransport;

    async fn connect(&self) -> Option<Self::Transport>;
}

/// Owns the current control channel (if any) and reconnects it on
/// disconnect. Requests in flight when the transport drops are failed with
/// `TunnelDisconnected` immediately rather than waiting out their own
/// timeout, per §5's reconnect-cancellation semantics.
pub struct ReconnectingSession<F: TransportFactory> {
    factory: F,
    reconnect_delay: Duration,
    control: Option<ClientControlChannel<F::Transport>>,
    pending: PendingRequests,
}

impl<F: TransportFactory> ReconnectingSession<F> {
    pub fn new(factory: F, reconnect_delay: Duration) -> Self {
        ReconnectingSession {
            factory,
            reconnect_delay,
            control: None,
            pending: PendingRequests::new(),
        }
    }

    pub fn pending_mut(&mut self) -> &mut PendingRequests {
        &mut self.pending
    }

    pub fn is_connected(&self) -> bool {
        self.control.as_ref().is_some_and(|c| c.is_established())
    }

    /// Establish a connection if one isn't already up: open a transport,
    /// hand it to a fresh `ClientControlChannel`, and run the handshake.
    /// On any failure the session stays disconnected and every caller
    /// awaiting a request fails with `TunnelDisconnected`.
    pub async fn ensure_connected(&mut self, config: &qvl::VerifyConfig<'_>) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let Some(transport) = self.factory.connect().await else {
            self.pending.fail_all_disconnected();
            return Err(TunnelError::NotConnected);
        };

        let mut control = ClientControlChannel::new(transport);
        if let Err(e) = control.handshake(config).await {
            warn!("handshake failed during (re)connect: {e}");
            self.pending.fail_all_disconnected();
            return Err(e);
        }

        info!("tunnel (re)connected");
        self.control = Some(control);
        Ok(())
    }

    /// Tear down the current connection (if any), failing in-flight
    /// requests, and wait `reconnect_delay` before the caller retries
    /// `ensure_connected`.
    pub async fn disconnect_and_wait(&mut self) {
        if let Some(mut control) = self.control.take() {
            control.close();
        }
        self.pending.fail_all_disconnected();
        tokio::time::sleep(self.reconnect_delay).await;
    }

    pub fn control(&mut self) -> Option<&mut ClientControlChannel<F::Transport>> {
        self.control.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tunnel_shared::DuplexTransport;

    struct CountingFactory {
        attempts: AtomicUsize,
        succeed_after: usize,
    }

    #[async_trait]
    impl TransportFactory for CountingFactory {
        type Transport = DuplexTransport;

        async fn connect(&self) -> Option<DuplexTransport> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.succeed_after {
                None
            } else {
                let (_server, client) = DuplexTransport::pair();
                Some(client)
            }
        }
    }

    #[tokio::test]
    async fn ensure_connected_fails_closed_when_factory_yields_nothing() {
        let factory = CountingFactory {
            attempts: AtomicUsize::new(0),
            succeed_after: usize::MAX,
        };
        let mut session = ReconnectingSession::new(factory, Duration::from_millis(1));
        let config = qvl::VerifyConfig::default();
        let err = session.ensure_connected(&config).await.unwrap_err();
        assert!(matches!(err, TunnelError::NotConnected));
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn disconnect_fails_pending_and_clears_control() {
        let factory = CountingFactory {
            attempts: AtomicUsize::new(0),
            succeed_after: usize::MAX,
        };
        let mut session = ReconnectingSession::new(factory, Duration::from_millis(1));
        let rx = session.pending_mut().register("r1".to_string());
        session.disconnect_and_wait().await;
        let err = crate::fetch::await_response(rx, 1_000).await.unwrap_err();
        assert!(matches!(err, TunnelError::TunnelDisconnected));
        assert!(!session.is_connected());
    }
}
