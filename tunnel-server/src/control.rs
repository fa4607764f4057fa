//! Server half of the per-socket control channel state machine (§4.F):
//! `AwaitingConfirm` → `Established`, plus the heartbeat liveness check
//! (§4.J, folded in here per spec).

use std::time::{Duration, Instant};

use base64::Engine as _;
use tracing::warn;
use tunnel_shared::crypto::{self, ServerKeypair};
use tunnel_shared::error::{Result, TunnelError};
use tunnel_shared::{Envelope, Frame, OuterTransport};

use crate::quote_source::QuoteMaterial;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingConfirm,
    Established,
    Closed,
}

/// Owns one outer connection's handshake state, symmetric key once
/// established, and liveness bookkeeping.
pub struct ControlChannel<T: OuterTransport> {
    transport: T,
    keypair: ServerKeypair,
    state: State,
    symmetric_key: Option<[u8; crypto::SYMMETRIC_KEY_LEN]>,
    last_activity: Instant,
}

impl<T: OuterTransport> ControlChannel<T> {
    pub fn new(transport: T, keypair: ServerKeypair) -> Self {
        ControlChannel {
            transport,
            keypair,
            state: State::AwaitingConfirm,
            symmetric_key: None,
            last_activity: Instant::now(),
        }
    }

    /// Emit `server_kx` immediately on open, as §4.F requires.
    pub async fn announce(&mut self, material: QuoteMaterial) -> Result<()> {
        let envelope = Envelope::ServerKx {
            x25519_public_key: base64::engine::general_purpose::STANDARD
                .encode(self.keypair.public_bytes()),
            quote: base64::engine::general_purpose::STANDARD.encode(&material.quote),
            runtime_data: material
                .runtime_data
                .as_ref()
                .map(|d| base64::engine::general_purpose::STANDARD.encode(d)),
            verifier_data: material.verifier_data.as_ref().map(|vd| {
                let cbor = serde_cbor::to_vec(&[vd.val.clone(), vd.iat.clone()])
                    .unwrap_or_default();
                base64::engine::general_purpose::STANDARD.encode(cbor)
            }),
        };
        self.send_envelope(&envelope).await
    }

    /// Read and handle exactly one outer message. Returns `Ok(Some(frame))`
    /// for a decoded application frame, `Ok(None)` for handshake/control
    /// traffic that was fully handled here, and `Err` for a fatal
    /// handshake/crypto failure that should tear the connection down.
    pub async fn recv(&mut self) -> Option<Result<Option<Frame>>> {
        let bytes = self.transport.recv().await?;
        self.last_activity = Instant::now();

        let envelope: Envelope = match serde_cbor::from_slice(&bytes) {
            Ok(e) => e,
            Err(e) => return Some(Err(TunnelError::MalformedFrame(e.to_string()))),
        };

        match envelope {
            Envelope::ClientKx { sealed_symmetric_key } => {
                if self.symmetric_key.is_some() {
                    warn!("duplicate client_kx confirm on socket, dropping");
                    return Some(Ok(None));
                }
                let sealed = match base64::engine::general_purpose::STANDARD
                    .decode(sealed_symmetric_key)
                {
                    Ok(s) => s,
                    Err(e) => return Some(Err(TunnelError::MalformedFrame(e.to_string()))),
                };
                match self.keypair.unseal_symmetric_key(&sealed) {
                    Ok(key) => {
                        self.symmetric_key = Some(key);
                        self.state = State::Established;
                        Some(Ok(None))
                    }
                    Err(e) => Some(Err(e)),
                }
            }
            Envelope::Enc { nonce, ciphertext } => {
                if self.state != State::Established {
                    warn!("enc frame before handshake established, dropping");
                    return Some(Ok(None));
                }
                let Some(key) = self.symmetric_key else {
                    return Some(Err(TunnelError::SymmetricKeyMissing));
                };
                let plaintext = match crypto::decrypt(&key, &nonce, &ciphertext) {
                    Ok(p) => p,
                    Err(e) => return Some(Err(e)),
                };
                match serde_cbor::from_slice::<Frame>(&plaintext) {
                    Ok(frame) => Some(Ok(Some(frame))),
                    Err(e) => Some(Err(TunnelError::MalformedFrame(e.to_string()))),
                }
            }
            Envelope::ServerKx { .. } => {
                warn!("server_kx received on server side, dropping");
                Some(Ok(None))
            }
        }
    }

    /// Encrypt and send an application frame. Fails if the handshake
    /// hasn't completed.
    pub async fn send(&mut self, frame: &Frame) -> Result<()> {
        let Some(key) = self.symmetric_key else {
            return Err(TunnelError::SymmetricKeyMissing);
        };
        let plaintext = serde_cbor::to_vec(frame)
            .map_err(|e| TunnelError::MalformedFrame(e.to_string()))?;
        let (nonce, ciphertext) = crypto::encrypt(&key, &plaintext);
        let envelope = Envelope::Enc {
            nonce: serde_bytes::ByteBuf::from(nonce),
            ciphertext: serde_bytes::ByteBuf::from(ciphertext),
        };
        self.send_envelope(&envelope).await
    }

    async fn send_envelope(&mut self, envelope: &Envelope) -> Result<()> {
        let bytes = serde_cbor::to_vec(envelope)
            .map_err(|e| TunnelError::MalformedFrame(e.to_string()))?;
        if self.transport.send(bytes).await {
            Ok(())
        } else {
            Err(TunnelError::TunnelDisconnected)
        }
    }

    pub fn is_established(&self) -> bool {
        self.state == State::Established
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.keypair.public_bytes()
    }

    pub fn is_stale(&self, heartbeat_timeout: Duration) -> bool {
        self.last_activity.elapsed() > heartbeat_timeout
    }

    pub fn close(&mut self) {
        self.state = State::Closed;
        self.symmetric_key = None;
        self.transport.close();
    }
}
