//! Client half of the control channel handshake (§4.F): verify the
//! server's quote, generate and seal a symmetric key, and gate every
//! subsequent frame on `enc`.

use base64::Engine as _;
use tracing::warn;
use tunnel_shared::crypto::{self, generate_and_seal_symmetric_key};
use tunnel_shared::{Envelope, Frame, OuterTransport};

use crate::error::{quote_rejected, Result, TunnelError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingServerKx,
    Established,
    Closed,
}

pub struct ClientControlChannel<T: OuterTransport> {
    transport: T,
    state: State,
    symmetric_key: Option<[u8; crypto::SYMMETRIC_KEY_LEN]>,
}

impl<T: OuterTransport> ClientControlChannel<T> {
    pub fn new(transport: T) -> Self {
        ClientControlChannel {
            transport,
            state: State::AwaitingServerKx,
            symmetric_key: None,
        }
    }

    /// Wait for `server_kx`, verify the quote, and send `client_kx` back.
    /// Tears down (returns `Err`) on any handshake/crypto failure, per
    /// §7's "handshake and crypto failures tear the outer connection
    /// down".
    pub async fn handshake(&mut self, config: &qvl::VerifyConfig<'_>) -> Result<()> {
        let bytes = self
            .transport
            .recv()
            .await
            .ok_or(TunnelError::NotConnected)?;
        let envelope: Envelope = serde_cbor::from_slice(&bytes)
            .map_err(|e| TunnelError::MalformedFrame(e.to_string()))?;

        let Envelope::ServerKx {
            x25519_public_key,
            quote,
            runtime_data: _,
            verifier_data,
        } = envelope
        else {
            return Err(TunnelError::HandshakeFailed {
                reason: "expected server_kx as the first frame".to_string(),
            });
        };

        let server_public = decode_b64_array::<32>(&x25519_public_key)?;
        let quote_bytes = base64::engine::general_purpose::STANDARD
            .decode(&quote)
            .map_err(|e| TunnelError::MalformedFrame(e.to_string()))?;

        let parsed = qvl::parse(&quote_bytes).map_err(quote_rejected)?;
        let report_data = parsed.body.report_data();
        let is_sgx = matches!(parsed.body, qvl::Body::Sgx(_));
        drop(parsed);

        if is_sgx {
            qvl::verify_sgx(&quote_bytes, config).map_err(quote_rejected)?;
        } else {
            qvl::verify_tdx(&quote_bytes, config).map_err(quote_rejected)?;
        }

        if let Some(verifier_data_b64) = verifier_data {
            self.check_binding(&verifier_data_b64, &server_public, &report_data)?;
        }

        let (symmetric_key, sealed) = generate_and_seal_symmetric_key(&server_public);
        let confirm = Envelope::ClientKx {
            sealed_symmetric_key: base64::engine::general_purpose::STANDARD.encode(sealed),
        };
        let confirm_bytes =
            serde_cbor::to_vec(&confirm).map_err(|e| TunnelError::MalformedFrame(e.to_string()))?;
        if !self.transport.send(confirm_bytes).await {
            return Err(TunnelError::TunnelDisconnected);
        }

        self.symmetric_key = Some(symmetric_key);
        self.state = State::Established;
        Ok(())
    }

    fn check_binding(
        &self,
        verifier_data_b64: &str,
        server_public: &[u8; 32],
        report_data: &[u8; 64],
    ) -> Result<()> {
        let cbor = base64::engine::general_purpose::STANDARD
            .decode(verifier_data_b64)
            .map_err(|e| TunnelError::MalformedFrame(e.to_string()))?;
        let [val, iat]: [Vec<u8>; 2] = serde_cbor::from_slice(&cbor)
            .map_err(|e| TunnelError::MalformedFrame(e.to_string()))?;
        let expected = crypto::verifier_binding_hash(&val, &iat, server_public);
        // SHA-512 output is exactly 64 bytes, the same width as report_data,
        // so the binding hash occupies it in full rather than a prefix.
        if report_data == &expected {
            Ok(())
        } else {
            Err(TunnelError::HandshakeFailed {
                reason: "verifier-data binding hash mismatch".to_string(),
            })
        }
    }

    /// Read and decode exactly one application frame, dropping (with a
    /// warning) anything that isn't `enc`.
    pub async fn recv(&mut self) -> Option<Result<Frame>> {
        loop {
            let bytes = self.transport.recv().await?;
            let envelope: Envelope = match serde_cbor::from_slice(&bytes) {
                Ok(e) => e,
                Err(e) => return Some(Err(TunnelError::MalformedFrame(e.to_string()))),
            };
            match envelope {
                Envelope::Enc { nonce, ciphertext } => {
                    let Some(key) = self.symmetric_key else {
                        return Some(Err(TunnelError::SymmetricKeyMissing));
                    };
                    let plaintext = match crypto::decrypt(&key, &nonce, &ciphertext) {
                        Ok(p) => p,
                        Err(e) => return Some(Err(e)),
                    };
                    return Some(
                        serde_cbor::from_slice(&plaintext)
                            .map_err(|e| TunnelError::MalformedFrame(e.to_string())),
                    );
                }
                _ => {
                    warn!("dropping non-enc frame on established client channel");
                    continue;
                }
            }
        }
    }

    pub async fn send(&mut self, frame: &Frame) -> Result<()> {
        let Some(key) = self.symmetric_key else {
            return Err(TunnelError::SymmetricKeyMissing);
        };
        let plaintext =
            serde_cbor::to_vec(frame).map_err(|e| TunnelError::MalformedFrame(e.to_string()))?;
        let (nonce, ciphertext) = crypto::encrypt(&key, &plaintext);
        let envelope = Envelope::Enc {
            nonce: serde_bytes::ByteBuf::from(nonce),
            ciphertext: serde_bytes::ByteBuf::from(ciphertext),
        };
        let bytes =
            serde_cbor::to_vec(&envelope).map_err(|e| TunnelError::MalformedFrame(e.to_string()))?;
        if self.transport.send(bytes).await {
            Ok(())
        } else {
            Err(TunnelError::TunnelDisconnected)
        }
    }

    pub fn is_established(&self) -> bool {
        self.state == State::Established
    }

    pub fn close(&mut self) {
        self.state = State::Closed;
        self.symmetric_key = None;
        self.transport.close();
    }
}

fn decode_b64_array<const N: usize>(b64: &str) -> Result<[u8; N]> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(b64)
        .map_err(|e| TunnelError::MalformedFrame(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| TunnelError::MalformedFrame(format!("expected {N} bytes")))
}
