//! Key exchange and envelope crypto: X25519 sealed-box key delivery plus
//! XSalsa20-Poly1305 ("secretbox") authenticated encryption for everything
//! after the handshake.

use crypto_box::aead::OsRng;
use crypto_box::{PublicKey as SealPublicKey, SalsaBox, SecretKey as SealSecretKey};
use rand_core::RngCore;
use sha2::{Digest, Sha512};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519Secret};
use xsalsa20poly1305::aead::{Aead, KeyInit};
use xsalsa20poly1305::{Key as SecretboxKey, Nonce as SecretboxNonce, XSalsa20Poly1305};

use crate::error::{Result, TunnelError};

pub const SYMMETRIC_KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 24;

/// The server's long-lived X25519 keypair; one per process, reused across
/// every outer connection and bound into the quote via `report_data`.
pub struct ServerKeypair {
    secret: X25519Secret,
    public: X25519PublicKey,
}

impl ServerKeypair {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        let secret = X25519Secret::from(bytes);
        let public = X25519PublicKey::from(&secret);
        ServerKeypair { secret, public }
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// Unseal a symmetric key the client sealed to `public_bytes()`.
    pub fn unseal_symmetric_key(&self, sealed: &[u8]) -> Result<[u8; SYMMETRIC_KEY_LEN]> {
        let seal_secret = SealSecretKey::from_bytes(self.secret.to_bytes());
        let plain = seal_secret
            .unseal(sealed)
            .map_err(|_| TunnelError::HandshakeFailed {
                reason: "failed to unseal symmetric key".to_string(),
            })?;
        plain
            .as_slice()
            .try_into()
            .map_err(|_| TunnelError::HandshakeFailed {
                reason: "sealed symmetric key had the wrong length".to_string(),
            })
    }
}

/// Generate a fresh random symmetric key and seal it to the server's
/// published X25519 public key.
pub fn generate_and_seal_symmetric_key(server_public: &[u8; 32]) -> (
    [u8; SYMMETRIC_KEY_LEN],
    Vec<u8>,
) {
    let mut key = [0u8; SYMMETRIC_KEY_LEN];
    OsRng.fill_bytes(&mut key);
    let recipient = SealPublicKey::from(*server_public);
    let sealed = recipient.seal(&mut OsRng, &key).expect("sealing to a valid key cannot fail");
    (key, sealed)
}

/// Compute the binding hash the server's quote `report_data` must contain:
/// SHA-512 of `verifier_data.val || verifier_data.iat || x25519_public_key`.
pub fn verifier_binding_hash(val: &[u8], iat: &[u8], x25519_public_key: &[u8; 32]) -> [u8; 64] {
    let mut hasher = Sha512::new();
    hasher.update(val);
    hasher.update(iat);
    hasher.update(x25519_public_key);
    hasher.finalize().into()
}

/// Encrypt `plaintext` with a fresh random 24-byte nonce, returning
/// `(nonce, ciphertext)` as required by the `enc` envelope.
pub fn encrypt(key: &[u8; SYMMETRIC_KEY_LEN], plaintext: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let cipher = XSalsa20Poly1305::new(SecretboxKey::from_slice(key));
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = SecretboxNonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .expect("secretbox encryption over a bounded plaintext cannot fail");
    (nonce_bytes.to_vec(), ciphertext)
}

pub fn decrypt(key: &[u8; SYMMETRIC_KEY_LEN], nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if nonce.len() != NONCE_LEN {
        return Err(TunnelError::MalformedFrame("nonce must be 24 bytes".to_string()));
    }
    let cipher = XSalsa20Poly1305::new(SecretboxKey::from_slice(key));
    cipher
        .decrypt(SecretboxNonce::from_slice(nonce), ciphertext)
        .map_err(|_| TunnelError::MalformedFrame("secretbox authentication failed".to_string()))
}
