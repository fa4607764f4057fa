//! External collaborator: whatever loads/produces the server's attestation
//! quote. The tunnel only needs quote bytes bound to its X25519 public key;
//! how those bytes are obtained (a vendor attestation agent, a cached file,
//! a mock for tests) is out of scope here.

use async_trait::async_trait;

/// Optional binding metadata alongside the quote itself (§4.F): if present,
/// the client recomputes the verifier binding hash and checks it against
/// the quote's `report_data`.
pub struct VerifierData {
    pub val: Vec<u8>,
    pub iat: Vec<u8>,
}

pub struct QuoteMaterial {
    pub quote: Vec<u8>,
    pub runtime_data: Option<Vec<u8>>,
    pub verifier_data: Option<VerifierData>,
}

#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Produce (or fetch) a quote binding `x25519_public_key` into its
    /// `report_data`.
    async fn produce_quote(&self, x25519_public_key: &[u8; 32]) -> QuoteMaterial;
}

#[cfg(test)]
pub struct StaticQuoteSource {
    pub quote: Vec<u8>,
}

#[cfg(test)]
#[async_trait]
impl QuoteSource for StaticQuoteSource {
    async fn produce_quote(&self, _x25519_public_key: &[u8; 32]) -> QuoteMaterial {
        QuoteMaterial {
            quote: self.quote.clone(),
            runtime_data: None,
            verifier_data: None,
        }
    }
}
