//! Orchestrates framing, X.509/CRL primitives and chain verification into
//! the end-to-end TDX/SGX quote verification algorithm.

use sha2::{Digest, Sha256};

use crate::chain::{verify_chain, ChainStatus};
use crate::error::VerifyError;
use crate::framing::{self, Body, Quote};
use crate::x509::{parse_pem_chain, Certificate};

const TEE_TYPE_SGX: u32 = 0;
const TEE_TYPE_TDX: u32 = 129;
const ATT_KEY_TYPE_ECDSA_P256: u16 = 2;
const CERT_DATA_TYPE_PCK_CHAIN: u16 = 5;

/// Input to the caller-supplied TCB evaluation hook (step 9 of §4.D).
pub struct TcbInput<'a> {
    pub fmspc: Option<[u8; 6]>,
    pub cpu_svn: &'a [u8],
    pub pce_svn: u16,
}

/// Configuration for `verify_tdx` / `verify_sgx`.
pub struct VerifyConfig<'a> {
    /// DER-encoded CRLs, checked against every cert in the chain.
    pub crls: Vec<Vec<u8>>,
    /// SHA-256 digests of trusted root certificates (DER), e.g. the Intel
    /// SGX Root CA. No default is built in — callers must supply at least
    /// one, matching the "injected immutable data, never a mutable
    /// singleton" design constraint.
    pub pinned_roots: Vec<[u8; 32]>,
    /// Point in time the chain's validity windows are checked against.
    /// Defaults to the current time; `None` skips the time check entirely.
    pub verify_time: Option<time::OffsetDateTime>,
    /// PEM cert chain to use when the quote's own `cert_data` is empty.
    pub extra_certdata: Option<Vec<u8>>,
    /// TCB freshness/status hook. Its result is ANDed into the overall
    /// verdict; `None` skips the check (treated as pass).
    pub verify_tcb: Option<&'a dyn Fn(&TcbInput<'_>) -> bool>,
}

impl<'a> Default for VerifyConfig<'a> {
    fn default() -> Self {
        VerifyConfig {
            crls: Vec::new(),
            pinned_roots: Vec::new(),
            verify_time: Some(time::OffsetDateTime::now_utc()),
            extra_certdata: None,
            verify_tcb: None,
        }
    }
}

/// Verify an Intel TDX (v4 or v5) DCAP quote.
pub fn verify_tdx(bytes: &[u8], config: &VerifyConfig<'_>) -> Result<(), VerifyError> {
    let quote = framing::parse(bytes)?;
    match quote.body {
        Body::Tdx10(_) | Body::Tdx15(_) => {}
        Body::Sgx(_) => return Err(VerifyError::UnsupportedTeeType(quote.header.tee_type)),
    }
    verify_common(&quote, config, TEE_TYPE_TDX)
}

/// Verify an Intel SGX (v3) DCAP quote.
pub fn verify_sgx(bytes: &[u8], config: &VerifyConfig<'_>) -> Result<(), VerifyError> {
    let quote = framing::parse(bytes)?;
    match quote.body {
        Body::Sgx(_) => {}
        Body::Tdx10(_) | Body::Tdx15(_) => {
            return Err(VerifyError::UnsupportedTeeType(quote.header.tee_type))
        }
    }
    verify_common(&quote, config, TEE_TYPE_SGX)
}


fn verify_common(
    quote: &Quote<'_>,
    config: &VerifyConfig<'_>,
    expected_tee_type: u32,
) -> Result<(), VerifyError> {
    // Step 2: extract PEM cert chain.
    let cert_data = if !quote.signature.cert_data.is_empty() {
        quote.signature.cert_data
    } else if let Some(extra) = &config.extra_certdata {
        extra.as_slice()
    } else {
        return Err(VerifyError::MissingCertData);
    };
    let der_certs = parse_pem_chain(cert_data)?;

    // Step 3: build and validate the chain.
    let chain = verify_chain(&der_certs, config.verify_time, &config.crls)?;
    match chain.status {
        ChainStatus::Expired => return Err(VerifyError::ExpiredCertChain),
        ChainStatus::Revoked => return Err(VerifyError::RevokedCertInChain),
        ChainStatus::Invalid => return Err(VerifyError::InvalidCertChain),
        ChainStatus::Valid => {}
    }

    // Step 4: pinned root membership.
    let root_digest: [u8; 32] = Sha256::digest(&chain.root).into();
    if !config.pinned_roots.contains(&root_digest) {
        return Err(VerifyError::InvalidRoot);
    }

    // Step 5: header checks.
    if quote.header.tee_type != expected_tee_type {
        return Err(VerifyError::UnsupportedTeeType(quote.header.tee_type));
    }
    if quote.header.att_key_type != ATT_KEY_TYPE_ECDSA_P256 {
        return Err(VerifyError::UnsupportedAttKeyType(quote.header.att_key_type));
    }
    if quote.signature.cert_data_type != CERT_DATA_TYPE_PCK_CHAIN {
        return Err(VerifyError::UnsupportedCertDataType(
            quote.signature.cert_data_type,
        ));
    }

    let leaf = Certificate::from_der(&chain.ordered_chain[0])?;

    // Step 6: QE report signature, under the PCK leaf's public key.
    verify_qe_report_signature(&leaf, &quote.signature.qe_report, &quote.signature.qe_report_signature)?;

    // Step 7: QE binding hash.
    verify_qe_binding(
        &quote.signature.attestation_public_key,
        quote.signature.qe_auth_data,
        &quote.signature.qe_report,
    )?;

    // Step 8: quote signature over the signed region.
    verify_quote_signature(
        &quote.signature.attestation_public_key,
        quote.signed_region,
        &quote.signature.ecdsa_signature,
    )?;

    // Step 9: caller-supplied TCB hook.
    if let Some(hook) = config.verify_tcb {
        let cpu_svn: &[u8] = match &quote.body {
            Body::Sgx(b) => &b.cpu_svn,
            Body::Tdx10(b) => &b.tee_tcb_svn,
            Body::Tdx15(b) => &b.v4.tee_tcb_svn,
        };
        let input = TcbInput {
            fmspc: leaf.fmspc(),
            cpu_svn,
            pce_svn: quote.header.pce_svn,
        };
        if !hook(&input) {
            return Err(VerifyError::TcbRejected);
        }
    }

    Ok(())
}

fn verify_qe_report_signature(
    leaf: &Certificate<'_>,
    qe_report: &[u8],
    qe_report_signature: &[u8; 64],
) -> Result<(), VerifyError> {
    use p256::ecdsa::{Signature, VerifyingKey};
    use signature::Verifier;

    let spki = leaf.public_key_spki();
    let key = VerifyingKey::from_sec1_bytes(spki).map_err(|_| VerifyError::InvalidQeReportSignature)?;

    // Intel's native encoding is raw r||s; DER is accepted as a fallback.
    if let Ok(sig) = Signature::try_from(qe_report_signature.as_slice()) {
        if key.verify(qe_report, &sig).is_ok() {
            return Ok(());
        }
    }
    if let Ok(sig) = Signature::from_der(qe_report_signature) {
        if key.verify(qe_report, &sig).is_ok() {
            return Ok(());
        }
    }
    Err(VerifyError::InvalidQeReportSignature)
}

/// `report_data` lives at bytes 320..384 of the 384-byte SGX REPORT; the
/// binding hash occupies its first 32 bytes (320..352), the remainder is
/// zero-padding.
fn verify_qe_binding(
    attestation_public_key: &[u8; 64],
    qe_auth_data: &[u8],
    qe_report: &[u8],
) -> Result<(), VerifyError> {
    if qe_report.len() != 384 {
        return Err(VerifyError::InvalidQeReportBinding);
    }
    let bound = &qe_report[320..352];

    let mut h1 = Sha256::new();
    h1.update(attestation_public_key);
    h1.update(qe_auth_data);
    let h1 = h1.finalize();

    let mut h2 = Sha256::new();
    h2.update([0x04]);
    h2.update(attestation_public_key);
    h2.update(qe_auth_data);
    let h2 = h2.finalize();

    if bound == h1.as_slice() || bound == h2.as_slice() {
        Ok(())
    } else {
        Err(VerifyError::InvalidQeReportBinding)
    }
}

fn verify_quote_signature(
    attestation_public_key: &[u8; 64],
    signed_region: &[u8],
    ecdsa_signature: &[u8; 64],
) -> Result<(), VerifyError> {
    use p256::ecdsa::{Signature, VerifyingKey};
    use p256::EncodedPoint;
    use signature::Verifier;

    let mut uncompressed = [0u8; 65];
    uncompressed[0] = 0x04;
    uncompressed[1..].copy_from_slice(attestation_public_key);
    let point = EncodedPoint::from_bytes(uncompressed).map_err(|_| VerifyError::InvalidQuoteSignature)?;
    let key = VerifyingKey::from_encoded_point(&point).map_err(|_| VerifyError::InvalidQuoteSignature)?;

    if let Ok(sig) = Signature::try_from(ecdsa_signature.as_slice()) {
        if key.verify(signed_region, &sig).is_ok() {
            return Ok(());
        }
    }
    if let Ok(sig) = Signature::from_der(ecdsa_signature) {
        if key.verify(signed_region, &sig).is_ok() {
            return Ok(());
        }
    }
    Err(VerifyError::InvalidQuoteSignature)
}
