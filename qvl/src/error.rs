//! Error taxonomy for quote parsing and verification.

use thiserror::Error;

/// Everything that can go wrong while decoding or verifying a DCAP quote.
#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("malformed quote at offset {offset}, field `{field}`")]
    MalformedQuote { offset: usize, field: &'static str },

    #[error("unsupported quote version {0}")]
    UnsupportedVersion(u16),

    #[error("unsupported tee type {0}")]
    UnsupportedTeeType(u32),

    #[error("unsupported attestation key type {0}")]
    UnsupportedAttKeyType(u16),

    #[error("unsupported cert data type {0}")]
    UnsupportedCertDataType(u16),

    #[error("missing cert data")]
    MissingCertData,

    #[error("invalid cert chain")]
    InvalidCertChain,

    #[error("invalid root")]
    InvalidRoot,

    #[error("expired cert chain, or not yet valid")]
    ExpiredCertChain,

    #[error("revoked certificate in cert chain")]
    RevokedCertInChain,

    #[error("invalid qe report signature")]
    InvalidQeReportSignature,

    #[error("invalid qe report binding")]
    InvalidQeReportBinding,

    #[error("invalid signature over quote")]
    InvalidQuoteSignature,

    #[error("tcb status rejected")]
    TcbRejected,
}

pub type Result<T> = core::result::Result<T, VerifyError>;
