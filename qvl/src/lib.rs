//! Parses and cryptographically verifies Intel SGX (v3) and Intel TDX
//! (v4, v5) DCAP attestation quotes.
//!
//! This crate does no I/O of its own: verification is a pure function over
//! a byte slice and a [`VerifyConfig`] the caller assembles (pinned roots,
//! CRLs, the point in time to check validity against, and an optional TCB
//! freshness hook). That keeps it usable both from a running client and
//! from test harnesses that want to replay recorded quotes.

mod chain;
mod crl;
mod error;
mod framing;
mod x509;
mod verifier;

pub use error::{Result, VerifyError};
pub use framing::{parse, Body, Header, Quote, SgxBody, Signature, TdxBodyV4, TdxBodyV5};
pub use verifier::{verify_sgx, verify_tdx, TcbInput, VerifyConfig};
