//! Client-side error handling: the tunnel taxonomy from `tunnel-shared`,
//! plus the glue that turns a `qvl::VerifyError` into a `QuoteRejected`.

pub use tunnel_shared::error::{Result, TunnelError};

pub fn quote_rejected(err: qvl::VerifyError) -> TunnelError {
    TunnelError::QuoteRejected(err.to_string())
}
