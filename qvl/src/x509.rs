//! Minimal X.509 accessors used by the PCK chain verifier.
//!
//! Wraps `x509-parser` rather than re-implementing ASN.1 DER parsing; we only
//! need a handful of fields (subject/issuer, validity window, SPKI, the CA
//! basic constraint) and a DER-or-raw ECDSA verification fallback, since PCK
//! certs from different Intel PCS deployments have been observed to encode
//! signatures both ways.

use asn1_rs::FromDer;
use p256::ecdsa::{Signature as P256Signature, VerifyingKey as P256VerifyingKey};
use p384::ecdsa::{Signature as P384Signature, VerifyingKey as P384VerifyingKey};
use p521::ecdsa::{Signature as P521Signature, VerifyingKey as P521VerifyingKey};
use signature::Verifier as _;
use x509_parser::prelude::*;

use crate::error::VerifyError;

/// A parsed certificate, borrowing from the DER bytes it was built from.
pub struct Certificate<'a> {
    der: &'a [u8],
    parsed: X509Certificate<'a>,
}

impl<'a> Certificate<'a> {
    /// Parse a single DER-encoded certificate.
    pub fn from_der(der: &'a [u8]) -> Result<Self, VerifyError> {
        let (_, parsed) = X509Certificate::from_der(der).map_err(|_| VerifyError::InvalidCertChain)?;
        Ok(Certificate { der, parsed })
    }

    pub fn der(&self) -> &'a [u8] {
        self.der
    }

    pub fn subject(&self) -> String {
        canonical_name(self.parsed.subject())
    }

    pub fn issuer(&self) -> String {
        canonical_name(self.parsed.issuer())
    }

    /// Uppercase-hex serial number with leading zeros stripped (but at least
    /// one digit kept), so CRL entries and cert serials compare equal
    /// regardless of DER sign-byte padding.
    pub fn serial_number(&self) -> String {
        normalize_serial_hex(&hex::encode_upper(self.parsed.tbs_certificate.raw_serial()))
    }

    pub fn is_time_valid(&self, now: time::OffsetDateTime) -> bool {
        let validity = self.parsed.validity();
        let not_before = validity.not_before.to_datetime();
        let not_after = validity.not_after.to_datetime();
        now >= not_before && now <= not_after
    }

    pub fn is_ca(&self) -> bool {
        matches!(
            self.parsed.basic_constraints(),
            Ok(Some(bc)) if bc.value.ca
        )
    }

    pub fn path_length(&self) -> Option<u32> {
        match self.parsed.basic_constraints() {
            Ok(Some(bc)) => bc.value.path_len_constraint,
            _ => None,
        }
    }

    fn spki_bytes(&self) -> &[u8] {
        self.parsed
            .tbs_certificate
            .subject_pki
            .subject_public_key
            .as_ref()
    }

    /// Raw SPKI `subjectPublicKey` bytes (SEC1-encoded point for EC keys).
    pub fn public_key_spki(&self) -> &[u8] {
        self.spki_bytes()
    }

    fn signature_alg_oid(&self) -> String {
        self.parsed.signature_algorithm.algorithm.to_id_string()
    }

    /// Verify that `issuer` signed this certificate.
    ///
    /// Tries DER-encoded ECDSA signatures first (the standard X.509
    /// encoding), falling back to fixed-size raw `r || s` since some PCK
    /// cert issuers in the wild have been seen emitting the latter.
    pub fn verify(&self, issuer: &Certificate<'_>) -> Result<(), VerifyError> {
        let tbs = self.parsed.tbs_certificate.as_ref();
        let sig = self.parsed.signature_value.as_ref();
        let spki = issuer.spki_bytes();
        let alg = self.signature_alg_oid();

        let ok = match alg.as_str() {
            // ecdsa-with-SHA256
            "1.2.840.10045.4.3.2" => verify_p256(spki, tbs, sig),
            // ecdsa-with-SHA384
            "1.2.840.10045.4.3.3" => verify_p384(spki, tbs, sig),
            // ecdsa-with-SHA512 (used here for P-521 signatures)
            "1.2.840.10045.4.3.4" => verify_p521(spki, tbs, sig),
            _ => false,
        };

        if ok {
            Ok(())
        } else {
            Err(VerifyError::InvalidCertChain)
        }
    }
}

macro_rules! impl_curve_verify {
    ($name:ident, $verifying_key:ty, $signature:ty) => {
        fn $name(spki: &[u8], tbs: &[u8], sig: &[u8]) -> bool {
            let Ok(key) = <$verifying_key>::from_sec1_bytes(spki) else {
                return false;
            };
            if let Ok(signature) = <$signature>::from_der(sig) {
                if key.verify(tbs, &signature).is_ok() {
                    return true;
                }
            }
            if let Ok(signature) = <$signature>::try_from(sig) {
                if key.verify(tbs, &signature).is_ok() {
                    return true;
                }
            }
            false
        }
    };
}

impl_curve_verify!(verify_p256, P256VerifyingKey, P256Signature);
impl_curve_verify!(verify_p384, P384VerifyingKey, P384Signature);
impl_curve_verify!(verify_p521, P521VerifyingKey, P521Signature);

const SGX_EXTENSION_OID: &str = "1.2.840.113741.1.13.1";
const SGX_FMSPC_OID: &str = "1.2.840.113741.1.13.1.4";

impl<'a> Certificate<'a> {
    /// Extract the 6-byte FMSPC from the Intel SGX extension
    /// (`1.2.840.113741.1.13.1`), a SEQUENCE of `SEQUENCE { OID, ANY }`
    /// pairs, one of which (`...13.1.4`) holds the FMSPC as an OCTET
    /// STRING.
    pub fn fmspc(&self) -> Option<[u8; 6]> {
        let ext = self
            .parsed
            .extensions()
            .iter()
            .find(|e| e.oid.to_id_string() == SGX_EXTENSION_OID)?;
        let (_, seq) = asn1_rs::Sequence::from_der(ext.value).ok()?;
        let mut reader = seq.content.as_ref();
        while !reader.is_empty() {
            let (rest, inner) = asn1_rs::Sequence::from_der(reader).ok()?;
            reader = rest;
            let mut inner_content = inner.content.as_ref();
            let (rest2, oid) = asn1_rs::Oid::from_der(inner_content).ok()?;
            inner_content = rest2;
            if oid.to_id_string() == SGX_FMSPC_OID {
                let (_, octets) = asn1_rs::OctetString::from_der(inner_content).ok()?;
                let bytes: &[u8] = octets.as_ref();
                if bytes.len() == 6 {
                    let mut out = [0u8; 6];
                    out.copy_from_slice(bytes);
                    return Some(out);
                }
            }
        }
        None
    }
}

/// RDN type=value pairs joined by commas, in the order the name encodes
/// them. Used instead of `x509-parser`'s `Display` impl so subject/issuer
/// strings compare reliably across the handful of OIDs PCK certs use.
fn canonical_name(name: &X509Name<'_>) -> String {
    name.iter_rdn()
        .flat_map(|rdn| rdn.iter())
        .map(|attr| {
            let ty = attr.attr_type().to_id_string();
            let value = attr
                .attr_value()
                .as_str()
                .map(|s| s.to_string())
                .unwrap_or_else(|_| hex::encode(attr.attr_value().data.as_ref()));
            format!("{ty}={value}")
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Strip non-hex characters, uppercase, and remove leading zeros down to a
/// single digit (used for both cert serials and CRL revoked-serial entries
/// so the two always compare equal for the same logical serial number).
pub(crate) fn normalize_serial_hex(raw: &str) -> String {
    let stripped: String = raw
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let trimmed = stripped.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Parse a chain of PEM-encoded certificates, in file order.
pub fn parse_pem_chain(pem_bytes: &[u8]) -> Result<Vec<Vec<u8>>, VerifyError> {
    let mut ders = Vec::new();
    let mut reader = pem_bytes;
    loop {
        match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(rustls_pemfile::Item::X509Certificate(der))) => ders.push(der.to_vec()),
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(_) => return Err(VerifyError::InvalidCertChain),
        }
    }
    if ders.is_empty() {
        Err(VerifyError::MissingCertData)
    } else {
        Ok(ders)
    }
}

/// A real (openssl-generated) P-256 leaf/intermediate/root chain plus a CRL
/// revoking the leaf's serial, shared by `x509`'s and `chain`'s test
/// modules so chain-building and signature verification get exercised
/// against genuine ECDSA signatures rather than zeroed fixtures.
#[cfg(test)]
pub(crate) mod fixtures {
    pub const ROOT_PEM: &str = "-----BEGIN CERTIFICATE-----
MIIBfTCCASOgAwIBAgIUBwrCcrFFj8CEL3vIla/Vn8LpxuYwCgYIKoZIzj0EAwIw
GzEZMBcGA1UEAwwQVGVzdCBQQ0sgUm9vdCBDQTAeFw0yNjA3MjgwNzA1MzlaFw0z
NjA3MjUwNzA1MzlaMBsxGTAXBgNVBAMMEFRlc3QgUENLIFJvb3QgQ0EwWTATBgcq
hkjOPQIBBggqhkjOPQMBBwNCAAQE6dABc89EzHEtn25Yv/h3K63ylOST95dDgNPU
ISSCTFwu8oqSw0g3XOlIWfS5/PVvksNYuZ9UPHT2xHwFhX66o0UwQzASBgNVHRMB
Af8ECDAGAQH/AgEBMA4GA1UdDwEB/wQEAwIBBjAdBgNVHQ4EFgQUOXoJ7NqRzDNC
147yo4z7sV/FCwMwCgYIKoZIzj0EAwIDSAAwRQIgaVYuELBtFUpGenB0y6UoEO3R
3hy1Q8BxsU5RyUSrxUoCIQDRXp5PILY6782D9ExQWHYOt0l7XcP5CAch4MIiR8IL
yg==
-----END CERTIFICATE-----
";

    pub const INTERMEDIATE_PEM: &str = "-----BEGIN CERTIFICATE-----
MIIBpjCCAUygAwIBAgIUQSCY/USdIsyX2tTyLt8/te3VNIAwCgYIKoZIzj0EAwIw
GzEZMBcGA1UEAwwQVGVzdCBQQ0sgUm9vdCBDQTAeFw0yNjA3MjgwNzA1MzlaFw0y
OTA0MjMwNzA1MzlaMCMxITAfBgNVBAMMGFRlc3QgUENLIEludGVybWVkaWF0ZSBD
QTBZMBMGByqGSM49AgEGCCqGSM49AwEHA0IABPTbQdw0p8KTscASHiuteyjZ/h9h
+7jrq+m5j1KPTUdzWQwBnsvJD5SlKzNk+MC5l/pmX3KpxMo2rJ42ccYBxOajZjBk
MBIGA1UdEwEB/wQIMAYBAf8CAQAwDgYDVR0PAQH/BAQDAgEGMB0GA1UdDgQWBBSz
AhPkX68c9p0ouvMrDLioWDPhPTAfBgNVHSMEGDAWgBQ5egns2pHMM0LXjvKjjPux
X8ULAzAKBggqhkjOPQQDAgNIADBFAiA32aTA5c8YpcV6DifLZCv8yr+WAoMziNYm
6nEzVWFkKQIhAP25zbJG0tgYhY8vk7xh512PrtAHfrRhUvvHjQeaG28v
-----END CERTIFICATE-----
";

    pub const LEAF_PEM: &str = "-----BEGIN CERTIFICATE-----
MIIBnTCCAUOgAwIBAgIUIs6HsK78I66hhxfEMof9K8xWyjQwCgYIKoZIzj0EAwIw
IzEhMB8GA1UEAwwYVGVzdCBQQ0sgSW50ZXJtZWRpYXRlIENBMB4XDTI2MDcyODA3
MDU0MFoXDTI3MDcyODA3MDU0MFowGDEWMBQGA1UEAwwNVGVzdCBQQ0sgTGVhZjBZ
MBMGByqGSM49AgEGCCqGSM49AwEHA0IABHoUOEsKX8wTKdxQRpY9ekxcFuWP0ZUG
sR4KVVKnbUz84Mt9dXXqr5onUFNBQ6kLhju7RK57h9Hdlkq6uuRJMEajYDBeMAwG
A1UdEwEB/wQCMAAwDgYDVR0PAQH/BAQDAgeAMB0GA1UdDgQWBBQ64U7YW4zPERaB
+/owySRQPdrMAjAfBgNVHSMEGDAWgBSzAhPkX68c9p0ouvMrDLioWDPhPTAKBggq
hkjOPQQDAgNIADBFAiEAogSYRTVAYNFW0GFd/nGMRDQ8L3ZMHnczZ2UN8npwsq4C
IF59M8NcQysaE7C9AC9D4U8FTUMv/l3nb6rmSh63Po5N
-----END CERTIFICATE-----
";

    /// DER-encoded `CertificateList` revoking `LEAF_PEM`'s serial
    /// (`22CE87B0AEFC23AEA18717C43287FD2BCC56CA34`), issued by the
    /// intermediate.
    pub const LEAF_REVOKED_CRL_DER: &[u8] = &[
        0x30, 0x81, 0xe5, 0x30, 0x81, 0x8c, 0x02, 0x01, 0x01, 0x30, 0x0a, 0x06, 0x08, 0x2a, 0x86,
        0x48, 0xce, 0x3d, 0x04, 0x03, 0x02, 0x30, 0x23, 0x31, 0x21, 0x30, 0x1f, 0x06, 0x03, 0x55,
        0x04, 0x03, 0x0c, 0x18, 0x54, 0x65, 0x73, 0x74, 0x20, 0x50, 0x43, 0x4b, 0x20, 0x49, 0x6e,
        0x74, 0x65, 0x72, 0x6d, 0x65, 0x64, 0x69, 0x61, 0x74, 0x65, 0x20, 0x43, 0x41, 0x17, 0x0d,
        0x32, 0x36, 0x30, 0x37, 0x32, 0x38, 0x30, 0x37, 0x30, 0x35, 0x34, 0x36, 0x5a, 0x17, 0x0d,
        0x32, 0x36, 0x30, 0x38, 0x32, 0x37, 0x30, 0x37, 0x30, 0x35, 0x34, 0x36, 0x5a, 0x30, 0x2f,
        0x30, 0x2d, 0x02, 0x14, 0x22, 0xce, 0x87, 0xb0, 0xae, 0xfc, 0x23, 0xae, 0xa1, 0x87, 0x17,
        0xc4, 0x32, 0x87, 0xfd, 0x2b, 0xcc, 0x56, 0xca, 0x34, 0x17, 0x0d, 0x32, 0x36, 0x30, 0x37,
        0x32, 0x38, 0x30, 0x37, 0x30, 0x35, 0x34, 0x36, 0x5a, 0xa0, 0x0f, 0x30, 0x0d, 0x30, 0x0b,
        0x06, 0x03, 0x55, 0x1d, 0x14, 0x04, 0x04, 0x02, 0x02, 0x10, 0x00, 0x30, 0x0a, 0x06, 0x08,
        0x2a, 0x86, 0x48, 0xce, 0x3d, 0x04, 0x03, 0x02, 0x03, 0x48, 0x00, 0x30, 0x45, 0x02, 0x21,
        0x00, 0x9d, 0x04, 0xf9, 0xed, 0x43, 0x05, 0x0c, 0x85, 0xf9, 0x68, 0x01, 0xd9, 0x61, 0x6b,
        0xc0, 0xcb, 0x72, 0xc8, 0x02, 0xd5, 0xc8, 0x84, 0x37, 0xce, 0x26, 0x53, 0x32, 0xd0, 0xde,
        0x28, 0xbc, 0x89, 0x02, 0x20, 0x14, 0x7f, 0xa5, 0x87, 0x1d, 0xaa, 0xd6, 0x4a, 0x83, 0x8c,
        0xe7, 0x67, 0xbd, 0x05, 0x5f, 0xea, 0x3e, 0xd7, 0x3a, 0xc7, 0xd3, 0x3a, 0x48, 0x08, 0x1a,
        0xc4, 0xfe, 0x02, 0x25, 0xf3, 0x95, 0x3e,
    ];

    pub const LEAF_SERIAL_NORMALIZED: &str = "22CE87B0AEFC23AEA18717C43287FD2BCC56CA34";

    pub fn chain_pem() -> Vec<u8> {
        format!("{LEAF_PEM}{INTERMEDIATE_PEM}{ROOT_PEM}").into_bytes()
    }
}
