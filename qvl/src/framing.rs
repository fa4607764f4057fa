//! Fixed-offset decoders for the DCAP quote wire format.
//!
//! All multi-byte integers are little-endian. Parsing never allocates beyond
//! what's needed to produce fixed-size arrays; everything else borrows from
//! the input slice.

use crate::error::VerifyError;

const HEADER_LEN: usize = 48;
const SGX_BODY_LEN: usize = 384;
const TDX_BODY_V4_LEN: usize = 584;
const TDX_BODY_V5_EXTRA_LEN: usize = 64; // tee_tcb_svn_2 (16) + mr_service_td (48)
const QE_REPORT_LEN: usize = 384;

/// A small cursor over a byte slice that reads fixed-size chunks, tracking
/// the offset so parse failures can report where they happened.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8], VerifyError> {
        if self.bytes.len() < self.pos + n {
            return Err(VerifyError::MalformedQuote {
                offset: self.pos,
                field,
            });
        }
        let out = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn take_array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], VerifyError> {
        let slice = self.take(N, field)?;
        Ok(slice.try_into().expect("slice length checked above"))
    }

    fn take_u16(&mut self, field: &'static str) -> Result<u16, VerifyError> {
        Ok(u16::from_le_bytes(self.take_array(field)?))
    }

    fn take_u32(&mut self, field: &'static str) -> Result<u32, VerifyError> {
        Ok(u32::from_le_bytes(self.take_array(field)?))
    }
}

/// Quote header, 48 bytes, common to SGX and TDX quotes of every version.
#[derive(Debug, Clone)]
pub struct Header {
    pub version: u16,
    pub att_key_type: u16,
    pub tee_type: u32,
    pub qe_svn: u16,
    pub pce_svn: u16,
    pub qe_vendor_id: [u8; 16],
    /// Retained for callers that bind to it; unused by the verifier itself.
    pub user_data: [u8; 20],
}

impl Header {
    fn parse(c: &mut Cursor<'_>) -> Result<Self, VerifyError> {
        Ok(Header {
            version: c.take_u16("header.version")?,
            att_key_type: c.take_u16("header.att_key_type")?,
            tee_type: c.take_u32("header.tee_type")?,
            qe_svn: c.take_u16("header.qe_svn")?,
            pce_svn: c.take_u16("header.pce_svn")?,
            qe_vendor_id: c.take_array("header.qe_vendor_id")?,
            user_data: c.take_array("header.user_data")?,
        })
    }
}

/// SGX enclave report body, 384 bytes.
#[derive(Debug, Clone)]
pub struct SgxBody {
    pub cpu_svn: [u8; 16],
    pub misc_select: u32,
    pub attributes: [u8; 16],
    pub mr_enclave: [u8; 32],
    pub mr_signer: [u8; 32],
    pub isv_prod_id: u16,
    pub isv_svn: u16,
    pub report_data: [u8; 64],
}

impl SgxBody {
    fn parse(c: &mut Cursor<'_>) -> Result<Self, VerifyError> {
        let cpu_svn = c.take_array("sgx_body.cpu_svn")?;
        let misc_select = c.take_u32("sgx_body.misc_select")?;
        let _reserved1: [u8; 28] = c.take_array("sgx_body.reserved1")?;
        let attributes = c.take_array("sgx_body.attributes")?;
        let mr_enclave = c.take_array("sgx_body.mr_enclave")?;
        let _reserved2: [u8; 32] = c.take_array("sgx_body.reserved2")?;
        let mr_signer = c.take_array("sgx_body.mr_signer")?;
        let _reserved3: [u8; 96] = c.take_array("sgx_body.reserved3")?;
        let isv_prod_id = c.take_u16("sgx_body.isv_prod_id")?;
        let isv_svn = c.take_u16("sgx_body.isv_svn")?;
        let _reserved4: [u8; 60] = c.take_array("sgx_body.reserved4")?;
        let report_data = c.take_array("sgx_body.report_data")?;
        Ok(SgxBody {
            cpu_svn,
            misc_select,
            attributes,
            mr_enclave,
            mr_signer,
            isv_prod_id,
            isv_svn,
            report_data,
        })
    }
}

/// The common TDX 1.0 body fields, present (as a prefix) in both v4 and v5
/// quote bodies.
#[derive(Debug, Clone)]
pub struct TdxBodyV4 {
    pub tee_tcb_svn: [u8; 16],
    pub mr_seam: [u8; 48],
    pub mr_seam_signer: [u8; 48],
    pub seam_attributes: [u8; 8],
    pub td_attributes: [u8; 8],
    pub xfam: [u8; 8],
    pub mr_td: [u8; 48],
    pub mr_config_id: [u8; 48],
    pub mr_owner: [u8; 48],
    pub mr_owner_config: [u8; 48],
    pub rtmr0: [u8; 48],
    pub rtmr1: [u8; 48],
    pub rtmr2: [u8; 48],
    pub rtmr3: [u8; 48],
    pub report_data: [u8; 64],
}

impl TdxBodyV4 {
    fn parse(c: &mut Cursor<'_>) -> Result<Self, VerifyError> {
        Ok(TdxBodyV4 {
            tee_tcb_svn: c.take_array("tdx_body.tee_tcb_svn")?,
            mr_seam: c.take_array("tdx_body.mr_seam")?,
            mr_seam_signer: c.take_array("tdx_body.mr_seam_signer")?,
            seam_attributes: c.take_array("tdx_body.seam_attributes")?,
            td_attributes: c.take_array("tdx_body.td_attributes")?,
            xfam: c.take_array("tdx_body.xfam")?,
            mr_td: c.take_array("tdx_body.mr_td")?,
            mr_config_id: c.take_array("tdx_body.mr_config_id")?,
            mr_owner: c.take_array("tdx_body.mr_owner")?,
            mr_owner_config: c.take_array("tdx_body.mr_owner_config")?,
            rtmr0: c.take_array("tdx_body.rtmr0")?,
            rtmr1: c.take_array("tdx_body.rtmr1")?,
            rtmr2: c.take_array("tdx_body.rtmr2")?,
            rtmr3: c.take_array("tdx_body.rtmr3")?,
            report_data: c.take_array("tdx_body.report_data")?,
        })
    }
}

/// TDX 1.5 body: the v4 body plus two extra fields.
#[derive(Debug, Clone)]
pub struct TdxBodyV5 {
    pub v4: TdxBodyV4,
    pub tee_tcb_svn_2: [u8; 16],
    pub mr_service_td: [u8; 48],
}

#[derive(Debug, Clone)]
pub enum Body {
    Sgx(SgxBody),
    Tdx10(TdxBodyV4),
    Tdx15(TdxBodyV5),
}

impl Body {
    /// The 64-byte `report_data` field, present in every body variant.
    pub fn report_data(&self) -> [u8; 64] {
        match self {
            Body::Sgx(b) => b.report_data,
            Body::Tdx10(b) => b.report_data,
            Body::Tdx15(b) => b.v4.report_data,
        }
    }
}

/// The ECDSA signature section that follows the quote body.
///
/// Follows Intel's DCAP nested Certification Data layout: the certification
/// data attached directly to the quote signature is Type 6 ("QE Report
/// Certification Data"), itself wrapping the QE report/signature/auth-data
/// plus a nested Certification Data of Type 5 (PCK cert chain PEM), which is
/// what `cert_data` exposes here.
#[derive(Debug, Clone)]
pub struct Signature<'a> {
    pub ecdsa_signature: [u8; 64],
    pub attestation_public_key: [u8; 64],
    pub qe_report: [u8; QE_REPORT_LEN],
    pub qe_report_signature: [u8; 64],
    pub qe_auth_data: &'a [u8],
    pub cert_data_type: u16,
    pub cert_data: &'a [u8],
}

/// A fully decoded quote and the exact byte range that its top-level
/// signature was computed over.
#[derive(Debug, Clone)]
pub struct Quote<'a> {
    pub header: Header,
    pub body: Body,
    pub signature: Signature<'a>,
    /// `header || body` (v4) or `header || body_descriptor || body` (v5),
    /// i.e. exactly what `signature.ecdsa_signature` covers.
    pub signed_region: &'a [u8],
}

/// Parse a DCAP quote of any supported version (3, 4 or 5) from raw bytes.
pub fn parse(bytes: &[u8]) -> Result<Quote<'_>, VerifyError> {
    let mut header_cursor = Cursor::new(bytes);
    let header = Header::parse(&mut header_cursor)?;

    let (body, body_end) = match header.version {
        3 => {
            let mut c = Cursor::new(&bytes[HEADER_LEN..]);
            let body = SgxBody::parse(&mut c)?;
            (Body::Sgx(body), HEADER_LEN + SGX_BODY_LEN)
        }
        4 => {
            let mut c = Cursor::new(&bytes[HEADER_LEN..]);
            let body = TdxBodyV4::parse(&mut c)?;
            (Body::Tdx10(body), HEADER_LEN + TDX_BODY_V4_LEN)
        }
        5 => {
            if bytes.len() < HEADER_LEN + 6 {
                return Err(VerifyError::MalformedQuote {
                    offset: HEADER_LEN,
                    field: "body_descriptor",
                });
            }
            let mut desc_cursor = Cursor::new(&bytes[HEADER_LEN..]);
            let body_type = desc_cursor.take_u16("body_descriptor.type")?;
            let _body_size = desc_cursor.take_u32("body_descriptor.size")?;
            let body_start = HEADER_LEN + 6;
            match body_type {
                2 => {
                    let mut c = Cursor::new(&bytes[body_start..]);
                    let body = TdxBodyV4::parse(&mut c)?;
                    (Body::Tdx10(body), body_start + TDX_BODY_V4_LEN)
                }
                3 => {
                    let mut c = Cursor::new(&bytes[body_start..]);
                    let v4 = TdxBodyV4::parse(&mut c)?;
                    let tee_tcb_svn_2 = c.take_array("tdx_body_v5.tee_tcb_svn_2")?;
                    let mr_service_td = c.take_array("tdx_body_v5.mr_service_td")?;
                    (
                        Body::Tdx15(TdxBodyV5 {
                            v4,
                            tee_tcb_svn_2,
                            mr_service_td,
                        }),
                        body_start + TDX_BODY_V4_LEN + TDX_BODY_V5_EXTRA_LEN,
                    )
                }
                _other => {
                    return Err(VerifyError::MalformedQuote {
                        offset: HEADER_LEN,
                        field: "body_descriptor.type",
                    });
                }
            }
        }
        other => return Err(VerifyError::UnsupportedVersion(other)),
    };

    if bytes.len() < body_end {
        return Err(VerifyError::MalformedQuote {
            offset: body_end,
            field: "body",
        });
    }
    let signed_region = &bytes[..body_end];

    let mut sig_cursor = Cursor::new(&bytes[body_end..]);
    let _sig_section_len = sig_cursor.take_u32("signature.section_len")?;
    let ecdsa_signature = sig_cursor.take_array("signature.ecdsa_signature")?;
    let attestation_public_key = sig_cursor.take_array("signature.attestation_public_key")?;

    // Outer Certification Data (normally Type 6, "QE Report Certification
    // Data") wrapping the QE report/signature/auth-data and a nested
    // Certification Data (normally Type 5, PCK cert chain).
    let _outer_cert_type = sig_cursor.take_u16("signature.outer_cert_type")?;
    let _outer_cert_size = sig_cursor.take_u32("signature.outer_cert_size")?;

    let qe_report = sig_cursor.take_array("signature.qe_report")?;
    let qe_report_signature = sig_cursor.take_array("signature.qe_report_signature")?;
    let qe_auth_data_len = sig_cursor.take_u16("signature.qe_auth_data_len")? as usize;
    let qe_auth_data = sig_cursor.take(qe_auth_data_len, "signature.qe_auth_data")?;

    let cert_data_type = sig_cursor.take_u16("signature.cert_data_type")?;
    let cert_data_len = sig_cursor.take_u32("signature.cert_data_len")? as usize;
    let cert_data = sig_cursor.take(cert_data_len, "signature.cert_data")?;

    Ok(Quote {
        header,
        body,
        signature: Signature {
            ecdsa_signature,
            attestation_public_key,
            qe_report,
            qe_report_signature,
            qe_auth_data,
            cert_data_type,
            cert_data,
        },
        signed_region,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_header(buf: &mut Vec<u8>, version: u16, tee_type: u32) {
        buf.extend_from_slice(&version.to_le_bytes());
        buf.extend_from_slice(&2u16.to_le_bytes()); // att_key_type
        buf.extend_from_slice(&tee_type.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes()); // qe_svn
        buf.extend_from_slice(&0u16.to_le_bytes()); // pce_svn
        buf.extend_from_slice(&[0u8; 16]); // qe_vendor_id
        buf.extend_from_slice(&[0u8; 20]); // user_data
    }

    fn push_sig_section(buf: &mut Vec<u8>, cert_data: &[u8]) {
        let qe_auth_data: &[u8] = b"";
        let inner_len = 4 + 2 + 384 + 64 + 2 + qe_auth_data.len() + 2 + 4 + cert_data.len();
        buf.extend_from_slice(&(inner_len as u32).to_le_bytes());
        buf.extend_from_slice(&[0u8; 64]); // ecdsa_signature
        buf.extend_from_slice(&[0u8; 64]); // attestation_public_key
        buf.extend_from_slice(&6u16.to_le_bytes()); // outer cert type
        let outer_size = 384 + 64 + 2 + qe_auth_data.len() + 2 + 4 + cert_data.len();
        buf.extend_from_slice(&(outer_size as u32).to_le_bytes());
        buf.extend_from_slice(&[0u8; 384]); // qe_report
        buf.extend_from_slice(&[0u8; 64]); // qe_report_signature
        buf.extend_from_slice(&(qe_auth_data.len() as u16).to_le_bytes());
        buf.extend_from_slice(qe_auth_data);
        buf.extend_from_slice(&5u16.to_le_bytes()); // inner cert type (PCK chain)
        buf.extend_from_slice(&(cert_data.len() as u32).to_le_bytes());
        buf.extend_from_slice(cert_data);
    }

    #[test]
    fn parses_sgx_quote() {
        let mut buf = Vec::new();
        push_header(&mut buf, 3, 0);
        buf.extend_from_slice(&[0u8; 384]); // SGX body
        push_sig_section(&mut buf, b"pem-chain");

        let quote = parse(&buf).unwrap();
        assert_eq!(quote.header.version, 3);
        assert!(matches!(quote.body, Body::Sgx(_)));
        assert_eq!(quote.signature.cert_data, b"pem-chain");
        assert_eq!(quote.signed_region.len(), 48 + 384);
    }

    #[test]
    fn parses_tdx_v4_quote() {
        let mut buf = Vec::new();
        push_header(&mut buf, 4, 129);
        buf.extend_from_slice(&[0u8; 584]);
        push_sig_section(&mut buf, b"tdx-chain");

        let quote = parse(&buf).unwrap();
        assert_eq!(quote.header.tee_type, 129);
        assert!(matches!(quote.body, Body::Tdx10(_)));
        assert_eq!(quote.signed_region.len(), 48 + 584);
    }

    #[test]
    fn parses_tdx_v5_quote() {
        let mut buf = Vec::new();
        push_header(&mut buf, 5, 129);
        buf.extend_from_slice(&3u16.to_le_bytes()); // body_type = TDX 1.5
        buf.extend_from_slice(&648u32.to_le_bytes()); // body_size
        buf.extend_from_slice(&[0u8; 648]);
        push_sig_section(&mut buf, b"tdx15-chain");

        let quote = parse(&buf).unwrap();
        assert!(matches!(quote.body, Body::Tdx15(_)));
        assert_eq!(quote.signed_region.len(), 48 + 6 + 648);
    }

    #[test]
    fn rejects_truncated_header() {
        let buf = vec![0u8; 10];
        let err = parse(&buf).unwrap_err();
        assert!(matches!(err, VerifyError::MalformedQuote { .. }));
    }

    #[test]
    fn rejects_unknown_version() {
        let mut buf = Vec::new();
        push_header(&mut buf, 7, 0);
        let err = parse(&buf).unwrap_err();
        assert!(matches!(err, VerifyError::UnsupportedVersion(7)));
    }
}
