//! PCK certificate-chain construction and path validation.

use std::collections::HashSet;

use crate::error::VerifyError;
use crate::x509::Certificate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStatus {
    Valid,
    Invalid,
    Expired,
    Revoked,
}

pub struct ChainResult {
    pub status: ChainStatus,
    /// DER bytes of the chain's terminal (self-issued) certificate.
    pub root: Vec<u8>,
    /// Ordered leaf..root DER bytes.
    pub ordered_chain: Vec<Vec<u8>>,
}

/// Build and validate a PCK certificate chain from a set of PEM-derived DER
/// certificates.
///
/// `verify_time`, when set, is checked against every certificate's validity
/// window. `crls` are DER-encoded `CertificateList`s whose revoked serials
/// are unioned before membership is checked against the chain.
pub fn verify_chain(
    der_certs: &[Vec<u8>],
    verify_time: Option<time::OffsetDateTime>,
    crls: &[Vec<u8>],
) -> Result<ChainResult, VerifyError> {
    if der_certs.is_empty() {
        return Err(VerifyError::InvalidCertChain);
    }

    let certs: Vec<Certificate<'_>> = der_certs
        .iter()
        .map(|der| Certificate::from_der(der))
        .collect::<Result<_, _>>()?;

    // Leaf = the cert that is not the issuer of any other cert in the set.
    // If more than one qualifies (ambiguous input), take the first such.
    let leaf_idx = certs
        .iter()
        .enumerate()
        .find(|(i, candidate)| {
            !certs
                .iter()
                .enumerate()
                .any(|(j, other)| j != *i && other.issuer() == candidate.subject())
        })
        .map(|(i, _)| i)
        .unwrap_or(0);

    let mut ordered = vec![leaf_idx];
    loop {
        let current = &certs[*ordered.last().unwrap()];
        if current.subject() == current.issuer() {
            break; // self-issued: terminal
        }
        let Some(parent_idx) = certs
            .iter()
            .position(|c| c.subject() == current.issuer())
        else {
            break; // no parent found: chain ends here, possibly incomplete
        };
        if ordered.contains(&parent_idx) {
            break; // guard against cycles
        }
        ordered.push(parent_idx);
    }

    // Chaining equality for every adjacent pair.
    for pair in ordered.windows(2) {
        let (child, parent) = (&certs[pair[0]], &certs[pair[1]]);
        if child.issuer() != parent.subject() {
            return Ok(invalid(&certs, &ordered));
        }
    }

    if let Some(t) = verify_time {
        if ordered.iter().any(|&i| !certs[i].is_time_valid(t)) {
            return Ok(ChainResult {
                status: ChainStatus::Expired,
                root: certs[*ordered.last().unwrap()].der().to_vec(),
                ordered_chain: ordered.iter().map(|&i| certs[i].der().to_vec()).collect(),
            });
        }
    }

    let root_idx = *ordered.last().unwrap();
    let root = &certs[root_idx];
    if root.subject() != root.issuer() {
        return Ok(invalid(&certs, &ordered));
    }
    // Self-signature check.
    if root.verify(root).is_err() {
        return Ok(invalid(&certs, &ordered));
    }

    // Pairwise signature verification child -> parent.
    for pair in ordered.windows(2) {
        let (child, parent) = (&certs[pair[0]], &certs[pair[1]]);
        if child.verify(parent).is_err() {
            return Ok(invalid(&certs, &ordered));
        }
    }

    // CA / path-length checks. ordered[0] is the leaf; everything else must
    // be a CA. pathLenConstraint on node i bounds how many intermediate CAs
    // may appear strictly below it (closer to the leaf).
    if certs[ordered[0]].is_ca() {
        return Ok(invalid(&certs, &ordered));
    }
    for (depth, &idx) in ordered.iter().enumerate().skip(1) {
        let cert = &certs[idx];
        if !cert.is_ca() {
            return Ok(invalid(&certs, &ordered));
        }
        if let Some(max_intermediates) = cert.path_length() {
            let intermediates_below = depth - 1; // CAs strictly below idx, excluding the leaf
            if intermediates_below > max_intermediates as usize {
                return Ok(invalid(&certs, &ordered));
            }
        }
    }

    let revoked: HashSet<String> = crls
        .iter()
        .flat_map(|der| crate::crl::revoked_serials(der))
        .collect();
    if ordered
        .iter()
        .any(|&i| revoked.contains(&certs[i].serial_number()))
    {
        return Ok(ChainResult {
            status: ChainStatus::Revoked,
            root: root.der().to_vec(),
            ordered_chain: ordered.iter().map(|&i| certs[i].der().to_vec()).collect(),
        });
    }

    Ok(ChainResult {
        status: ChainStatus::Valid,
        root: root.der().to_vec(),
        ordered_chain: ordered.iter().map(|&i| certs[i].der().to_vec()).collect(),
    })
}

fn invalid(certs: &[Certificate<'_>], ordered: &[usize]) -> ChainResult {
    let root_idx = *ordered.last().unwrap();
    ChainResult {
        status: ChainStatus::Invalid,
        root: certs[root_idx].der().to_vec(),
        ordered_chain: ordered.iter().map(|&i| certs[i].der().to_vec()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x509::fixtures;

    fn real_chain_ders() -> Vec<Vec<u8>> {
        crate::x509::parse_pem_chain(&fixtures::chain_pem()).unwrap()
    }

    #[test]
    fn real_three_cert_chain_is_valid_with_no_time_check() {
        let result = verify_chain(&real_chain_ders(), None, &[]).unwrap();
        assert_eq!(result.status, ChainStatus::Valid);
        assert_eq!(result.ordered_chain.len(), 3);
        // leaf..root order.
        let leaf = Certificate::from_der(&result.ordered_chain[0]).unwrap();
        assert_eq!(leaf.subject(), "2.5.4.3=Test PCK Leaf");
        let root = Certificate::from_der(&result.ordered_chain[2]).unwrap();
        assert_eq!(root.subject(), root.issuer());
    }

    #[test]
    fn real_chain_rejected_as_expired_before_any_certs_notbefore() {
        // 2000-01-01T00:00:00Z, well before any fixture cert's notBefore.
        let long_ago = time::OffsetDateTime::from_unix_timestamp(946_684_800).unwrap();
        let result = verify_chain(&real_chain_ders(), Some(long_ago), &[]).unwrap();
        assert_eq!(result.status, ChainStatus::Expired);
    }

    #[test]
    fn real_chain_rejected_as_expired_after_leaf_notafter() {
        // 2030-01-01T00:00:00Z, well after the leaf's one-year notAfter.
        let far_future = time::OffsetDateTime::from_unix_timestamp(1_893_456_000).unwrap();
        let result = verify_chain(&real_chain_ders(), Some(far_future), &[]).unwrap();
        assert_eq!(result.status, ChainStatus::Expired);
    }

    #[test]
    fn real_chain_revoked_when_leaf_serial_in_crl() {
        let result = verify_chain(
            &real_chain_ders(),
            None,
            std::slice::from_ref(&fixtures::LEAF_REVOKED_CRL_DER.to_vec()),
        )
        .unwrap();
        assert_eq!(result.status, ChainStatus::Revoked);
    }

    #[test]
    fn tampered_leaf_signature_is_invalid() {
        let mut ders = real_chain_ders();
        // Flip a byte inside the leaf's signature bytes (well past the
        // fixed TBS header, inside the trailing ECDSA signature BIT STRING).
        let last = ders[0].len() - 10;
        ders[0][last] ^= 0xFF;
        let result = verify_chain(&ders, None, &[]).unwrap();
        assert_eq!(result.status, ChainStatus::Invalid);
    }

    #[test]
    fn empty_input_is_invalid() {
        let err = verify_chain(&[], None, &[]).unwrap_err();
        assert!(matches!(err, VerifyError::InvalidCertChain));
    }

    #[test]
    fn leaf_only_chain_has_no_parent_and_is_not_self_signed() {
        // A lone leaf cert isn't self-issued, so the walk stops immediately
        // with an incomplete (single-element) chain; since it never reaches
        // a self-issued terminal the root-self-verify step fails it.
        let leaf_der = crate::x509::parse_pem_chain(fixtures::LEAF_PEM.as_bytes())
            .unwrap()
            .remove(0);
        let result = verify_chain(&[leaf_der], None, &[]).unwrap();
        assert_eq!(result.status, ChainStatus::Invalid);
    }
}
