//! Message digests and the PKCS#1 v1.5 DigestInfo encoding.

use std::{fmt, str::FromStr};

use bcder::decode::{Constructed, DecodeError, Source};
use bcder::encode::PrimitiveContent;
use bcder::string::OctetString;
use bcder::{encode, Captured, ConstOid, Mode, Oid, Tag};
use bytes::Bytes;
use openssl::hash::MessageDigest;

use crate::crypto::oid;
use crate::crypto::signers::error::SignerError;

//------------ DigestAlgorithm ----------------------------------------------

/// The digest algorithms supported for signing requests.
///
/// Parsed from the `hash_algorithm` request token; anything outside
/// this set is rejected with [`SignerError::UnsupportedAlgorithm`]
/// before it can reach a backend.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DigestAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    pub fn oid(self) -> ConstOid {
        match self {
            DigestAlgorithm::Sha256 => oid::SHA256,
            DigestAlgorithm::Sha384 => oid::SHA384,
            DigestAlgorithm::Sha512 => oid::SHA512,
        }
    }

    pub fn message_digest(self) -> MessageDigest {
        match self {
            DigestAlgorithm::Sha256 => MessageDigest::sha256(),
            DigestAlgorithm::Sha384 => MessageDigest::sha384(),
            DigestAlgorithm::Sha512 => MessageDigest::sha512(),
        }
    }

    /// Computes the digest of `data` under this algorithm.
    pub fn digest(self, data: &[u8]) -> Result<Bytes, SignerError> {
        let digest = openssl::hash::hash(self.message_digest(), data)?;
        Ok(Bytes::copy_from_slice(digest.as_ref()))
    }

    /// Encodes the AlgorithmIdentifier for this algorithm.
    ///
    /// The parameters field is an explicit NULL, which is what the
    /// validating side expects for the SHA-2 family in SignedData.
    pub fn encode(self) -> impl encode::Values {
        encode::sequence((self.oid().encode(), ().encode()))
    }

    /// Encodes the digestAlgorithms SET containing just this algorithm.
    pub fn encode_set(self) -> impl encode::Values {
        encode::set(self.encode())
    }

    /// Parses an AlgorithmIdentifier from a SignedData structure.
    pub fn take_from<S: Source>(
        cons: &mut Constructed<S>,
    ) -> Result<Self, DecodeError<S::Error>> {
        cons.take_sequence(|cons| {
            let alg_oid = Oid::take_from(cons)?;
            let alg = if alg_oid == oid::SHA256 {
                DigestAlgorithm::Sha256
            } else if alg_oid == oid::SHA384 {
                DigestAlgorithm::Sha384
            } else if alg_oid == oid::SHA512 {
                DigestAlgorithm::Sha512
            } else {
                return Err(cons.content_err("unsupported digest algorithm"));
            };
            cons.take_opt_primitive_if(Tag::NULL, |prim| prim.skip_all())?;
            Ok(alg)
        })
    }

    /// Parses the one-element digestAlgorithms SET.
    pub fn take_set_from<S: Source>(
        cons: &mut Constructed<S>,
    ) -> Result<Self, DecodeError<S::Error>> {
        cons.take_set(Self::take_from)
    }
}

impl Default for DigestAlgorithm {
    fn default() -> Self {
        DigestAlgorithm::Sha256
    }
}

impl FromStr for DigestAlgorithm {
    type Err = SignerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sha256" => Ok(DigestAlgorithm::Sha256),
            "sha384" => Ok(DigestAlgorithm::Sha384),
            "sha512" => Ok(DigestAlgorithm::Sha512),
            _ => Err(SignerError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DigestAlgorithm::Sha256 => write!(f, "sha256"),
            DigestAlgorithm::Sha384 => write!(f, "sha384"),
            DigestAlgorithm::Sha512 => write!(f, "sha512"),
        }
    }
}

//------------ DigestInfo ---------------------------------------------------

/// Encodes a digest in the PKCS#1 v1.5 DigestInfo structure:
///
/// ```text
/// DigestInfo ::= SEQUENCE {
///     digestAlgorithm AlgorithmIdentifier,
///     digest          OCTET STRING }
/// ```
///
/// Backends whose primitive signs a pre-hashed digest (the HSM's
/// CKM_RSA_PKCS mechanism, raw RSA private key operations) must be
/// handed this encoding rather than the bare digest, or the resulting
/// signature will not verify as RSASSA-PKCS1-v1.5.
pub fn encode_digest_info(
    algorithm: DigestAlgorithm,
    digest: &[u8],
) -> Bytes {
    Captured::from_values(
        Mode::Der,
        encode::sequence((
            algorithm.encode(),
            OctetString::encode_slice(digest),
        )),
    )
    .into_bytes()
}

//------------ Tests --------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // The fixed DigestInfo prefixes from RFC 8017 section 9.2.
    const SHA256_PREFIX: &[u8] = &[
        0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65,
        0x03, 0x04, 0x02, 0x01, 0x05, 0x00, 0x04, 0x20,
    ];
    const SHA384_PREFIX: &[u8] = &[
        0x30, 0x41, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65,
        0x03, 0x04, 0x02, 0x02, 0x05, 0x00, 0x04, 0x30,
    ];
    const SHA512_PREFIX: &[u8] = &[
        0x30, 0x51, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65,
        0x03, 0x04, 0x02, 0x03, 0x05, 0x00, 0x04, 0x40,
    ];

    #[test]
    fn digest_info_matches_rfc_8017_prefixes() {
        for (alg, prefix, len) in [
            (DigestAlgorithm::Sha256, SHA256_PREFIX, 32),
            (DigestAlgorithm::Sha384, SHA384_PREFIX, 48),
            (DigestAlgorithm::Sha512, SHA512_PREFIX, 64),
        ] {
            let digest = vec![0xabu8; len];
            let info = encode_digest_info(alg, &digest);
            assert_eq!(&info[..prefix.len()], prefix);
            assert_eq!(&info[prefix.len()..], digest.as_slice());
        }
    }

    #[test]
    fn digest_matches_openssl() {
        let data = b"signd digest test vector";
        let digest = DigestAlgorithm::Sha256.digest(data).unwrap();
        let expected =
            openssl::hash::hash(MessageDigest::sha256(), data).unwrap();
        assert_eq!(digest.as_ref(), expected.as_ref());
        assert_eq!(digest.len(), 32);
    }

    #[test]
    fn parses_known_tokens_only() {
        assert_eq!(
            DigestAlgorithm::from_str("SHA384").unwrap(),
            DigestAlgorithm::Sha384
        );
        assert!(matches!(
            DigestAlgorithm::from_str("sha1"),
            Err(SignerError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn algorithm_identifier_round_trips() {
        for alg in [
            DigestAlgorithm::Sha256,
            DigestAlgorithm::Sha384,
            DigestAlgorithm::Sha512,
        ] {
            let encoded = Captured::from_values(Mode::Der, alg.encode());
            let decoded = Mode::Der
                .decode(encoded.as_slice(), DigestAlgorithm::take_from)
                .unwrap();
            assert_eq!(alg, decoded);
        }
    }
}
