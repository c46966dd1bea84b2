//! Building and parsing detached CMS/PKCS#7 SignedData containers.
//!
//! The builder produces the profile our validating counterpart
//! consumes: detached content (`eContent` omitted), the full
//! certificate chain embedded, and exactly one SignerInfo carrying the
//! three authenticated attributes content-type, message-digest and
//! signing-time. The signature covers the DER encoding of the signed
//! attributes SET, not the document itself.

use std::io;

use bcder::decode::{self, DecodeError, Source};
use bcder::encode::{Constructed, PrimitiveContent};
use bcder::string::OctetString;
use bcder::{encode, Captured, Mode, Oid, Tag};
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::api::CertificateChain;
use crate::crypto::digest::DigestAlgorithm;
use crate::crypto::oid;
use crate::crypto::signers::error::SignerError;

//------------ SignDigest ----------------------------------------------------

/// The one capability the builder needs from a signing backend.
///
/// The builder computes the digest of the signed attributes itself and
/// hands it to the adapter, so it does not care whether the private key
/// lives in process memory, in a hardware token, or behind a remote
/// API. Implementations must produce an RSASSA-PKCS1-v1.5 signature
/// over the given digest (wrapping it in a DigestInfo where the
/// underlying primitive expects one).
pub trait SignDigest {
    fn sign_digest(
        &self,
        digest: &[u8],
    ) -> impl std::future::Future<Output = Result<Bytes, SignerError>> + Send;
}

//------------ SignedDataBuilder ---------------------------------------------

/// Builds a detached SignedData container over document content.
pub struct SignedDataBuilder<'a> {
    content: &'a [u8],
    chain: &'a CertificateChain,
    digest_algorithm: DigestAlgorithm,
    signing_time: DateTime<Utc>,
}

impl<'a> SignedDataBuilder<'a> {
    /// Creates a builder. The signing time is captured now, before the
    /// (possibly remote) signing operation starts.
    pub fn new(
        content: &'a [u8],
        chain: &'a CertificateChain,
        digest_algorithm: DigestAlgorithm,
    ) -> Self {
        SignedDataBuilder {
            content,
            chain,
            digest_algorithm,
            signing_time: Utc::now(),
        }
    }

    /// Signs the content and returns the DER encoded ContentInfo.
    ///
    /// ```text
    /// ContentInfo ::= SEQUENCE {
    ///     contentType ContentType,
    ///     content [0] EXPLICIT ANY DEFINED BY contentType }
    ///
    /// SignedData ::= SEQUENCE {
    ///     version CMSVersion,
    ///     digestAlgorithms DigestAlgorithmIdentifiers,
    ///     encapContentInfo EncapsulatedContentInfo,
    ///     certificates [0] IMPLICIT CertificateSet OPTIONAL,
    ///     crls [1] IMPLICIT RevocationInfoChoices OPTIONAL,
    ///     signerInfos SignerInfos }
    /// ```
    ///
    /// Version 1 with an issuerAndSerialNumber signer identifier, since
    /// the encapsulated content type is id-data and the signer
    /// certificate is referenced rather than keyed.
    pub async fn encode<S: SignDigest>(
        self,
        signer: &S,
    ) -> Result<Bytes, SignerError> {
        let content_digest = self.digest_algorithm.digest(self.content)?;
        let signed_attrs = self.encode_signed_attrs(&content_digest);

        // Section 5.4 of RFC 5652: the signature is computed over the
        // DER encoding with the explicit SET OF tag, while the
        // attributes are embedded under the IMPLICIT [0] tag.
        let attrs_set =
            Captured::from_values(Mode::Der, encode::set(&signed_attrs));
        let attrs_digest =
            self.digest_algorithm.digest(attrs_set.as_slice())?;

        let signature = signer.sign_digest(&attrs_digest).await?;

        let (issuer, serial) = issuer_and_serial(self.chain.signer_cert())?;
        let mut certificates = Captured::builder(Mode::Der);
        for cert in self.chain.iter() {
            certificates.extend(capture_der(cert)?);
        }
        let certificates = certificates.freeze();

        let signer_info = encode::sequence((
            (
                1u8.encode(), // version
                encode::sequence((&issuer, &serial)), // sid
                self.digest_algorithm.encode(),
            ),
            (
                Constructed::new(Tag::CTX_0, &signed_attrs),
                encode::sequence((
                    oid::RSA_ENCRYPTION.encode(),
                    ().encode(),
                )),
                OctetString::encode_slice(signature.as_ref()),
            ),
        ));

        Ok(Captured::from_values(
            Mode::Der,
            encode::sequence((
                oid::SIGNED_DATA.encode(),
                Constructed::new(
                    Tag::CTX_0,
                    encode::sequence((
                        (
                            1u8.encode(), // version
                            self.digest_algorithm.encode_set(),
                            // encapContentInfo, eContent omitted
                            encode::sequence(oid::ID_DATA.encode()),
                        ),
                        (
                            Constructed::new(Tag::CTX_0, &certificates),
                            // crls omitted
                            encode::set(signer_info),
                        ),
                    )),
                ),
            )),
        )
        .into_bytes())
    }

    /// Encodes the three authenticated attributes.
    ///
    /// DER requires the members of a SET OF to be ordered by their
    /// encoded value, so each attribute is encoded on its own and the
    /// results are sorted before use.
    fn encode_signed_attrs(&self, content_digest: &[u8]) -> Captured {
        let mut attrs = vec![
            Captured::from_values(
                Mode::Der,
                encode::sequence((
                    oid::CONTENT_TYPE.encode(),
                    encode::set(oid::ID_DATA.encode()),
                )),
            ),
            Captured::from_values(
                Mode::Der,
                encode::sequence((
                    oid::MESSAGE_DIGEST.encode(),
                    encode::set(OctetString::encode_slice(content_digest)),
                )),
            ),
            Captured::from_values(
                Mode::Der,
                encode::sequence((
                    oid::SIGNING_TIME.encode(),
                    encode::set(SigningTime(self.signing_time).encode()),
                )),
            ),
        ];
        attrs.sort_by(|a, b| a.as_slice().cmp(b.as_slice()));

        let mut res = Captured::builder(Mode::Der);
        for attr in attrs {
            res.extend(attr);
        }
        res.freeze()
    }
}

//------------ SigningTime ---------------------------------------------------

/// The signing-time attribute value as a UTCTime.
///
/// RFC 5652 section 11.3 mandates UTCTime for dates through 2049.
#[derive(Clone, Copy, Debug)]
struct SigningTime(DateTime<Utc>);

impl PrimitiveContent for SigningTime {
    const TAG: Tag = Tag::UTC_TIME;

    fn encoded_len(&self, _mode: Mode) -> usize {
        13 // YYMMDDHHMMSSZ
    }

    fn write_encoded<W: io::Write>(
        &self,
        _mode: Mode,
        target: &mut W,
    ) -> Result<(), io::Error> {
        write!(target, "{}", self.0.format("%y%m%d%H%M%SZ"))
    }
}

//------------ SignedData ----------------------------------------------------

/// A parsed SignedData container.
///
/// Parsing is strict DER and limited to the profile the builder
/// produces; it exists so that signatures can be validated and so that
/// tests can check the builder's output without another ASN.1 stack.
#[derive(Clone, Debug)]
pub struct SignedData {
    digest_algorithm: DigestAlgorithm,
    content_type: Oid<Bytes>,
    content: Option<Bytes>,
    certificates: Captured,
    signer_info: SignerInfo,
}

/// The single SignerInfo of a parsed SignedData.
#[derive(Clone, Debug)]
pub struct SignerInfo {
    issuer: Captured,
    serial: Captured,
    digest_algorithm: DigestAlgorithm,
    signed_attrs: SignedAttrs,
    signature: Bytes,
}

/// The authenticated attributes of a parsed SignerInfo.
#[derive(Clone, Debug)]
pub struct SignedAttrs {
    raw: Captured,
    content_type: Oid<Bytes>,
    message_digest: Bytes,
    signing_time: Option<Bytes>,
}

impl SignedData {
    pub fn decode(data: &[u8]) -> Result<Self, SignerError> {
        Mode::Der
            .decode(data, Self::take_from)
            .map_err(|e| SignerError::EncodingError(e.to_string()))
    }

    fn take_from<S: Source>(
        cons: &mut decode::Constructed<S>,
    ) -> Result<Self, DecodeError<S::Error>> {
        cons.take_sequence(|cons| {
            oid::SIGNED_DATA.skip_if(cons)?; // contentType
            cons.take_constructed_if(Tag::CTX_0, Self::take_signed_data)
        })
    }

    fn take_signed_data<S: Source>(
        cons: &mut decode::Constructed<S>,
    ) -> Result<Self, DecodeError<S::Error>> {
        cons.take_sequence(|cons| {
            cons.skip_u8_if(1)?; // version -- must be 1

            let digest_algorithm = DigestAlgorithm::take_set_from(cons)?;

            let (content_type, content) = cons.take_sequence(|cons| {
                // encapContentInfo; eContent absent for detached mode
                Ok((
                    Oid::take_from(cons)?,
                    cons.take_opt_constructed_if(
                        Tag::CTX_0,
                        OctetString::take_from,
                    )?
                    .map(OctetString::into_bytes),
                ))
            })?;

            let certificates =
                cons.take_constructed_if(Tag::CTX_0, |cons| {
                    cons.capture_all()
                })?;

            // crls, if present, are not interesting here
            cons.take_opt_constructed_if(Tag::CTX_1, |cons| {
                cons.skip_all()
            })?;

            // signerInfos -- exactly one
            let signer_info = cons.take_set(SignerInfo::take_from)?;

            Ok(SignedData {
                digest_algorithm,
                content_type,
                content,
                certificates,
                signer_info,
            })
        })
    }

    pub fn digest_algorithm(&self) -> DigestAlgorithm {
        self.digest_algorithm
    }

    pub fn content_type(&self) -> &Oid<Bytes> {
        &self.content_type
    }

    /// The encapsulated content; `None` for a detached signature.
    pub fn content(&self) -> Option<&Bytes> {
        self.content.as_ref()
    }

    /// The raw DER of the embedded CertificateSet, certificates
    /// concatenated in the order they were embedded.
    pub fn certificates(&self) -> &[u8] {
        self.certificates.as_slice()
    }

    pub fn signer_info(&self) -> &SignerInfo {
        &self.signer_info
    }

    /// Checks that the message-digest attribute matches the digest of
    /// the given (detached) content.
    pub fn verify_message_digest(
        &self,
        content: &[u8],
    ) -> Result<(), SignerError> {
        let digest = self.digest_algorithm.digest(content)?;
        if digest != self.signer_info.signed_attrs.message_digest {
            return Err(SignerError::EncodingError(
                "message-digest attribute does not match content".to_string(),
            ));
        }
        Ok(())
    }
}

impl SignerInfo {
    fn take_from<S: Source>(
        cons: &mut decode::Constructed<S>,
    ) -> Result<Self, DecodeError<S::Error>> {
        cons.take_sequence(|cons| {
            cons.skip_u8_if(1)?; // version -- must be 1

            // sid -- issuerAndSerialNumber
            let (issuer, serial) = cons.take_sequence(|cons| {
                let issuer = cons.capture_one()?;
                let serial = cons.capture_one()?;
                Ok((issuer, serial))
            })?;

            let digest_algorithm = DigestAlgorithm::take_from(cons)?;

            let attrs_raw = cons
                .take_constructed_if(Tag::CTX_0, |cons| cons.capture_all())?;

            let _signature_algorithm = cons.capture_one()?;
            let signature = OctetString::take_from(cons)?.into_bytes();
            // no unsignedAttrs

            Ok(SignerInfo {
                issuer,
                serial,
                digest_algorithm,
                signed_attrs: SignedAttrs::parse(attrs_raw)
                    .map_err(|e| cons.content_err(e.to_string()))?,
                signature,
            })
        })
    }

    /// The DER of the issuer Name from the signer identifier.
    pub fn issuer(&self) -> &[u8] {
        self.issuer.as_slice()
    }

    /// The DER of the serial number INTEGER from the signer identifier.
    pub fn serial(&self) -> &[u8] {
        self.serial.as_slice()
    }

    pub fn digest_algorithm(&self) -> DigestAlgorithm {
        self.digest_algorithm
    }

    pub fn signed_attrs(&self) -> &SignedAttrs {
        &self.signed_attrs
    }

    pub fn signature(&self) -> &Bytes {
        &self.signature
    }

    pub fn message_digest(&self) -> &Bytes {
        &self.signed_attrs.message_digest
    }
}

impl SignedAttrs {
    /// Parses the attribute list captured from the IMPLICIT [0] block.
    fn parse(raw: Captured) -> Result<Self, SignerError> {
        let res = Mode::Der.decode(raw.as_slice(), |cons| {
            let mut content_type = None;
            let mut message_digest = None;
            let mut signing_time = None;
            while let Some(()) = cons.take_opt_sequence(|cons| {
                let attr_oid = Oid::take_from(cons)?;
                if attr_oid == oid::CONTENT_TYPE {
                    content_type =
                        Some(cons.take_set(|cons| Oid::take_from(cons))?);
                } else if attr_oid == oid::MESSAGE_DIGEST {
                    message_digest = Some(
                        cons.take_set(|cons| OctetString::take_from(cons))?
                            .into_bytes(),
                    );
                } else if attr_oid == oid::SIGNING_TIME {
                    signing_time = Some(cons.take_set(|cons| {
                        cons.take_primitive_if(Tag::UTC_TIME, |prim| {
                            prim.take_all()
                        })
                    })?);
                } else {
                    // unknown attribute, skip its value set
                    cons.skip_all()?;
                }
                Ok(())
            })? {}
            Ok((content_type, message_digest, signing_time))
        });

        let (content_type, message_digest, signing_time) = res
            .map_err(|e: DecodeError<std::convert::Infallible>| {
                SignerError::EncodingError(e.to_string())
            })?;

        let content_type = content_type.ok_or_else(|| {
            SignerError::EncodingError(
                "missing content-type attribute".to_string(),
            )
        })?;
        let message_digest = message_digest.ok_or_else(|| {
            SignerError::EncodingError(
                "missing message-digest attribute".to_string(),
            )
        })?;

        Ok(SignedAttrs {
            raw,
            content_type,
            message_digest,
            signing_time,
        })
    }

    pub fn content_type(&self) -> &Oid<Bytes> {
        &self.content_type
    }

    pub fn message_digest(&self) -> &Bytes {
        &self.message_digest
    }

    /// The raw UTCTime string of the signing-time attribute.
    pub fn signing_time(&self) -> Option<&Bytes> {
        self.signing_time.as_ref()
    }

    /// The encoding the signature was computed over: the attribute list
    /// re-tagged with the explicit SET OF tag (RFC 5652 section 5.4).
    pub fn encode_verify(&self) -> Vec<u8> {
        let mut res = vec![0x31]; // SET
        push_der_length(&mut res, self.raw.as_slice().len());
        res.extend_from_slice(self.raw.as_slice());
        res
    }
}

//------------ Helpers -------------------------------------------------------

/// Captures one complete DER value, verifying it is well formed.
fn capture_der(der: &[u8]) -> Result<Captured, SignerError> {
    Mode::Der
        .decode(der, |cons| cons.capture_one())
        .map_err(|e| {
            SignerError::EncodingError(format!("invalid certificate: {e}"))
        })
}

/// Extracts the issuer Name and serial number from a DER certificate,
/// both captured verbatim so they re-encode exactly as issued.
fn issuer_and_serial(
    cert_der: &[u8],
) -> Result<(Captured, Captured), SignerError> {
    Mode::Der
        .decode(cert_der, |cons| {
            cons.take_sequence(|cons| {
                let res = cons.take_sequence(|cons| {
                    // version [0] EXPLICIT, absent for v1 certificates
                    cons.take_opt_constructed_if(Tag::CTX_0, |cons| {
                        cons.skip_all()
                    })?;
                    let serial = cons.capture_one()?;
                    let _sig_alg = cons.capture_one()?;
                    let issuer = cons.capture_one()?;
                    cons.skip_all()?;
                    Ok((issuer, serial))
                })?;
                cons.skip_all()?;
                Ok(res)
            })
        })
        .map_err(|e| {
            SignerError::EncodingError(format!(
                "cannot parse signer certificate: {e}"
            ))
        })
}

fn push_der_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        out.push(0x80 | (bytes.len() - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use openssl::hash::MessageDigest;
    use openssl::rsa::Padding;
    use openssl::sign::Verifier;

    use crate::crypto::digest::encode_digest_info;
    use crate::test;

    use super::*;

    /// Signs attribute digests with an in-memory RSA key, the way the
    /// local private key backend does.
    struct TestDigestSigner {
        pkey: openssl::pkey::PKey<openssl::pkey::Private>,
        algorithm: DigestAlgorithm,
    }

    impl SignDigest for TestDigestSigner {
        async fn sign_digest(
            &self,
            digest: &[u8],
        ) -> Result<Bytes, SignerError> {
            let digest_info = encode_digest_info(self.algorithm, digest);
            let rsa = self.pkey.rsa()?;
            let mut signature = vec![0; rsa.size() as usize];
            let len = rsa.private_encrypt(
                &digest_info,
                &mut signature,
                Padding::PKCS1,
            )?;
            signature.truncate(len);
            Ok(Bytes::from(signature))
        }
    }

    fn test_setup(
        algorithm: DigestAlgorithm,
    ) -> (CertificateChain, TestDigestSigner, Vec<u8>) {
        let pkey = test::rsa_key();
        let cert = test::self_signed_cert(&pkey, "CMS Test Signer");
        let ca = test::self_signed_cert(&test::rsa_key(), "CMS Test CA");
        let chain = CertificateChain::new(
            cert.to_der().unwrap(),
            vec![ca.to_der().unwrap()],
        );
        let signer = TestDigestSigner { pkey, algorithm };
        (chain, signer, cert.to_der().unwrap())
    }

    #[tokio::test]
    async fn message_digest_attribute_matches_content() {
        let content = b"a document worth signing";
        for algorithm in [
            DigestAlgorithm::Sha256,
            DigestAlgorithm::Sha384,
            DigestAlgorithm::Sha512,
        ] {
            let (chain, signer, _) = test_setup(algorithm);
            let der = SignedDataBuilder::new(content, &chain, algorithm)
                .encode(&signer)
                .await
                .unwrap();

            let signed = SignedData::decode(&der).unwrap();
            assert_eq!(signed.digest_algorithm(), algorithm);
            assert_eq!(*signed.content_type(), oid::ID_DATA);
            assert!(signed.content().is_none(), "must be detached");
            assert_eq!(
                *signed.signer_info().message_digest(),
                algorithm.digest(content).unwrap()
            );
            signed.verify_message_digest(content).unwrap();
            assert!(signed
                .verify_message_digest(b"some other content")
                .is_err());
        }
    }

    #[tokio::test]
    async fn signature_verifies_over_signed_attributes() {
        let content = b"verify me";
        let (chain, signer, _) = test_setup(DigestAlgorithm::Sha256);
        let pubkey = openssl::x509::X509::from_der(chain.signer_cert())
            .unwrap()
            .public_key()
            .unwrap();

        let der = SignedDataBuilder::new(
            content,
            &chain,
            DigestAlgorithm::Sha256,
        )
        .encode(&signer)
        .await
        .unwrap();

        let signed = SignedData::decode(&der).unwrap();
        let attrs = signed.signer_info().signed_attrs().encode_verify();

        let mut verifier =
            Verifier::new(MessageDigest::sha256(), &pubkey).unwrap();
        verifier.update(&attrs).unwrap();
        assert!(verifier
            .verify(signed.signer_info().signature())
            .unwrap());
    }

    #[tokio::test]
    async fn certificate_chain_is_embedded_leaf_first() {
        let content = b"chained";
        let (chain, signer, leaf_der) = test_setup(DigestAlgorithm::Sha256);
        let der = SignedDataBuilder::new(
            content,
            &chain,
            DigestAlgorithm::Sha256,
        )
        .encode(&signer)
        .await
        .unwrap();

        let signed = SignedData::decode(&der).unwrap();
        assert!(signed.certificates().starts_with(&leaf_der));
        assert!(signed.certificates().len() > leaf_der.len());
    }

    #[tokio::test]
    async fn signed_attributes_are_in_der_set_order() {
        let content = b"ordered";
        for algorithm in [
            DigestAlgorithm::Sha256,
            DigestAlgorithm::Sha384,
            DigestAlgorithm::Sha512,
        ] {
            let (chain, signer, _) = test_setup(algorithm);
            let der = SignedDataBuilder::new(content, &chain, algorithm)
                .encode(&signer)
                .await
                .unwrap();
            let signed = SignedData::decode(&der).unwrap();

            // Split the raw attribute list back into the individual
            // attribute encodings and check they are ascending.
            let raw = signed.signer_info().signed_attrs().raw.as_slice();
            let mut attrs = Vec::new();
            let mut pos = 0;
            while pos < raw.len() {
                let len = raw[pos + 1] as usize; // short form throughout
                attrs.push(&raw[pos..pos + 2 + len]);
                pos += 2 + len;
            }
            assert_eq!(attrs.len(), 3);
            assert!(attrs.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[tokio::test]
    async fn rejects_malformed_der() {
        assert!(SignedData::decode(b"not der at all").is_err());
    }
}
