//! Support for signing things using a local software key (through
//! openssl) loaded from disk at startup.

use bytes::Bytes;
use log::debug;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Padding;

use crate::api::CertificateChain;
use crate::config::PrivateKeyConfig;
use crate::crypto::cms::{SignDigest, SignedDataBuilder};
use crate::crypto::digest::{encode_digest_info, DigestAlgorithm};
use crate::crypto::signers::error::SignerError;

//------------ SoftSigner ----------------------------------------------------

/// Signs with an RSA private key held in process memory.
///
/// Key and certificate chain are loaded once at construction. Signing
/// is a pure local operation without shared mutable state, so a single
/// instance is safe for unlimited concurrent use.
pub struct SoftSigner {
    pkey: PKey<Private>,
    chain: CertificateChain,
}

impl std::fmt::Debug for SoftSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("SoftSigner").finish_non_exhaustive()
    }
}

impl SoftSigner {
    pub fn build(config: &PrivateKeyConfig) -> Result<Self, SignerError> {
        let key_pem = std::fs::read(&config.signer_key).map_err(|e| {
            SignerError::IoError(std::io::Error::new(
                e.kind(),
                format!(
                    "could not read '{}': {}",
                    config.signer_key.display(),
                    e
                ),
            ))
        })?;
        let pkey = PKey::private_key_from_pem(&key_pem)?;

        let chain = super::load_certificate_chain(
            &config.signer_cert,
            &config.ca_certs,
        )?;

        debug!(
            "Loaded private key signer [OpenSSL version: {}]",
            openssl::version::version()
        );

        Ok(SoftSigner { pkey, chain })
    }

    pub fn get_certificates(&self) -> Result<CertificateChain, SignerError> {
        Ok(self.chain.clone())
    }

    /// Produces a PKCS#1 v1.5 signature over `data`, hashing it with
    /// the requested algorithm first.
    pub fn sign_raw(
        &self,
        data: &[u8],
        algorithm: DigestAlgorithm,
    ) -> Result<Bytes, SignerError> {
        let mut signer = openssl::sign::Signer::new(
            algorithm.message_digest(),
            &self.pkey,
        )?;
        signer.update(data)?;
        Ok(Bytes::from(signer.sign_to_vec()?))
    }

    /// Signs a digest that was already computed elsewhere. The digest
    /// is wrapped in a DigestInfo and run through the raw RSA PKCS#1
    /// primitive so it is not hashed a second time.
    pub fn sign_digest(
        &self,
        digest: &[u8],
        algorithm: DigestAlgorithm,
    ) -> Result<Bytes, SignerError> {
        let digest_info = encode_digest_info(algorithm, digest);
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

    pub async fn sign_pkcs7(
        &self,
        content: &[u8],
        algorithm: DigestAlgorithm,
    ) -> Result<Bytes, SignerError> {
        SignedDataBuilder::new(content, &self.chain, algorithm)
            .encode(&KeyDigestSigner {
                signer: self,
                algorithm,
            })
            .await
    }
}

/// Adapter binding the CMS builder to this signer's key material.
struct KeyDigestSigner<'a> {
    signer: &'a SoftSigner,
    algorithm: DigestAlgorithm,
}

impl SignDigest for KeyDigestSigner<'_> {
    async fn sign_digest(&self, digest: &[u8]) -> Result<Bytes, SignerError> {
        self.signer.sign_digest(digest, self.algorithm)
    }
}

//------------ Tests ---------------------------------------------------------
