use bytes::Bytes;

use crate::api::CertificateChain;
use crate::crypto::digest::DigestAlgorithm;
use crate::crypto::signers::error::SignerError;
use crate::crypto::signers::globalsign::GlobalSignSigner;
use crate::crypto::signers::globaltrust::GlobalTrustSigner;
use crate::crypto::signers::softsigner::SoftSigner;

#[cfg(feature = "hsm")]
use crate::crypto::signers::pkcs11::Pkcs11Signer;

//------------ SignerProvider ------------------------------------------------

/// Dispatches signing requests to a particular backend implementation.
///
/// The set of backends is closed and known at compile time, so enum
/// based dispatch is used instead of trait objects. The code noise of
/// matching on the variant is wrapped up here so the routing logic can
/// focus on the business rules instead.
#[derive(Debug)]
pub enum SignerProvider {
    PrivateKey(SoftSigner),

    #[cfg(feature = "hsm")]
    Pkcs11(Pkcs11Signer),

    GlobalSign(GlobalSignSigner),

    GlobalTrust(GlobalTrustSigner),
}

impl SignerProvider {
    /// The certificate chain validating this backend's signatures.
    pub async fn get_certificates(
        &self,
    ) -> Result<CertificateChain, SignerError> {
        match self {
            SignerProvider::PrivateKey(signer) => signer.get_certificates(),
            #[cfg(feature = "hsm")]
            SignerProvider::Pkcs11(signer) => signer.get_certificates(),
            SignerProvider::GlobalSign(signer) => {
                signer.get_certificates().await
            }
            SignerProvider::GlobalTrust(signer) => {
                signer.get_certificates().await
            }
        }
    }

    /// A PKCS#1 v1.5 signature over `data`, hashed with `algorithm`.
    pub async fn sign_raw(
        &self,
        data: &[u8],
        algorithm: DigestAlgorithm,
    ) -> Result<Bytes, SignerError> {
        match self {
            SignerProvider::PrivateKey(signer) => {
                signer.sign_raw(data, algorithm)
            }
            #[cfg(feature = "hsm")]
            SignerProvider::Pkcs11(signer) => {
                signer.sign_raw(data, algorithm)
            }
            SignerProvider::GlobalSign(signer) => {
                signer.sign_raw(data, algorithm).await
            }
            SignerProvider::GlobalTrust(signer) => {
                signer.sign_raw(data, algorithm).await
            }
        }
    }

    /// Like `sign_raw` but for a digest the caller already computed.
    pub async fn sign_digest(
        &self,
        digest: &[u8],
        algorithm: DigestAlgorithm,
    ) -> Result<Bytes, SignerError> {
        match self {
            SignerProvider::PrivateKey(signer) => {
                signer.sign_digest(digest, algorithm)
            }
            #[cfg(feature = "hsm")]
            SignerProvider::Pkcs11(signer) => {
                signer.sign_digest(digest, algorithm)
            }
            SignerProvider::GlobalSign(signer) => {
                signer.sign_digest(digest, algorithm).await
            }
            SignerProvider::GlobalTrust(signer) => {
                signer.sign_digest(digest, algorithm).await
            }
        }
    }

    /// A detached CMS SignedData container over `content`.
    pub async fn sign_pkcs7(
        &self,
        content: &[u8],
        algorithm: DigestAlgorithm,
    ) -> Result<Bytes, SignerError> {
        match self {
            SignerProvider::PrivateKey(signer) => {
                signer.sign_pkcs7(content, algorithm).await
            }
            #[cfg(feature = "hsm")]
            SignerProvider::Pkcs11(signer) => {
                signer.sign_pkcs7(content, algorithm).await
            }
            SignerProvider::GlobalSign(signer) => {
                signer.sign_pkcs7(content, algorithm).await
            }
            SignerProvider::GlobalTrust(signer) => {
                signer.sign_pkcs7(content, algorithm).await
            }
        }
    }
}
