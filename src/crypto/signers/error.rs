use std::{fmt, io};

use openssl::error::ErrorStack;

#[derive(Debug)]
pub enum SignerError {
    /// The requested hash algorithm is not in the supported set, or a
    /// backend cannot sign with it.
    UnsupportedAlgorithm(String),

    /// The backend exists but cannot currently produce signatures.
    SignerUnavailable(String),

    /// No token is present in the configured HSM slot.
    DeviceUnavailable(String),

    /// No usable private key was found.
    KeyNotFound,

    /// A remote signing provider rejected or failed a call. Carries the
    /// provider's diagnostic payload so the caller can decide whether a
    /// retry makes sense.
    ProviderError(String),

    /// The backend cannot supply a certificate chain.
    CertificateUnavailable(String),

    /// The backend does not support the requested operation.
    NotImplemented(&'static str),

    /// An ASN.1 structure could not be produced or parsed. With well
    /// formed inputs this indicates a programming error.
    EncodingError(String),

    OpenSslError(ErrorStack),

    IoError(io::Error),
}

impl fmt::Display for SignerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SignerError::UnsupportedAlgorithm(name) => {
                write!(f, "Unsupported hash algorithm: {name}")
            }
            SignerError::SignerUnavailable(msg) => {
                write!(f, "Signer is unavailable: {msg}")
            }
            SignerError::DeviceUnavailable(msg) => {
                write!(f, "Signing device is unavailable: {msg}")
            }
            SignerError::KeyNotFound => write!(f, "Could not find key"),
            SignerError::ProviderError(msg) => {
                write!(f, "Signing provider error: {msg}")
            }
            SignerError::CertificateUnavailable(msg) => {
                write!(f, "Could not obtain certificate chain: {msg}")
            }
            SignerError::NotImplemented(msg) => write!(f, "{msg}"),
            SignerError::EncodingError(msg) => {
                write!(f, "Encoding error: {msg}")
            }
            SignerError::OpenSslError(e) => write!(f, "OpenSSL error: {e}"),
            SignerError::IoError(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl From<ErrorStack> for SignerError {
    fn from(e: ErrorStack) -> Self {
        SignerError::OpenSslError(e)
    }
}

impl From<io::Error> for SignerError {
    fn from(e: io::Error) -> Self {
        SignerError::IoError(e)
    }
}

impl From<reqwest::Error> for SignerError {
    fn from(e: reqwest::Error) -> Self {
        SignerError::ProviderError(e.to_string())
    }
}

#[cfg(feature = "hsm")]
impl From<cryptoki::error::Error> for SignerError {
    fn from(e: cryptoki::error::Error) -> Self {
        SignerError::SignerUnavailable(e.to_string())
    }
}
