//! The signing backends.

use std::path::{Path, PathBuf};

use openssl::x509::X509;

use crate::api::CertificateChain;

use self::error::SignerError;

pub mod error;
pub mod globalsign;
pub mod globaltrust;
#[cfg(feature = "hsm")]
pub mod pkcs11;
pub mod softsigner;

/// Loads a certificate chain from PEM files on disk: the signer
/// certificate plus any number of CA certificate files, each of which
/// may hold several concatenated certificates.
pub(crate) fn load_certificate_chain(
    signer_cert: &Path,
    ca_certs: &[PathBuf],
) -> Result<CertificateChain, SignerError> {
    let signer = X509::from_pem(&read_file(signer_cert)?)
        .map_err(|e| {
            SignerError::CertificateUnavailable(format!(
                "cannot parse '{}': {}",
                signer_cert.display(),
                e
            ))
        })?
        .to_der()?;

    let mut issuers = Vec::new();
    for path in ca_certs {
        let stack =
            X509::stack_from_pem(&read_file(path)?).map_err(|e| {
                SignerError::CertificateUnavailable(format!(
                    "cannot parse '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        for cert in stack {
            issuers.push(cert.to_der()?);
        }
    }

    Ok(CertificateChain::new(signer, issuers))
}

fn read_file(path: &Path) -> Result<Vec<u8>, SignerError> {
    std::fs::read(path).map_err(|e| {
        SignerError::IoError(std::io::Error::new(
            e.kind(),
            format!("could not read '{}': {}", path.display(), e),
        ))
    })
}
