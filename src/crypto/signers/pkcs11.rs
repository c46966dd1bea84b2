//! Signing through a PKCS#11 hardware security module.

use bytes::Bytes;
use cryptoki::context::{CInitializeArgs, Pkcs11};
use cryptoki::mechanism::Mechanism;
use cryptoki::object::{Attribute, ObjectClass};
use cryptoki::session::{Session, UserType};
use cryptoki::slot::Slot;
use cryptoki::types::AuthPin;
use log::debug;
use secrecy::ExposeSecret;

use crate::api::CertificateChain;
use crate::config::HsmConfig;
use crate::crypto::cms::{SignDigest, SignedDataBuilder};
use crate::crypto::digest::{encode_digest_info, DigestAlgorithm};
use crate::crypto::signers::error::SignerError;

//------------ Pkcs11Signer --------------------------------------------------

/// Signs inside a PKCS#11 token.
///
/// The module library is loaded and initialized once at construction.
/// Each signing operation opens its own session, logs in, locates the
/// private key, performs exactly one sign operation and closes the
/// session again. Overlapping calls are therefore safe but each pays
/// the full session setup cost.
///
/// The private key never leaves the token; the certificate chain that
/// belongs to it is supplied through configuration instead.
pub struct Pkcs11Signer {
    pkcs11: Pkcs11,
    slot_label: Option<String>,
    user_pin: secrecy::SecretString,
    chain: CertificateChain,
}

impl std::fmt::Debug for Pkcs11Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Pkcs11Signer")
            .field("slot_label", &self.slot_label)
            .finish_non_exhaustive()
    }
}

impl Pkcs11Signer {
    pub fn build(config: &HsmConfig) -> Result<Self, SignerError> {
        // Loading and initializing the library says nothing about
        // whether a token is actually present. That is checked per
        // operation so that a token inserted later just starts working.
        let pkcs11 = Pkcs11::new(&config.module_path).map_err(|e| {
            SignerError::SignerUnavailable(format!(
                "cannot load PKCS#11 library '{}': {}",
                config.module_path.display(),
                e
            ))
        })?;
        pkcs11.initialize(CInitializeArgs::OsThreads)?;

        let chain = super::load_certificate_chain(
            &config.signer_cert,
            &config.ca_certs,
        )?;

        debug!(
            "Loaded PKCS#11 module '{}'",
            config.module_path.display()
        );

        Ok(Pkcs11Signer {
            pkcs11,
            slot_label: config.slot_label.clone(),
            user_pin: config.user_pin.clone(),
            chain,
        })
    }

    pub fn get_certificates(&self) -> Result<CertificateChain, SignerError> {
        Ok(self.chain.clone())
    }

    pub fn sign_raw(
        &self,
        data: &[u8],
        algorithm: DigestAlgorithm,
    ) -> Result<Bytes, SignerError> {
        let digest = algorithm.digest(data)?;
        self.sign_digest(&digest, algorithm)
    }

    /// Signs a pre-computed digest inside the token.
    ///
    /// The digest is wrapped in a DigestInfo and signed with the plain
    /// CKM_RSA_PKCS mechanism. Using CKM_SHA256_RSA_PKCS here would
    /// hash the digest a second time.
    pub fn sign_digest(
        &self,
        digest: &[u8],
        algorithm: DigestAlgorithm,
    ) -> Result<Bytes, SignerError> {
        let digest_info = encode_digest_info(algorithm, digest);

        let session = self.open_session()?;
        let key = self.find_private_key(&session)?;
        let signature =
            session.sign(&Mechanism::RsaPkcs, key, &digest_info)?;
        let _ = session.logout();

        Ok(Bytes::from(signature))
    }

    pub async fn sign_pkcs7(
        &self,
        content: &[u8],
        algorithm: DigestAlgorithm,
    ) -> Result<Bytes, SignerError> {
        SignedDataBuilder::new(content, &self.chain, algorithm)
            .encode(&TokenDigestSigner {
                signer: self,
                algorithm,
            })
            .await
    }

    /// Opens a logged-in session against the configured slot.
    fn open_session(&self) -> Result<Session, SignerError> {
        let slot = self.find_slot()?;
        let session = self.pkcs11.open_rw_session(slot).map_err(|e| {
            SignerError::DeviceUnavailable(format!(
                "cannot open session: {e}"
            ))
        })?;
        session
            .login(
                UserType::User,
                Some(&AuthPin::new(
                    self.user_pin.expose_secret().to_string(),
                )),
            )
            .map_err(|e| {
                SignerError::SignerUnavailable(format!("login failed: {e}"))
            })?;
        Ok(session)
    }

    /// Finds the slot holding our token.
    ///
    /// With a configured slot label the token labels are compared;
    /// otherwise the first slot with a token present is used, which is
    /// how SoftHSMv2 single-token deployments are usually run.
    fn find_slot(&self) -> Result<Slot, SignerError> {
        let slots = self.pkcs11.get_slots_with_token().map_err(|e| {
            SignerError::DeviceUnavailable(format!(
                "cannot enumerate slots: {e}"
            ))
        })?;

        match &self.slot_label {
            None => slots.first().copied().ok_or_else(|| {
                SignerError::DeviceUnavailable(
                    "no token present in any slot".to_string(),
                )
            }),
            Some(label) => slots
                .into_iter()
                .find(|slot| {
                    self.pkcs11
                        .get_token_info(*slot)
                        .map(|info| info.label().trim() == label)
                        .unwrap_or(false)
                })
                .ok_or_else(|| {
                    SignerError::DeviceUnavailable(format!(
                        "no token with label '{label}' present"
                    ))
                }),
        }
    }

    fn find_private_key(
        &self,
        session: &Session,
    ) -> Result<cryptoki::object::ObjectHandle, SignerError> {
        let keys = session
            .find_objects(&[Attribute::Class(ObjectClass::PRIVATE_KEY)])?;
        keys.first().copied().ok_or(SignerError::KeyNotFound)
    }
}

/// Adapter binding the CMS builder to the token's key.
struct TokenDigestSigner<'a> {
    signer: &'a Pkcs11Signer,
    algorithm: DigestAlgorithm,
}

impl SignDigest for TokenDigestSigner<'_> {
    async fn sign_digest(&self, digest: &[u8]) -> Result<Bytes, SignerError> {
        self.signer.sign_digest(digest, self.algorithm)
    }
}

//------------ Tests ---------------------------------------------------------
