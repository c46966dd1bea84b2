use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use log::info;

use crate::api::SignMethod;
use crate::config::Config;
use crate::crypto::dispatch::signerprovider::SignerProvider;
use crate::crypto::signers::globalsign::GlobalSignSigner;
use crate::crypto::signers::globaltrust::GlobalTrustSigner;
use crate::crypto::signers::softsigner::SoftSigner;
use crate::error::Error;

//------------ SignerRegistry ------------------------------------------------

/// Owns the backend instances, one per signing method.
///
/// Backends are constructed lazily on first use and retained for the
/// lifetime of the process so that per-backend state (the remote
/// identity cache, the loaded PKCS#11 module) amortizes across
/// requests. The registry itself is explicit application state created
/// by the composition root; it is not a module level cache.
#[derive(Debug)]
pub struct SignerRegistry {
    config: Arc<Config>,
    signers: RwLock<HashMap<SignMethod, Arc<SignerProvider>>>,
}

impl SignerRegistry {
    pub fn new(config: Arc<Config>) -> Self {
        SignerRegistry {
            config,
            signers: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the backend for the method, constructing it on first
    /// use. Construction failures are not cached: a backend that could
    /// not be built (say, its key file appeared after startup) is
    /// simply tried again on the next request.
    pub fn signer(
        &self,
        method: SignMethod,
    ) -> Result<Arc<SignerProvider>, Error> {
        if let Some(signer) = self
            .signers
            .read()
            .expect("signer registry lock is poisoned")
            .get(&method)
        {
            return Ok(signer.clone());
        }

        let built = Arc::new(self.build(method)?);

        let mut signers = self
            .signers
            .write()
            .expect("signer registry lock is poisoned");
        // Another request may have built the same backend while we
        // were not holding the lock; keep the first one so singletons
        // stay singletons.
        Ok(signers.entry(method).or_insert(built).clone())
    }

    fn build(&self, method: SignMethod) -> Result<SignerProvider, Error> {
        match method {
            SignMethod::PrivateKey => {
                let config = self
                    .config
                    .privatekey
                    .as_ref()
                    .ok_or(Error::SignerNotConfigured(method))?;
                info!("Using signing method: Local Private Key");
                Ok(SignerProvider::PrivateKey(SoftSigner::build(config)?))
            }

            #[cfg(feature = "hsm")]
            SignMethod::Hsm => {
                let config = self
                    .config
                    .hsm
                    .as_ref()
                    .ok_or(Error::SignerNotConfigured(method))?;
                info!("Using signing method: PKCS#11 HSM");
                Ok(SignerProvider::Pkcs11(
                    crate::crypto::signers::pkcs11::Pkcs11Signer::build(
                        config,
                    )?,
                ))
            }

            #[cfg(not(feature = "hsm"))]
            SignMethod::Hsm => Err(Error::custom(
                "signd was built without HSM support",
            )),

            SignMethod::GlobalSign => {
                let config = self
                    .config
                    .globalsign
                    .as_ref()
                    .ok_or(Error::SignerNotConfigured(method))?;
                info!("Using signing method: GlobalSign DSS");
                Ok(SignerProvider::GlobalSign(GlobalSignSigner::build(
                    config,
                )?))
            }

            SignMethod::GlobalTrust => {
                let config = self
                    .config
                    .globaltrust
                    .as_ref()
                    .ok_or(Error::SignerNotConfigured(method))?;
                info!("Using signing method: GlobalTrust API");
                Ok(SignerProvider::GlobalTrust(GlobalTrustSigner::build(
                    config,
                )?))
            }
        }
    }
}

//------------ Tests ---------------------------------------------------------
