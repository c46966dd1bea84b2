use std::str::FromStr;
use std::sync::Arc;

use log::{debug, warn};

use crate::api::{
    SignAction, SignMethod, SignRequest, SignResponse, DEFAULT_SIGN_METHOD,
};
use crate::crypto::digest::DigestAlgorithm;
use crate::crypto::dispatch::registry::SignerRegistry;
use crate::daemon::auth::Authorizer;
use crate::error::Error;

//------------ SignerRouter --------------------------------------------------

/// Routes an incoming signing request to the selected backend and
/// action.
///
/// Certificate retrieval is permitted for any caller; signing actions
/// require the caller to be authorized. Requests that can be rejected
/// from the request alone (unknown actions, unsupported signature
/// types, undecodable payloads) fail before a backend instance is
/// constructed or contacted.
#[derive(Debug)]
pub struct SignerRouter {
    registry: SignerRegistry,
    authorizer: Arc<Authorizer>,
}

impl SignerRouter {
    pub fn build(
        registry: SignerRegistry,
        authorizer: Arc<Authorizer>,
    ) -> Self {
        SignerRouter {
            registry,
            authorizer,
        }
    }

    pub async fn dispatch(
        &self,
        request: &SignRequest,
    ) -> Result<SignResponse, Error> {
        let action = match &request.action {
            Some(action) => SignAction::from_str(action)?,
            None => SignAction::SignPkcs7,
        };
        let method = self.resolve_method(request)?;
        let caller = request.signing_token.id();

        debug!("Dispatching '{action}' for '{caller}' to '{method}'");

        if action == SignAction::GetCertificates {
            // Always permitted: the chain is public material that the
            // validating side needs whether or not this caller may
            // sign.
            let signer = self.registry.signer(method)?;
            let chain = signer.get_certificates().await?;
            return Ok(SignResponse::Certificates(chain.to_response()));
        }

        if !self.authorizer.is_authorized_to_sign(caller) {
            warn!("Rejected signing request from '{caller}'");
            return Err(Error::Unauthorized);
        }

        let algorithm = match &request.hash_algorithm {
            Some(name) => {
                DigestAlgorithm::from_str(name).map_err(Error::SignerError)?
            }
            None => DigestAlgorithm::default(),
        };

        match action {
            SignAction::SignPkcs7 => {
                if let Some(signature_type) = &request.signature_type {
                    if signature_type != "cms" {
                        return Err(Error::UnsupportedSignatureType(
                            signature_type.clone(),
                        ));
                    }
                }
                let content = request.contents()?.ok_or_else(|| {
                    Error::InvalidRequest(
                        "sign_pkcs7 requires encoded_contents".to_string(),
                    )
                })?;
                let signer = self.registry.signer(method)?;
                Ok(SignResponse::SignedData(
                    signer.sign_pkcs7(&content, algorithm).await?,
                ))
            }

            SignAction::Sign => {
                let signer = self.registry.signer(method)?;
                if let Some(content) = request.contents()? {
                    Ok(SignResponse::Signature(
                        signer.sign_raw(&content, algorithm).await?,
                    ))
                } else if let Some(digest) = request.digest_bytes()? {
                    // The caller hashed the document already; signing
                    // must not hash a second time.
                    Ok(SignResponse::Signature(
                        signer.sign_digest(&digest, algorithm).await?,
                    ))
                } else {
                    Err(Error::InvalidRequest(
                        "sign requires encoded_contents or document_digest"
                            .to_string(),
                    ))
                }
            }

            SignAction::GetCertificates => unreachable!(),
        }
    }

    /// Picks the backend: an explicit method in the token wins, then
    /// the authorization model's backend binding, then the default.
    fn resolve_method(
        &self,
        request: &SignRequest,
    ) -> Result<SignMethod, Error> {
        if let Some(name) = request.signing_token.method() {
            return SignMethod::from_str(name);
        }
        if self
            .authorizer
            .uses_hsm_backend(request.signing_token.id())
        {
            return Ok(SignMethod::Hsm);
        }
        Ok(DEFAULT_SIGN_METHOD)
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
pub mod tests {
    use base64::engine::general_purpose::STANDARD as BASE64_ENGINE;
    use base64::engine::Engine as _;

    use crate::crypto::cms::SignedData;
    use crate::test;

    use super::*;

    fn test_router(dir: &std::path::Path) -> SignerRouter {
        let config = Arc::new(test::test_config(dir));
        let authorizer = Arc::new(Authorizer::new(config.auth.users.clone()));
        SignerRouter::build(SignerRegistry::new(config), authorizer)
    }

    fn request(json: serde_json::Value) -> SignRequest {
        serde_json::from_value(json).unwrap()
    }

    #[tokio::test]
    async fn authorized_caller_gets_a_signed_container() {
        let dir = tempfile::tempdir().unwrap();
        let router = test_router(dir.path());
        let content = b"fixture document";

        let response = router
            .dispatch(&request(serde_json::json!({
                "signing_token": "user-1-with-rights",
                "action": "sign_pkcs7",
                "encoded_contents": BASE64_ENGINE.encode(content),
            })))
            .await
            .unwrap();

        let der = match response {
            SignResponse::SignedData(der) => der,
            other => panic!("expected SignedData, got {other:?}"),
        };
        let signed = SignedData::decode(&der).unwrap();
        signed.verify_message_digest(content).unwrap();
    }

    #[tokio::test]
    async fn unauthorized_caller_is_rejected_without_signing() {
        let dir = tempfile::tempdir().unwrap();
        let router = test_router(dir.path());

        let result = router
            .dispatch(&request(serde_json::json!({
                "signing_token": "user-2-without-rights",
                "action": "sign_pkcs7",
                "encoded_contents": BASE64_ENGINE.encode(b"doc"),
            })))
            .await;
        assert!(matches!(result, Err(Error::Unauthorized)));

        let result = router
            .dispatch(&request(serde_json::json!({
                "signing_token": "user-2-without-rights",
                "action": "sign",
                "encoded_contents": BASE64_ENGINE.encode(b"doc"),
            })))
            .await;
        assert!(matches!(result, Err(Error::Unauthorized)));
    }

    #[tokio::test]
    async fn certificates_are_served_to_unauthorized_callers() {
        let dir = tempfile::tempdir().unwrap();
        let router = test_router(dir.path());

        let response = router
            .dispatch(&request(serde_json::json!({
                "signing_token": "user-2-without-rights",
                "action": "get_certificates",
            })))
            .await
            .unwrap();

        match response {
            SignResponse::Certificates(certs) => {
                assert_eq!(certs.certificates.len(), 1);
                assert!(!certs.ca_certificates.is_empty());
            }
            other => panic!("expected Certificates, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cades_fails_fast_without_touching_a_backend() {
        let dir = tempfile::tempdir().unwrap();
        // No backend is configured at all: if the signature type were
        // checked any later than it should be, this request would fail
        // with SignerNotConfigured instead.
        let mut config = test::test_config(dir.path());
        config.privatekey = None;
        let authorizer =
            Arc::new(Authorizer::new(config.auth.users.clone()));
        let router = SignerRouter::build(
            SignerRegistry::new(Arc::new(config)),
            authorizer,
        );

        let result = router
            .dispatch(&request(serde_json::json!({
                "signing_token": "user-1-with-rights",
                "action": "sign_pkcs7",
                "signature_type": "cades",
                "encoded_contents": BASE64_ENGINE.encode(b"doc"),
            })))
            .await;

        assert!(matches!(
            result,
            Err(Error::UnsupportedSignatureType(t)) if t == "cades"
        ));
    }

    #[tokio::test]
    async fn unknown_action_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let router = test_router(dir.path());

        let result = router
            .dispatch(&request(serde_json::json!({
                "signing_token": "user-1-with-rights",
                "action": "frobnicate",
            })))
            .await;
        assert!(matches!(
            result,
            Err(Error::UnknownAction(a)) if a == "frobnicate"
        ));
    }

    #[tokio::test]
    async fn detached_digest_is_signed_without_rehashing() {
        let dir = tempfile::tempdir().unwrap();
        let router = test_router(dir.path());
        let content = b"pre-hashed by the caller";
        let digest = DigestAlgorithm::Sha256.digest(content).unwrap();

        let by_digest = router
            .dispatch(&request(serde_json::json!({
                "signing_token": "user-1-with-rights",
                "action": "sign",
                "document_digest": hex::encode(&digest),
            })))
            .await
            .unwrap();
        let by_content = router
            .dispatch(&request(serde_json::json!({
                "signing_token": "user-1-with-rights",
                "action": "sign",
                "encoded_contents": BASE64_ENGINE.encode(content),
            })))
            .await
            .unwrap();

        // PKCS#1 v1.5 is deterministic: both paths must agree.
        match (by_digest, by_content) {
            (
                SignResponse::Signature(a),
                SignResponse::Signature(b),
            ) => assert_eq!(a, b),
            other => panic!("expected signatures, got {other:?}"),
        }
    }

    #[cfg(feature = "hsm")]
    #[tokio::test]
    async fn hsm_users_route_to_the_hsm_backend() {
        let dir = tempfile::tempdir().unwrap();
        let router = test_router(dir.path());

        // The test config has no hsm section, so proof of routing is
        // the specific configuration error.
        let result = router
            .dispatch(&request(serde_json::json!({
                "signing_token": "user-1-with-rights-hsm",
                "action": "sign",
                "encoded_contents": BASE64_ENGINE.encode(b"doc"),
            })))
            .await;
        assert!(matches!(
            result,
            Err(Error::SignerNotConfigured(SignMethod::Hsm))
        ));
    }

    #[tokio::test]
    async fn explicit_method_in_the_token_wins() {
        let dir = tempfile::tempdir().unwrap();
        let router = test_router(dir.path());

        let response = router
            .dispatch(&request(serde_json::json!({
                "signing_token": {
                    "id": "user-1-with-rights-hsm",
                    "method": "privatekey"
                },
                "action": "sign",
                "encoded_contents": BASE64_ENGINE.encode(b"doc"),
            })))
            .await
            .unwrap();
        assert!(matches!(response, SignResponse::Signature(_)));
    }
}
