//! Signing through the GlobalSign Digital Signing Service.
//!
//! The DSS issues short-lived signing identities: an identity id plus
//! the certificate the service will sign under. Issuing one is a slow
//! remote operation, so one identity is cached per signer instance and
//! shared by all concurrent requests until it ages out or a signing
//! failure marks it as unusable.

use std::time::{Duration, Instant};

use bytes::Bytes;
use log::{debug, info, warn};
use openssl::x509::X509;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::api::CertificateChain;
use crate::config::GlobalSignConfig;
use crate::constants::{IDENTITY_REUSE_TTL, PROVIDER_HTTP_TIMEOUT};
use crate::crypto::cms::{SignDigest, SignedDataBuilder};
use crate::crypto::digest::DigestAlgorithm;
use crate::crypto::signers::error::SignerError;

//------------ Wire types ----------------------------------------------------

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    api_key: &'a str,
    api_secret: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access_token: String,
}

#[derive(Debug, Serialize)]
struct IdentityRequest {
    subject_dn: SubjectDn,
}

#[derive(Debug, Serialize)]
struct SubjectDn {
    organizational_unit: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct IdentityResponse {
    id: String,
    signing_cert: String,
}

#[derive(Debug, Deserialize)]
struct TrustChainResponse {
    trustchain: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    signature: String,
}

//------------ IdentityCache -------------------------------------------------

/// A signing identity issued by the DSS, with its issuance time.
#[derive(Clone, Debug)]
struct CachedIdentity {
    id: String,
    signing_cert: String,
    created_at: Instant,
}

/// The cached identity of one signer instance.
///
/// All reads and writes of the identity record go through one async
/// mutex, so two concurrent requests never both issue a new identity
/// and a request that finds a fresh identity returns it immediately.
/// The lock is queued first-in-first-out; a request that fails while
/// holding it simply releases it, it cannot jam the queue for
/// followers.
#[derive(Debug)]
struct IdentityCache {
    current: Mutex<Option<CachedIdentity>>,
    reuse_ttl: Duration,
}

impl IdentityCache {
    fn new(reuse_ttl: Duration) -> Self {
        IdentityCache {
            current: Mutex::new(None),
            reuse_ttl,
        }
    }

    /// Returns the cached identity if it is still within its reuse
    /// window, otherwise runs `issue` and caches its result. A stale
    /// record is only replaced once issuance has succeeded, so a
    /// failed attempt leaves the previous state observable for
    /// diagnosis and the next caller simply tries again.
    async fn get_or_issue<F, Fut>(
        &self,
        issue: F,
    ) -> Result<(String, String), SignerError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<
            Output = Result<(String, String), SignerError>,
        >,
    {
        let mut current = self.current.lock().await;

        if let Some(identity) = current.as_ref() {
            if identity.created_at.elapsed() <= self.reuse_ttl {
                return Ok((
                    identity.id.clone(),
                    identity.signing_cert.clone(),
                ));
            }
            debug!("Cached signing identity expired, re-issuing");
        }

        let (id, signing_cert) = issue().await?;
        *current = Some(CachedIdentity {
            id: id.clone(),
            signing_cert: signing_cert.clone(),
            created_at: Instant::now(),
        });
        Ok((id, signing_cert))
    }

    /// Drops the cached identity so the next acquisition re-issues.
    async fn invalidate(&self) {
        *self.current.lock().await = None;
    }
}

//------------ GlobalSignSigner ----------------------------------------------

/// Signs through the GlobalSign DSS API.
///
/// Every logical operation fetches a fresh bearer token through the
/// login endpoint. That is wasteful but keeps this signer free of a
/// second expiring-credential cache; the signing identity is the one
/// piece of state worth caching.
#[derive(Debug)]
pub struct GlobalSignSigner {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: secrecy::SecretString,
    identity: IdentityCache,
}

impl GlobalSignSigner {
    pub fn build(config: &GlobalSignConfig) -> Result<Self, SignerError> {
        let mut builder = reqwest::Client::builder()
            .timeout(PROVIDER_HTTP_TIMEOUT);

        // The production DSS endpoint authenticates clients with
        // mutual TLS on top of the api key and secret.
        if let (Some(cert), Some(key)) =
            (&config.tls_cert, &config.tls_key)
        {
            let cert_pem = std::fs::read(cert)?;
            let key_pem = std::fs::read(key)?;
            let identity =
                reqwest::Identity::from_pkcs8_pem(&cert_pem, &key_pem)?;
            builder = builder.identity(identity);
        }

        Ok(GlobalSignSigner {
            client: builder.build()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            identity: IdentityCache::new(IDENTITY_REUSE_TTL),
        })
    }

    pub async fn get_certificates(
        &self,
    ) -> Result<CertificateChain, SignerError> {
        info!("Retrieving certificates from GlobalSign DSS");

        let (_, signing_cert) = self.acquire_identity().await?;
        let signer = pem_to_der(&signing_cert)?;

        let mut issuers = Vec::new();
        for cert in self.trustchain().await? {
            issuers.push(pem_to_der(&cert)?);
        }

        Ok(CertificateChain::new(signer, issuers))
    }

    pub async fn sign_raw(
        &self,
        data: &[u8],
        algorithm: DigestAlgorithm,
    ) -> Result<Bytes, SignerError> {
        info!("Signing with GlobalSign DSS");
        let digest = Self::require_sha256(algorithm)?.digest(data)?;
        self.sign_digest(&digest, algorithm).await
    }

    /// Signs a pre-computed digest through the DSS sign endpoint.
    ///
    /// A failure of the sign call is attributed to the identity: the
    /// service invalidates identities server-side, so the cached record
    /// is dropped eagerly rather than retried by the next request.
    pub async fn sign_digest(
        &self,
        digest: &[u8],
        algorithm: DigestAlgorithm,
    ) -> Result<Bytes, SignerError> {
        Self::require_sha256(algorithm)?;

        let (id, _) = self.acquire_identity().await?;

        let token = self.login().await?;
        let response = self
            .client
            .get(format!(
                "{}/identity/{}/sign/{}",
                self.base_url,
                id,
                hex::encode(digest)
            ))
            .bearer_auth(token)
            .send()
            .await?;

        if !response.status().is_success() {
            self.identity.invalidate().await;
            warn!("GlobalSign sign call failed, dropped cached identity");
            return Err(SignerError::ProviderError(format!(
                "GlobalSign sign failed: {}",
                payload(response).await
            )));
        }

        let body: SignResponse = response.json().await?;
        hex::decode(&body.signature).map(Bytes::from).map_err(|e| {
            SignerError::ProviderError(format!(
                "GlobalSign returned an undecodable signature: {e}"
            ))
        })
    }

    pub async fn sign_pkcs7(
        &self,
        content: &[u8],
        algorithm: DigestAlgorithm,
    ) -> Result<Bytes, SignerError> {
        Self::require_sha256(algorithm)?;
        let chain = self.get_certificates().await?;
        SignedDataBuilder::new(content, &chain, algorithm)
            .encode(&IdentityDigestSigner { signer: self })
            .await
    }

    /// The DSS sign endpoint accepts SHA-256 digests only.
    fn require_sha256(
        algorithm: DigestAlgorithm,
    ) -> Result<DigestAlgorithm, SignerError> {
        if algorithm != DigestAlgorithm::Sha256 {
            return Err(SignerError::UnsupportedAlgorithm(format!(
                "GlobalSign DSS signs SHA-256 digests only, not {algorithm}"
            )));
        }
        Ok(algorithm)
    }

    /// Returns the cached identity, issuing a new one if needed.
    async fn acquire_identity(
        &self,
    ) -> Result<(String, String), SignerError> {
        self.identity.get_or_issue(|| self.issue_identity()).await
    }

    async fn issue_identity(&self) -> Result<(String, String), SignerError> {
        debug!("Generating identity in GlobalSign DSS");

        // A production account would set the common name and other
        // subject fields here; the organizational unit is the one
        // field the sandbox accepts unconditionally.
        let request = IdentityRequest {
            subject_dn: SubjectDn {
                organizational_unit: vec!["Signing".to_string()],
            },
        };

        let token = self.login().await?;
        let response = self
            .client
            .post(format!("{}/identity", self.base_url))
            .bearer_auth(token)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SignerError::ProviderError(format!(
                "GlobalSign identity failed: {}",
                payload(response).await
            )));
        }

        let body: IdentityResponse = response.json().await?;
        Ok((body.id, body.signing_cert))
    }

    async fn login(&self) -> Result<String, SignerError> {
        let request = LoginRequest {
            api_key: &self.api_key,
            api_secret: self.api_secret.expose_secret(),
        };

        let response = self
            .client
            .post(format!("{}/login", self.base_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SignerError::ProviderError(format!(
                "GlobalSign login failed: {}",
                payload(response).await
            )));
        }

        let body: LoginResponse = response.json().await?;
        Ok(body.access_token)
    }

    async fn trustchain(&self) -> Result<Vec<String>, SignerError> {
        debug!("Retrieving GlobalSign intermediate and root CA chain");

        let token = self.login().await?;
        let response = self
            .client
            .get(format!("{}/trustchain", self.base_url))
            .bearer_auth(token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SignerError::ProviderError(format!(
                "GlobalSign trustchain failed: {}",
                payload(response).await
            )));
        }

        let body: TrustChainResponse = response.json().await?;
        Ok(body.trustchain)
    }
}

/// Adapter binding the CMS builder to the remote identity. The DSS
/// wraps the digest in a DigestInfo on its side.
struct IdentityDigestSigner<'a> {
    signer: &'a GlobalSignSigner,
}

impl SignDigest for IdentityDigestSigner<'_> {
    async fn sign_digest(&self, digest: &[u8]) -> Result<Bytes, SignerError> {
        self.signer.sign_digest(digest, DigestAlgorithm::Sha256).await
    }
}

fn pem_to_der(pem: &str) -> Result<Vec<u8>, SignerError> {
    let cert = X509::from_pem(pem.as_bytes()).map_err(|e| {
        SignerError::CertificateUnavailable(format!(
            "cannot parse provider certificate: {e}"
        ))
    })?;
    Ok(cert.to_der()?)
}

async fn payload(response: reqwest::Response) -> String {
    let status = response.status();
    match response.text().await {
        Ok(body) if !body.is_empty() => format!("{status}: {body}"),
        _ => status.to_string(),
    }
}

//------------ Tests ---------------------------------------------------------
