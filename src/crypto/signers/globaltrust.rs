//! Signing through the GlobalTrust Trust2Go API.

use base64::engine::general_purpose::STANDARD as BASE64_ENGINE;
use base64::engine::Engine as _;
use bytes::Bytes;
use log::info;
use openssl::x509::X509;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::api::CertificateChain;
use crate::config::GlobalTrustConfig;
use crate::constants::PROVIDER_HTTP_TIMEOUT;
use crate::crypto::digest::DigestAlgorithm;
use crate::crypto::signers::error::SignerError;

//------------ Wire types ----------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CertificateEntry {
    level: String,
    certificate_string: String,
    certificate_serial_number: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignRequest<'a> {
    language: &'a str,
    /// Trust2Go requires this id to be 6 characters long; it is used
    /// for matching requests and responses.
    request_id: &'a str,
    certificate_serial_number: String,
    hashes: Vec<String>,
    hash_algorithm: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignResponse {
    signed_hashes: Vec<SignedHash>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignedHash {
    signed_hash: String,
}

//------------ GlobalTrustSigner ---------------------------------------------

/// Signs through the Trust2Go API.
///
/// Unlike the GlobalSign DSS there is no ephemeral signing identity to
/// manage: the account's signing certificate is long-lived, so this
/// signer is stateless apart from its credentials and safe for
/// unlimited concurrent use.
#[derive(Debug)]
pub struct GlobalTrustSigner {
    client: reqwest::Client,
    base_url: String,
    api_user: String,
    api_password: secrecy::SecretString,
}

impl GlobalTrustSigner {
    pub fn build(config: &GlobalTrustConfig) -> Result<Self, SignerError> {
        let client = reqwest::Client::builder()
            .timeout(PROVIDER_HTTP_TIMEOUT)
            .build()?;

        Ok(GlobalTrustSigner {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_user: config.api_user.clone(),
            api_password: config.api_password.clone(),
        })
    }

    pub async fn get_certificates(
        &self,
    ) -> Result<CertificateChain, SignerError> {
        info!("Retrieving certificates from GlobalTrust (Trust2Go)");

        let entries = self.list_certificates().await?;

        // The USER level certificate signs; everything else forms the
        // CA chain that must travel with the signature for validation.
        let mut signer = None;
        let mut issuers = Vec::new();
        for entry in &entries {
            let der = pem_to_der(&entry.certificate_string)?;
            if entry.level == "USER" && signer.is_none() {
                signer = Some(der);
            } else {
                issuers.push(der);
            }
        }

        let signer = signer.ok_or_else(|| {
            SignerError::CertificateUnavailable(
                "Trust2Go listed no USER level certificate".to_string(),
            )
        })?;

        Ok(CertificateChain::new(signer, issuers))
    }

    pub async fn sign_raw(
        &self,
        data: &[u8],
        algorithm: DigestAlgorithm,
    ) -> Result<Bytes, SignerError> {
        info!("Signing with GlobalTrust (Trust2Go)");
        let digest = algorithm.digest(data)?;
        self.sign_digest(&digest, algorithm).await
    }

    pub async fn sign_digest(
        &self,
        digest: &[u8],
        algorithm: DigestAlgorithm,
    ) -> Result<Bytes, SignerError> {
        let request = SignRequest {
            language: "en",
            request_id: "123456",
            certificate_serial_number: self.signer_serial().await?,
            hashes: vec![BASE64_ENGINE.encode(digest)],
            hash_algorithm: algorithm.to_string(),
        };

        let response = self
            .client
            .post(format!(
                "{}/api/signers/usernames/sign",
                self.base_url
            ))
            .basic_auth(
                &self.api_user,
                Some(self.api_password.expose_secret()),
            )
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SignerError::ProviderError(format!(
                "GlobalTrust signing failed: {}",
                payload(response).await
            )));
        }

        let body: SignResponse = response.json().await?;
        let signed = body.signed_hashes.into_iter().next().ok_or_else(
            || {
                SignerError::ProviderError(
                    "GlobalTrust returned no signed hash".to_string(),
                )
            },
        )?;

        BASE64_ENGINE
            .decode(&signed.signed_hash)
            .map(Bytes::from)
            .map_err(|e| {
                SignerError::ProviderError(format!(
                    "GlobalTrust returned an undecodable signature: {e}"
                ))
            })
    }

    pub async fn sign_pkcs7(
        &self,
        _content: &[u8],
        _algorithm: DigestAlgorithm,
    ) -> Result<Bytes, SignerError> {
        Err(SignerError::NotImplemented(
            "Not implemented, use RAW signing instead of contained \
             PKCS#7 signatures",
        ))
    }

    async fn list_certificates(
        &self,
    ) -> Result<Vec<CertificateEntry>, SignerError> {
        let response = self
            .client
            .get(format!(
                "{}/api/v1/signers/usernames/certificates?language=en",
                self.base_url
            ))
            .basic_auth(
                &self.api_user,
                Some(self.api_password.expose_secret()),
            )
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SignerError::ProviderError(format!(
                "GlobalTrust get certificates failed: {}",
                payload(response).await
            )));
        }

        // The API nests the certificate list of each signer in an
        // outer array; we sign as a single account.
        let mut body: Vec<Vec<CertificateEntry>> = response.json().await?;
        if body.is_empty() {
            return Err(SignerError::CertificateUnavailable(
                "Trust2Go returned an empty certificate list".to_string(),
            ));
        }
        Ok(body.remove(0))
    }

    async fn signer_serial(&self) -> Result<String, SignerError> {
        let entries = self.list_certificates().await?;
        entries
            .into_iter()
            .find(|entry| entry.level == "USER")
            .map(|entry| entry.certificate_serial_number)
            .ok_or_else(|| {
                SignerError::CertificateUnavailable(
                    "could not retrieve certificate serial number"
                        .to_string(),
                )
            })
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
