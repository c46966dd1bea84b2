//! Data types for the signing API.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64_ENGINE;
use base64::engine::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Error;

//------------ SignAction ----------------------------------------------------

/// What the caller wants done with the document.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SignAction {
    /// A raw RSASSA-PKCS1-v1.5 signature over the document bytes.
    Sign,
    /// A detached CMS/PKCS#7 SignedData container.
    SignPkcs7,
    /// The certificate chain needed to validate signatures.
    GetCertificates,
}

impl FromStr for SignAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sign" => Ok(SignAction::Sign),
            "sign_pkcs7" => Ok(SignAction::SignPkcs7),
            "get_certificates" => Ok(SignAction::GetCertificates),
            _ => Err(Error::UnknownAction(s.to_string())),
        }
    }
}

impl fmt::Display for SignAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SignAction::Sign => write!(f, "sign"),
            SignAction::SignPkcs7 => write!(f, "sign_pkcs7"),
            SignAction::GetCertificates => write!(f, "get_certificates"),
        }
    }
}

//------------ SignMethod ----------------------------------------------------

/// The closed set of signing backends.
///
/// Each method is associated with exactly one long-lived backend
/// instance owned by the registry; the variants here carry no state.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SignMethod {
    PrivateKey,
    Hsm,
    GlobalSign,
    GlobalTrust,
}

/// The method used when a signing token does not name one.
pub const DEFAULT_SIGN_METHOD: SignMethod = SignMethod::PrivateKey;

impl FromStr for SignMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "privatekey" => Ok(SignMethod::PrivateKey),
            "hsm" => Ok(SignMethod::Hsm),
            "globalsign" => Ok(SignMethod::GlobalSign),
            "globaltrust" => Ok(SignMethod::GlobalTrust),
            _ => Err(Error::UnknownSignMethod(s.to_string())),
        }
    }
}

impl fmt::Display for SignMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SignMethod::PrivateKey => write!(f, "privatekey"),
            SignMethod::Hsm => write!(f, "hsm"),
            SignMethod::GlobalSign => write!(f, "globalsign"),
            SignMethod::GlobalTrust => write!(f, "globaltrust"),
        }
    }
}

//------------ SigningToken --------------------------------------------------

/// The caller's signing token.
///
/// Either a bare identity string, implying the default signing method,
/// or a structured token naming both the identity and the method. The
/// two forms are distinguished structurally when the request is
/// decoded, not by trial and error later on.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum SigningToken {
    Plain(String),
    Qualified {
        id: String,
        #[serde(default)]
        method: Option<String>,
    },
}

impl SigningToken {
    /// The caller identity the authorization collaborator knows.
    pub fn id(&self) -> &str {
        match self {
            SigningToken::Plain(id) => id,
            SigningToken::Qualified { id, .. } => id,
        }
    }

    /// The explicitly requested signing method, if any.
    pub fn method(&self) -> Option<&str> {
        match self {
            SigningToken::Plain(_) => None,
            SigningToken::Qualified { method, .. } => method.as_deref(),
        }
    }
}

//------------ SignRequest ---------------------------------------------------

/// A signing request as received. Immutable once decoded; the token
/// fields are parsed into their typed forms by the dispatcher so that
/// malformed values get specific errors rather than decode noise.
#[derive(Clone, Debug, Deserialize)]
pub struct SignRequest {
    pub signing_token: SigningToken,

    /// Defaults to `sign_pkcs7` when absent.
    #[serde(default)]
    pub action: Option<String>,

    /// The document, Base64 encoded.
    #[serde(default)]
    pub encoded_contents: Option<String>,

    /// A pre-computed digest in hex, for detached raw signing.
    #[serde(default)]
    pub document_digest: Option<String>,

    /// Defaults to `sha256` when absent.
    #[serde(default)]
    pub hash_algorithm: Option<String>,

    /// Only `cms` is supported; requesting anything else fails before
    /// a backend is selected.
    #[serde(default)]
    pub signature_type: Option<String>,
}

impl SignRequest {
    /// Decodes the document bytes, if any were supplied.
    pub fn contents(&self) -> Result<Option<Vec<u8>>, Error> {
        match &self.encoded_contents {
            None => Ok(None),
            Some(b64) => BASE64_ENGINE.decode(b64).map(Some).map_err(|e| {
                Error::InvalidRequest(format!(
                    "encoded_contents is not valid Base64: {e}"
                ))
            }),
        }
    }

    /// Decodes the detached digest bytes, if any were supplied.
    pub fn digest_bytes(&self) -> Result<Option<Vec<u8>>, Error> {
        match &self.document_digest {
            None => Ok(None),
            Some(hx) => hex::decode(hx).map(Some).map_err(|e| {
                Error::InvalidRequest(format!(
                    "document_digest is not valid hex: {e}"
                ))
            }),
        }
    }
}

//------------ CertificateChain ----------------------------------------------

/// A signer certificate with its chain of issuer certificates, all as
/// DER. The signer certificate always comes first; the chain is never
/// empty.
#[derive(Clone, Debug)]
pub struct CertificateChain {
    signer: Vec<u8>,
    issuers: Vec<Vec<u8>>,
}

impl CertificateChain {
    pub fn new(signer: Vec<u8>, issuers: Vec<Vec<u8>>) -> Self {
        CertificateChain { signer, issuers }
    }

    /// The certificate whose key produces the signatures.
    pub fn signer_cert(&self) -> &[u8] {
        &self.signer
    }

    pub fn issuers(&self) -> &[Vec<u8>] {
        &self.issuers
    }

    /// All certificates, signer first.
    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        std::iter::once(self.signer.as_slice())
            .chain(self.issuers.iter().map(|c| c.as_slice()))
    }

    /// The API representation: Base64 encoded DER, split into signer
    /// and CA certificates the way validators expect to receive them.
    pub fn to_response(&self) -> CertificatesResponse {
        CertificatesResponse {
            certificates: vec![BASE64_ENGINE.encode(&self.signer)],
            ca_certificates: self
                .issuers
                .iter()
                .map(|c| BASE64_ENGINE.encode(c))
                .collect(),
        }
    }
}

/// The JSON body returned for a `get_certificates` request.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CertificatesResponse {
    pub certificates: Vec<String>,
    pub ca_certificates: Vec<String>,
}

//------------ SignResponse --------------------------------------------------

/// The outcome of a dispatched signing request.
#[derive(Clone, Debug)]
pub enum SignResponse {
    /// A raw RSASSA-PKCS1-v1.5 signature.
    Signature(Bytes),
    /// A DER encoded CMS ContentInfo carrying the SignedData.
    SignedData(Bytes),
    Certificates(CertificatesResponse),
}

//------------ ErrorResponse -------------------------------------------------

/// The JSON body of an error reply.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub msg: String,
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_accepts_both_forms() {
        let plain: SigningToken =
            serde_json::from_str("\"user-1-with-rights\"").unwrap();
        assert_eq!(plain.id(), "user-1-with-rights");
        assert!(plain.method().is_none());

        let qualified: SigningToken = serde_json::from_str(
            "{\"id\": \"user-1-with-rights\", \"method\": \"hsm\"}",
        )
        .unwrap();
        assert_eq!(qualified.id(), "user-1-with-rights");
        assert_eq!(qualified.method(), Some("hsm"));

        let no_method: SigningToken =
            serde_json::from_str("{\"id\": \"user-1-with-rights\"}").unwrap();
        assert!(no_method.method().is_none());
    }

    #[test]
    fn unknown_method_is_rejected() {
        assert!(matches!(
            SignMethod::from_str("smartcard"),
            Err(Error::UnknownSignMethod(_))
        ));
        assert_eq!(
            SignMethod::from_str("GlobalSign").unwrap(),
            SignMethod::GlobalSign
        );
    }

    #[test]
    fn request_decodes_content_fields() {
        let request: SignRequest = serde_json::from_str(
            "{\"signing_token\": \"u\", \"encoded_contents\": \"aGVsbG8=\", \
             \"document_digest\": \"00ff\"}",
        )
        .unwrap();
        assert_eq!(request.contents().unwrap().unwrap(), b"hello");
        assert_eq!(request.digest_bytes().unwrap().unwrap(), vec![0x00, 0xff]);

        let bad: SignRequest = serde_json::from_str(
            "{\"signing_token\": \"u\", \"encoded_contents\": \"%%%\"}",
        )
        .unwrap();
        assert!(bad.contents().is_err());
    }
}
