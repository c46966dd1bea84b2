//! End to end tests of the HTTP signing API.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64_ENGINE;
use base64::engine::Engine as _;
use tokio::net::TcpListener;

use signd::api::{CertificatesResponse, ErrorResponse};
use signd::crypto::cms::SignedData;
use signd::daemon::http::HttpServer;
use signd::daemon::start::serve;
use signd::test;

const CONTENT: &[u8] = b"fixture document contents\n";

async fn start_server(dir: &std::path::Path) -> String {
    let config = Arc::new(test::test_config(dir));
    let server = Arc::new(HttpServer::new(config));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, server));
    format!("http://{addr}")
}

#[tokio::test]
async fn health_endpoint_responds() {
    let dir = tempfile::tempdir().unwrap();
    let base = start_server(dir.path()).await;

    let response = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn authorized_caller_receives_valid_pkcs7() {
    let dir = tempfile::tempdir().unwrap();
    let base = start_server(dir.path()).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/sign"))
        .json(&serde_json::json!({
            "signing_token": "user-1-with-rights",
            "action": "sign_pkcs7",
            "encoded_contents": BASE64_ENGINE.encode(CONTENT),
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let der = response.bytes().await.unwrap();
    let signed = SignedData::decode(&der).unwrap();
    signed.verify_message_digest(CONTENT).unwrap();

    // The embedded signer certificate must be the configured one.
    let signer_pem =
        std::fs::read(dir.path().join("test-signer.cert")).unwrap();
    let signer_der = openssl::x509::X509::from_pem(&signer_pem)
        .unwrap()
        .to_der()
        .unwrap();
    assert!(signed.certificates().starts_with(&signer_der));
}

#[tokio::test]
async fn unauthorized_caller_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let base = start_server(dir.path()).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/sign"))
        .json(&serde_json::json!({
            "signing_token": "user-2-without-rights",
            "action": "sign_pkcs7",
            "encoded_contents": BASE64_ENGINE.encode(CONTENT),
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let body: ErrorResponse = response.json().await.unwrap();
    assert_eq!(body.code, 2001);
    assert_eq!(body.msg, "Unauthorized");
}

#[tokio::test]
async fn certificates_do_not_require_signing_rights() {
    let dir = tempfile::tempdir().unwrap();
    let base = start_server(dir.path()).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/sign"))
        .json(&serde_json::json!({
            "signing_token": "user-2-without-rights",
            "action": "get_certificates",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: CertificatesResponse = response.json().await.unwrap();
    assert_eq!(body.certificates.len(), 1);
    assert_eq!(body.ca_certificates.len(), 1);

    let signer_pem =
        std::fs::read(dir.path().join("test-signer.cert")).unwrap();
    let signer_der = openssl::x509::X509::from_pem(&signer_pem)
        .unwrap()
        .to_der()
        .unwrap();
    assert_eq!(
        BASE64_ENGINE.decode(&body.certificates[0]).unwrap(),
        signer_der
    );
}

#[tokio::test]
async fn cades_signatures_are_not_supported() {
    let dir = tempfile::tempdir().unwrap();
    let base = start_server(dir.path()).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/sign"))
        .json(&serde_json::json!({
            "signing_token": "user-1-with-rights",
            "action": "sign_pkcs7",
            "signature_type": "cades",
            "encoded_contents": BASE64_ENGINE.encode(CONTENT),
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let body: ErrorResponse = response.json().await.unwrap();
    assert_eq!(body.code, 2003);
}

#[tokio::test]
async fn raw_signature_verifies_against_served_certificates() {
    let dir = tempfile::tempdir().unwrap();
    let base = start_server(dir.path()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/sign"))
        .json(&serde_json::json!({
            "signing_token": "user-1-with-rights",
            "action": "sign",
            "hash_algorithm": "sha384",
            "encoded_contents": BASE64_ENGINE.encode(CONTENT),
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let signature = response.bytes().await.unwrap();

    let response = client
        .post(format!("{base}/sign"))
        .json(&serde_json::json!({
            "signing_token": "user-1-with-rights",
            "action": "get_certificates",
        }))
        .send()
        .await
        .unwrap();
    let certs: CertificatesResponse = response.json().await.unwrap();
    let signer_der =
        BASE64_ENGINE.decode(&certs.certificates[0]).unwrap();
    let pubkey = openssl::x509::X509::from_der(&signer_der)
        .unwrap()
        .public_key()
        .unwrap();

    let mut verifier = openssl::sign::Verifier::new(
        openssl::hash::MessageDigest::sha384(),
        &pubkey,
    )
    .unwrap();
    verifier.update(CONTENT).unwrap();
    assert!(verifier.verify(&signature).unwrap());
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let base = start_server(dir.path()).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/sign"))
        .header("Content-Type", "application/json")
        .body("this is not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let body: ErrorResponse = response.json().await.unwrap();
    assert_eq!(body.code, 2000);
}

#[tokio::test]
async fn unsupported_hash_algorithm_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let base = start_server(dir.path()).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/sign"))
        .json(&serde_json::json!({
            "signing_token": "user-1-with-rights",
            "action": "sign",
            "hash_algorithm": "md5",
            "encoded_contents": BASE64_ENGINE.encode(CONTENT),
        }))
        .send()
        .await
        .unwrap();
    // Rejected before any signing happens; the error names the
    // offending algorithm.
    assert_eq!(response.status(), 400);
    let body: ErrorResponse = response.json().await.unwrap();
    assert_eq!(body.code, 2006);
    assert!(body.msg.contains("md5"));
}
