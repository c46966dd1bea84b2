//! The HTTP front end: request parsing, routing to the signer router
//! and response shaping.

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::{Method, StatusCode};
use log::error;
use serde::Serialize;

use crate::api::{SignRequest, SignResponse};
use crate::config::Config;
use crate::crypto::dispatch::registry::SignerRegistry;
use crate::crypto::dispatch::signerrouter::SignerRouter;
use crate::daemon::auth::Authorizer;
use crate::error::Error;

/// A type alias for the request we receive from Hyper.
pub type HyperRequest = hyper::Request<hyper::body::Incoming>;

/// A type alias for the response we hand back to Hyper.
pub type HyperResponse = hyper::Response<Full<Bytes>>;

//----------- ContentType ----------------------------------------------------

enum ContentType {
    /// DER encoded signature material.
    Der,
    Json,
    Text,
}

impl AsRef<str> for ContentType {
    fn as_ref(&self) -> &str {
        match self {
            ContentType::Der => "application/octet-stream",
            ContentType::Json => "application/json",
            ContentType::Text => "text/html;charset=utf-8",
        }
    }
}

//----------- Response -------------------------------------------------------

struct Response {
    status: StatusCode,
    content_type: ContentType,
    body: Vec<u8>,
}

impl Response {
    fn new(status: StatusCode) -> Self {
        Response {
            status,
            content_type: ContentType::Text,
            body: Vec::new(),
        }
    }

    fn finalize(self) -> HttpResponse {
        HttpResponse(
            hyper::Response::builder()
                .status(self.status)
                .header("Content-Type", self.content_type.as_ref())
                .body(Full::new(Bytes::from(self.body)))
                .unwrap(),
        )
    }
}

//------------ HttpResponse --------------------------------------------------

pub struct HttpResponse(HyperResponse);

impl HttpResponse {
    fn ok_response(content_type: ContentType, body: Vec<u8>) -> Self {
        Response {
            status: StatusCode::OK,
            content_type,
            body,
        }
        .finalize()
    }

    pub fn into_hyper(self) -> HyperResponse {
        self.0
    }

    pub fn json<O: Serialize>(object: &O) -> Self {
        match serde_json::to_string(object) {
            Ok(json) => Self::ok_response(ContentType::Json, json.into_bytes()),
            Err(e) => Self::error(Error::JsonError(e)),
        }
    }

    pub fn text(body: Vec<u8>) -> Self {
        Self::ok_response(ContentType::Text, body)
    }

    pub fn der(body: Bytes) -> Self {
        Self::ok_response(ContentType::Der, body.to_vec())
    }

    pub fn error(error: Error) -> Self {
        error!("{}", error);
        let status = error.status();
        let response = error.to_error_response();
        let body = serde_json::to_string(&response).unwrap();
        Response {
            status,
            content_type: ContentType::Json,
            body: body.into_bytes(),
        }
        .finalize()
    }

    pub fn not_found() -> Self {
        Response::new(StatusCode::NOT_FOUND).finalize()
    }

    pub fn method_not_allowed() -> Self {
        Response::new(StatusCode::METHOD_NOT_ALLOWED).finalize()
    }
}

//------------ HttpServer ----------------------------------------------------

/// The application state behind the hyper service: the signer router
/// plus the request limits.
pub struct HttpServer {
    router: SignerRouter,
    post_limit: u64,
}

impl HttpServer {
    pub fn new(config: Arc<Config>) -> Self {
        let authorizer =
            Arc::new(Authorizer::new(config.auth.users.clone()));
        let registry = SignerRegistry::new(config.clone());
        HttpServer {
            router: SignerRouter::build(registry, authorizer),
            post_limit: config.post_limit,
        }
    }

    pub async fn process_request(
        &self,
        request: HyperRequest,
    ) -> Result<HyperResponse, Infallible> {
        let method = request.method().clone();
        let path = request.uri().path().to_string();

        let response = match (&method, path.as_str()) {
            (&Method::GET, "/health") => {
                HttpResponse::text(b"Ready to sign.".to_vec())
            }
            (&Method::POST, "/sign") => {
                match self.sign(request).await {
                    Ok(response) => response,
                    Err(e) => HttpResponse::error(e),
                }
            }
            (_, "/sign") | (_, "/health") => {
                HttpResponse::method_not_allowed()
            }
            _ => HttpResponse::not_found(),
        };
        Ok(response.into_hyper())
    }

    async fn sign(
        &self,
        request: HyperRequest,
    ) -> Result<HttpResponse, Error> {
        let body = self.read_body(request).await?;
        let sign_request: SignRequest = serde_json::from_slice(&body)?;

        match self.router.dispatch(&sign_request).await? {
            SignResponse::Signature(der)
            | SignResponse::SignedData(der) => Ok(HttpResponse::der(der)),
            SignResponse::Certificates(certs) => {
                Ok(HttpResponse::json(&certs))
            }
        }
    }

    async fn read_body(
        &self,
        request: HyperRequest,
    ) -> Result<Bytes, Error> {
        let limited =
            Limited::new(request.into_body(), self.post_limit as usize);
        match limited.collect().await {
            Ok(collected) => Ok(collected.to_bytes()),
            Err(_) => Err(Error::InvalidRequest(format!(
                "cannot read request body (limit: {} bytes)",
                self.post_limit
            ))),
        }
    }
}
