//! Defines all signd server side errors.

use std::{fmt, io};

use hyper::StatusCode;

use crate::api::{ErrorResponse, SignMethod};
use crate::crypto::signers::error::SignerError;

#[derive(Debug)]
pub enum Error {
    //-----------------------------------------------------------------
    // System issues (1000-1099)
    //-----------------------------------------------------------------

    // 1000, internal server error
    IoError(io::Error),

    // 1001, internal server error
    SignerError(SignerError),

    // 1002, internal server error
    SignerNotConfigured(SignMethod),

    //-----------------------------------------------------------------
    // Caller issues (2000-2099)
    //-----------------------------------------------------------------

    // 2000
    JsonError(serde_json::Error),

    // 2001
    Unauthorized,

    // 2002
    UnknownAction(String),

    // 2003
    UnsupportedSignatureType(String),

    // 2004
    UnknownSignMethod(String),

    // 2005
    InvalidRequest(String),

    //-----------------------------------------------------------------
    // Other
    //-----------------------------------------------------------------

    Custom(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::IoError(e) => e.fmt(f),
            Error::SignerError(e) => write!(f, "Signing issue: {e}"),
            Error::SignerNotConfigured(method) => {
                write!(f, "Signing method '{method}' is not configured")
            }
            Error::JsonError(e) => write!(f, "Invalid JSON: {e}"),
            // Deliberately a fixed message: callers without signing
            // rights learn nothing beyond the denial itself.
            Error::Unauthorized => write!(f, "Unauthorized"),
            Error::UnknownAction(action) => {
                write!(f, "Unknown action '{action}'")
            }
            Error::UnsupportedSignatureType(t) => {
                write!(f, "Unsupported signature type '{t}'")
            }
            Error::UnknownSignMethod(method) => {
                write!(f, "Unknown signing method '{method}'")
            }
            Error::InvalidRequest(msg) => {
                write!(f, "Invalid request: {msg}")
            }
            Error::Custom(msg) => msg.fmt(f),
        }
    }
}

impl Error {
    pub fn custom(msg: impl fmt::Display) -> Self {
        Error::Custom(msg.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            // Malformed requests a caller can fix.
            Error::SignerError(SignerError::UnsupportedAlgorithm(_))
            | Error::SignerError(SignerError::NotImplemented(_)) => {
                StatusCode::BAD_REQUEST
            }
            // The provider failed; the caller may retry.
            Error::SignerError(SignerError::ProviderError(_)) => {
                StatusCode::BAD_GATEWAY
            }
            Error::IoError(_)
            | Error::SignerError(_)
            | Error::SignerNotConfigured(_)
            | Error::Custom(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    pub fn to_error_response(&self) -> ErrorResponse {
        let code = match self {
            Error::IoError(_) => 1000,
            Error::SignerError(SignerError::UnsupportedAlgorithm(_)) => 2006,
            Error::SignerError(SignerError::NotImplemented(_)) => 2007,
            Error::SignerError(SignerError::ProviderError(_)) => 3000,
            Error::SignerError(_) => 1001,
            Error::SignerNotConfigured(_) => 1002,
            Error::JsonError(_) => 2000,
            Error::Unauthorized => 2001,
            Error::UnknownAction(_) => 2002,
            Error::UnsupportedSignatureType(_) => 2003,
            Error::UnknownSignMethod(_) => 2004,
            Error::InvalidRequest(_) => 2005,
            Error::Custom(_) => 1099,
        };
        ErrorResponse {
            code,
            msg: self.to_string(),
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::IoError(e)
    }
}

impl From<SignerError> for Error {
    fn from(e: SignerError) -> Self {
        Error::SignerError(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::JsonError(e)
    }
}

impl std::error::Error for Error {}
