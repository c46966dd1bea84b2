//! The _signd_ library crate.
//!
//! signd signs documents on behalf of authorized callers. A request
//! names a signing backend (local private key, PKCS#11 HSM, or one of
//! two remote signing providers) and an action: a raw RSASSA-PKCS1-v1.5
//! signature, a detached CMS/PKCS#7 SignedData container, or retrieval
//! of the certificate chain needed to validate either.

pub mod api;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod daemon;
pub mod error;

pub use crate::error::Error;

/// Convenience type for results on which our error type is used.
pub type SigndResult<T> = Result<T, Error>;
