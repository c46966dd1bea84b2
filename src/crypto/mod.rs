//! Cryptographic support for signd: digests, CMS/PKCS#7 structures and
//! the pluggable signing backends.

pub mod cms;
pub mod digest;
pub mod dispatch;
pub mod oid;
pub mod signers;

pub use self::cms::{SignDigest, SignedData, SignedDataBuilder};
pub use self::digest::{encode_digest_info, DigestAlgorithm};
pub use self::dispatch::registry::SignerRegistry;
pub use self::dispatch::signerprovider::SignerProvider;
pub use self::dispatch::signerrouter::SignerRouter;
pub use self::signers::error::SignerError;
