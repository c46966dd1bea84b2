//! The object identifiers used in CMS SignedData structures.

use bcder::{ConstOid, Oid};

/// 1.2.840.113549.1.7.2: the CMS signed-data content type.
pub const SIGNED_DATA: ConstOid = Oid(&[42, 134, 72, 134, 247, 13, 1, 7, 2]);

/// 1.2.840.113549.1.7.1: plain data, used as the encapsulated content
/// type of a detached signature.
pub const ID_DATA: ConstOid = Oid(&[42, 134, 72, 134, 247, 13, 1, 7, 1]);

/// 1.2.840.113549.1.9.3: the content-type signed attribute.
pub const CONTENT_TYPE: ConstOid = Oid(&[42, 134, 72, 134, 247, 13, 1, 9, 3]);

/// 1.2.840.113549.1.9.4: the message-digest signed attribute.
pub const MESSAGE_DIGEST: ConstOid = Oid(&[42, 134, 72, 134, 247, 13, 1, 9, 4]);

/// 1.2.840.113549.1.9.5: the signing-time signed attribute.
pub const SIGNING_TIME: ConstOid = Oid(&[42, 134, 72, 134, 247, 13, 1, 9, 5]);

/// 1.2.840.113549.1.1.1: rsaEncryption, the signature algorithm
/// identifier used in SignerInfo for RSASSA-PKCS1-v1.5 signatures.
pub const RSA_ENCRYPTION: ConstOid = Oid(&[42, 134, 72, 134, 247, 13, 1, 1, 1]);

/// 2.16.840.1.101.3.4.2.1: SHA-256.
pub const SHA256: ConstOid = Oid(&[96, 134, 72, 1, 101, 3, 4, 2, 1]);

/// 2.16.840.1.101.3.4.2.2: SHA-384.
pub const SHA384: ConstOid = Oid(&[96, 134, 72, 1, 101, 3, 4, 2, 2]);

/// 2.16.840.1.101.3.4.2.3: SHA-512.
pub const SHA512: ConstOid = Oid(&[96, 134, 72, 1, 101, 3, 4, 2, 3]);
