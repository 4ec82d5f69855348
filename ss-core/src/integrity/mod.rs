//! Integrity: content hashing shared by server and client, plus signature
//! checks against the fixed verifying key.

pub mod keyfile;
mod signature;

use std::fs::File;
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};

pub use keyfile::KeyFileError;
pub use signature::{Signature, SigningKey, VerifyingKey, SEED_LEN};

use crate::protocol::HASH_LEN;

/// Digest used for every content hash on both sides of the protocol.
pub const CONTENT_HASH_ALGORITHM: &str = "sha256";

/// Why a signed unit was not trusted. The protocol rejects on either; they stay
/// distinct so callers and tests can tell them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("content hash does not match data")]
    HashMismatch,
    #[error("signature verification failed")]
    BadSignature,
    #[error("malformed verifying key")]
    MalformedKey,
}

/// SHA-256 of a served file's contents, as announced in negotiation and
/// carried in every packet.
pub fn hash_content(contents: &[u8]) -> [u8; HASH_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(contents);
    hasher.finalize().into()
}

/// Hash a file by streaming it through the digest.
pub fn hash_file(path: &Path) -> io::Result<[u8; HASH_LEN]> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().into())
}

/// True when `contents` is exactly the file the digest was taken from.
pub fn verify_content(contents: &[u8], digest: &[u8; HASH_LEN]) -> bool {
    hash_content(contents) == *digest
}

/// Both checks, hash first: the data must hash to `hash` and `signature` must be
/// valid over `hash` under `key`.
pub fn verify_signed(
    payload: &[u8],
    hash: &[u8; HASH_LEN],
    signature: &Signature,
    key: &VerifyingKey,
) -> Result<(), VerifyError> {
    if !verify_content(payload, hash) {
        return Err(VerifyError::HashMismatch);
    }
    key.verify(hash, signature)
}
