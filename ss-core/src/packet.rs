//! Signed transfer unit: `hash(32) || signature(112) || pathLen(8) || path || blobLen(8) || blob`.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::integrity::{self, Signature, SigningKey, VerifyError, VerifyingKey};
use crate::protocol::{Limits, HASH_LEN, SIGNATURE_LEN};
use crate::wire::{self, FramingError};

/// A file together with its content hash and a signature over that hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub hash: [u8; HASH_LEN],
    pub signature: Signature,
    pub file_path: String,
    pub blob: Vec<u8>,
}

impl Packet {
    /// Hash `blob` and sign the hash.
    pub fn seal(file_path: impl Into<String>, blob: Vec<u8>, key: &SigningKey) -> Self {
        let hash = integrity::hash_content(&blob);
        let signature = key.sign(&hash);
        Self {
            hash,
            signature,
            file_path: file_path.into(),
            blob,
        }
    }

    /// Trusted only if the blob hashes to `hash` and the signature holds under `key`.
    pub fn verify(&self, key: &VerifyingKey) -> Result<(), VerifyError> {
        integrity::verify_signed(&self.blob, &self.hash, &self.signature, key)
    }
}

pub async fn write_packet<W: AsyncWrite + Unpin>(
    w: &mut W,
    packet: &Packet,
) -> Result<(), FramingError> {
    wire::write_array(w, &packet.hash).await?;
    wire::write_array(w, packet.signature.as_bytes()).await?;
    wire::write_bytes(w, packet.file_path.as_bytes()).await?;
    wire::write_bytes(w, &packet.blob).await
}

pub async fn read_packet<R: AsyncRead + Unpin>(
    r: &mut R,
    limits: &Limits,
) -> Result<Packet, FramingError> {
    let hash = wire::read_array::<_, HASH_LEN>(r).await?;
    read_after_hash(r, hash, limits).await
}

/// Next packet of a transfer. The transfer has no count or terminator: the
/// server closes the stream after the last packet, which yields `Ok(None)`.
pub async fn read_next_packet<R: AsyncRead + Unpin>(
    r: &mut R,
    limits: &Limits,
) -> Result<Option<Packet>, FramingError> {
    match wire::read_array_or_eof::<_, HASH_LEN>(r).await? {
        Some(hash) => Ok(Some(read_after_hash(r, hash, limits).await?)),
        None => Ok(None),
    }
}

async fn read_after_hash<R: AsyncRead + Unpin>(
    r: &mut R,
    hash: [u8; HASH_LEN],
    limits: &Limits,
) -> Result<Packet, FramingError> {
    let signature = wire::read_array::<_, SIGNATURE_LEN>(r).await?;
    let file_path = wire::read_string(r, limits.max_path_len).await?;
    let blob = wire::read_bytes(r, limits.max_blob_len).await?;
    Ok(Packet {
        hash,
        signature: Signature::from_bytes(signature),
        file_path,
        blob,
    })
}
