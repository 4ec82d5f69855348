//! Key files: standard base64 of the raw key bytes, surrounding whitespace ignored.
//! The server keeps the signing seed; clients ship the verifying key.

use std::io;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::signature::{SigningKey, VerifyingKey, SEED_LEN};
use crate::protocol::PUBLIC_KEY_LEN;

#[derive(Debug, thiserror::Error)]
pub enum KeyFileError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("key is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("key is {got} bytes, expected {expected}")]
    Length { expected: usize, got: usize },
    #[error("key does not encode a valid group element")]
    Malformed,
}

fn decode<const N: usize>(text: &str) -> Result<[u8; N], KeyFileError> {
    let raw = STANDARD.decode(text.trim())?;
    <[u8; N]>::try_from(raw.as_slice()).map_err(|_| KeyFileError::Length {
        expected: N,
        got: raw.len(),
    })
}

fn read(path: &Path) -> Result<String, KeyFileError> {
    std::fs::read_to_string(path).map_err(|source| KeyFileError::Read {
        path: path.to_path_buf(),
        source,
    })
}

pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn parse_signing_key(text: &str) -> Result<SigningKey, KeyFileError> {
    Ok(SigningKey::from_seed(decode::<SEED_LEN>(text)?))
}

pub fn parse_verifying_key(text: &str) -> Result<VerifyingKey, KeyFileError> {
    VerifyingKey::from_bytes(decode::<PUBLIC_KEY_LEN>(text)?).map_err(|_| KeyFileError::Malformed)
}

pub fn load_signing_key(path: &Path) -> Result<SigningKey, KeyFileError> {
    parse_signing_key(&read(path)?)
}

pub fn load_verifying_key(path: &Path) -> Result<VerifyingKey, KeyFileError> {
    parse_verifying_key(&read(path)?)
}
