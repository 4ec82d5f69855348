//! Schnorr signatures over the Decaf448 group.
//!
//! Verifying key: compressed `a·G` (56 bytes). Signature: `R || s` where `R`
//! is a compressed point and `s` a canonical little-endian scalar, accepted iff
//! `s·G - e·A == R` with `e = H(R || A || msg)`. Nonces are derived
//! deterministically from the seed and the message.

use ed448_goldilocks::decaf::{CompressedDecaf, DecafPoint};
use ed448_goldilocks::Scalar;
use rand::{CryptoRng, RngCore};
use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::Shake256;

use super::VerifyError;
use crate::protocol::{PUBLIC_KEY_LEN, SIGNATURE_LEN};

const KEY_TAG: &[u8] = b"ssproto-sign-key";
const NONCE_TAG: &[u8] = b"ssproto-sign-nonce";
const CHALLENGE_TAG: &[u8] = b"ssproto-sign-challenge";

/// Signing seed length in bytes.
pub const SEED_LEN: usize = 56;

const POINT_LEN: usize = 56;

/// SHAKE256 over the concatenated parts, 114 bytes reduced mod the group order.
fn hash_to_scalar(parts: &[&[u8]]) -> Scalar {
    let mut hasher = Shake256::default();
    for part in parts {
        hasher.update(part);
    }
    let mut wide = [0u8; 114];
    hasher.finalize_xof().read(&mut wide);
    Scalar::from_bytes_mod_order_wide(&wide)
}

/// Strict scalar decoding: values at or above the group order are refused.
fn decode_scalar(bytes: &[u8]) -> Option<Scalar> {
    let mut padded = [0u8; POINT_LEN + 1];
    padded[..POINT_LEN].copy_from_slice(bytes);
    Scalar::from_canonical_bytes(padded)
}

fn commit(k: &Scalar) -> CompressedDecaf {
    (&DecafPoint::generator() * k).compress()
}

/// 112-byte detached signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; SIGNATURE_LEN]);

impl Signature {
    pub fn from_bytes(bytes: [u8; SIGNATURE_LEN]) -> Self {
        Signature(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LEN] {
        &self.0
    }
}

/// Fixed public key every signed unit is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyingKey(CompressedDecaf);

impl VerifyingKey {
    /// Parse a 56-byte key. Fails unless it is the canonical encoding of a
    /// group element other than the identity.
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_LEN]) -> Result<Self, VerifyError> {
        let compressed = CompressedDecaf(bytes);
        if compressed == CompressedDecaf::identity() || compressed.decompress().is_none() {
            return Err(VerifyError::MalformedKey);
        }
        Ok(Self(compressed))
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0 .0
    }

    /// Verify `signature` over `msg` (in practice, a content hash).
    pub fn verify(&self, msg: &[u8], signature: &Signature) -> Result<(), VerifyError> {
        let (r_bytes, s_bytes) = signature.0.split_at(POINT_LEN);
        let s = decode_scalar(s_bytes).ok_or(VerifyError::BadSignature)?;
        let public = self.0.decompress().ok_or(VerifyError::MalformedKey)?;
        let e = hash_to_scalar(&[CHALLENGE_TAG, r_bytes, self.as_bytes(), msg]);
        let expected = &(&DecafPoint::generator() * &s) - &(&public * &e);
        if expected.compress().as_bytes() != r_bytes {
            return Err(VerifyError::BadSignature);
        }
        Ok(())
    }
}

/// Secret half of the signing pair. The server holds it; clients only verify.
pub struct SigningKey {
    seed: [u8; SEED_LEN],
    scalar: Scalar,
    public: VerifyingKey,
}

impl SigningKey {
    /// Derive the key pair deterministically from a seed.
    pub fn from_seed(seed: [u8; SEED_LEN]) -> Self {
        let scalar = hash_to_scalar(&[KEY_TAG, &seed]);
        let public = VerifyingKey(commit(&scalar));
        Self {
            seed,
            scalar,
            public,
        }
    }

    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut seed = [0u8; SEED_LEN];
        rng.fill_bytes(&mut seed);
        Self::from_seed(seed)
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.public
    }

    /// The secret seed, for writing a freshly generated key to disk.
    pub fn seed(&self) -> &[u8; SEED_LEN] {
        &self.seed
    }

    pub fn sign(&self, msg: &[u8]) -> Signature {
        let k = hash_to_scalar(&[NONCE_TAG, &self.seed, msg]);
        let r = commit(&k);
        let e = hash_to_scalar(&[CHALLENGE_TAG, r.as_bytes(), self.public.as_bytes(), msg]);
        let s = k + e * self.scalar;
        let mut out = [0u8; SIGNATURE_LEN];
        out[..POINT_LEN].copy_from_slice(r.as_bytes());
        out[POINT_LEN..].copy_from_slice(&s.to_bytes());
        Signature(out)
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::hash_content;

    fn fixed_key() -> SigningKey {
        let mut seed = [0u8; SEED_LEN];
        for (i, b) in seed.iter_mut().enumerate() {
            *b = i as u8;
        }
        SigningKey::from_seed(seed)
    }

    fn msg() -> [u8; 32] {
        hash_content(b"ssproto signed unit")
    }

    #[test]
    fn sign_verify_with_generated_key() {
        let sk = SigningKey::generate(&mut rand::thread_rng());
        let msg = hash_content(b"payload");
        let sig = sk.sign(&msg);
        sk.verifying_key().verify(&msg, &sig).unwrap();
    }

    #[test]
    fn signing_is_deterministic_per_seed_and_message() {
        let a = fixed_key();
        let b = fixed_key();
        assert_eq!(a.verifying_key(), b.verifying_key());
        assert_eq!(a.sign(&msg()), b.sign(&msg()));
        assert_ne!(a.sign(&msg()), a.sign(&hash_content(b"other")));
    }

    #[test]
    fn published_key_bytes_parse_back() {
        let sk = fixed_key();
        let vk = VerifyingKey::from_bytes(*sk.verifying_key().as_bytes()).unwrap();
        vk.verify(&msg(), &sk.sign(&msg())).unwrap();
    }

    #[test]
    fn any_corrupted_signature_byte_rejected() {
        let sk = fixed_key();
        let sig = sk.sign(&msg());
        for i in 0..SIGNATURE_LEN {
            let mut bytes = *sig.as_bytes();
            bytes[i] ^= 0x01;
            assert_eq!(
                sk.verifying_key().verify(&msg(), &Signature(bytes)),
                Err(VerifyError::BadSignature),
                "byte {i}"
            );
        }
    }

    #[test]
    fn non_canonical_scalar_rejected() {
        let sk = fixed_key();
        let mut bytes = *sk.sign(&msg()).as_bytes();
        bytes[SIGNATURE_LEN - 1] = 0xff;
        assert_eq!(
            sk.verifying_key().verify(&msg(), &Signature(bytes)),
            Err(VerifyError::BadSignature)
        );
    }

    #[test]
    fn corrupted_message_rejected() {
        let sk = fixed_key();
        let sig = sk.sign(&msg());
        let mut m = msg();
        m[3] ^= 0x80;
        assert_eq!(sk.verifying_key().verify(&m, &sig), Err(VerifyError::BadSignature));
    }

    #[test]
    fn other_key_rejected() {
        let sig = fixed_key().sign(&msg());
        let other = SigningKey::generate(&mut rand::thread_rng());
        assert!(other.verifying_key().verify(&msg(), &sig).is_err());
    }

    #[test]
    fn malformed_key_rejected() {
        assert_eq!(
            VerifyingKey::from_bytes([0xff; PUBLIC_KEY_LEN]),
            Err(VerifyError::MalformedKey)
        );
        assert_eq!(
            VerifyingKey::from_bytes([0; PUBLIC_KEY_LEN]),
            Err(VerifyError::MalformedKey)
        );
    }
}
