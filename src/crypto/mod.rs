//! Thin wrappers over the platform crypto stack (RustCrypto).
//!
//! Everything the protocol needs is collected here so the state machines in
//! `seed`, `device` and `service` never touch a crypto crate directly.

pub mod aead;
pub mod exchange;
pub mod kdf;
pub mod mac;
pub mod sign;

use rand::RngCore;
use sha2::{Digest, Sha256};

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("key derivation failed")]
    KeyDerivation,
    #[error("derived scalar out of range")]
    InvalidScalar,
    #[error("shared point is the identity")]
    IdentityPoint,
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed")]
    Decrypt,
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Fill a fixed-size array from the system CSPRNG.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}
