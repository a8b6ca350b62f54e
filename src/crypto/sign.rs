//! ECDSA P-256 over SHA-256, fixed-width `r || s` signatures.

use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};

pub const SIGNATURE_LEN: usize = 64;

pub fn sign(key: &p256::SecretKey, message: &[u8]) -> [u8; SIGNATURE_LEN] {
    let signing_key = SigningKey::from(key);
    let signature: Signature = signing_key.sign(message);
    let mut out = [0u8; SIGNATURE_LEN];
    out.copy_from_slice(&signature.to_bytes());
    out
}

/// Returns false for malformed signatures instead of surfacing a parse error;
/// callers only branch on validity.
pub fn verify(key: &p256::PublicKey, message: &[u8], signature: &[u8]) -> bool {
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    VerifyingKey::from(key).verify(message, &signature).is_ok()
}
