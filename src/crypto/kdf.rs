//! HKDF-SHA256 and PBKDF2-HMAC-SHA256.

use hkdf::Hkdf;
use sha2::Sha256;

use super::CryptoError;

/// HKDF-SHA256 (extract + expand) into `out`. An empty `salt` selects the
/// RFC 5869 default (a zeroed hash-length key).
pub fn hkdf_sha256(
    ikm: &[u8],
    salt: &[u8],
    info: &[u8],
    out: &mut [u8],
) -> Result<(), CryptoError> {
    let salt = if salt.is_empty() { None } else { Some(salt) };
    Hkdf::<Sha256>::new(salt, ikm)
        .expand(info, out)
        .map_err(|_| CryptoError::KeyDerivation)
}

pub fn pbkdf2_hmac_sha256(password: &[u8], salt: &[u8], iterations: u32, out: &mut [u8]) {
    pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, out);
}
