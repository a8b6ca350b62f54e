//! AES-128-GCM with detached tags, and AES Key Wrap (RFC 3394).

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::AeadInPlace;
use aes_gcm::{Aes128Gcm, KeyInit, Nonce};

use super::CryptoError;

pub const GCM_KEY_LEN: usize = 16;
pub const GCM_IV_LEN: usize = 12;
pub const GCM_TAG_LEN: usize = 16;
pub const KW_WRAPPED_LEN: usize = 24;

pub fn aes128_gcm_seal(
    key: &[u8; GCM_KEY_LEN],
    iv: &[u8; GCM_IV_LEN],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<(Vec<u8>, [u8; GCM_TAG_LEN]), CryptoError> {
    let cipher = Aes128Gcm::new(GenericArray::from_slice(key));
    let mut buf = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(iv), aad, &mut buf)
        .map_err(|_| CryptoError::Encrypt)?;
    Ok((buf, tag.into()))
}

pub fn aes128_gcm_open(
    key: &[u8; GCM_KEY_LEN],
    iv: &[u8; GCM_IV_LEN],
    aad: &[u8],
    ciphertext: &[u8],
    tag: &[u8; GCM_TAG_LEN],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes128Gcm::new(GenericArray::from_slice(key));
    let mut buf = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(iv),
            aad,
            &mut buf,
            GenericArray::from_slice(tag),
        )
        .map_err(|_| CryptoError::Decrypt)?;
    Ok(buf)
}

/// Wrap a 128-bit content key under a 128-bit KEK (RFC 3394).
pub fn aes_kw_wrap(
    kek: &[u8; GCM_KEY_LEN],
    cek: &[u8; GCM_KEY_LEN],
) -> Result<[u8; KW_WRAPPED_LEN], CryptoError> {
    let kek = aes_kw::KekAes128::new(GenericArray::from_slice(kek));
    let mut out = [0u8; KW_WRAPPED_LEN];
    kek.wrap(cek, &mut out).map_err(|_| CryptoError::Encrypt)?;
    Ok(out)
}

pub fn aes_kw_unwrap(
    kek: &[u8; GCM_KEY_LEN],
    wrapped: &[u8],
) -> Result<[u8; GCM_KEY_LEN], CryptoError> {
    if wrapped.len() != KW_WRAPPED_LEN {
        return Err(CryptoError::Decrypt);
    }
    let kek = aes_kw::KekAes128::new(GenericArray::from_slice(kek));
    let mut out = [0u8; GCM_KEY_LEN];
    kek.unwrap(wrapped, &mut out).map_err(|_| CryptoError::Decrypt)?;
    Ok(out)
}
