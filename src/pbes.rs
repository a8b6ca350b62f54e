//! Password-based compact envelope: PBES2-HS256+A128KW with A128GCM.
//!
//! Protects the seed-negotiation payload in transit between devices under a
//! password shared out-of-band. Wire form is the dotted 5-segment compact
//! serialization `header.ek.iv.ct.tag`, each segment base64url without
//! padding.

use serde::{Deserialize, Serialize};

use crate::b64u;
use crate::crypto::aead::{self, GCM_IV_LEN, GCM_KEY_LEN, GCM_TAG_LEN};
use crate::crypto::{self, kdf};

pub const ALG: &str = "PBES2-HS256+A128KW";
pub const ENC: &str = "A128GCM";
const PBKDF2_ITERATIONS: u32 = 1000;
const SALT_INPUT_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum PbesError {
    #[error("malformed envelope: {0}")]
    Format(&'static str),
    #[error("decryption failed")]
    Decrypt,
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    enc: String,
    p2c: u32,
    p2s: String,
}

/// Seal `plaintext` under `password`.
pub fn encrypt(password: &str, plaintext: &[u8]) -> String {
    let p2s: [u8; SALT_INPUT_LEN] = crypto::random_bytes();
    let header = Header {
        alg: ALG.to_string(),
        enc: ENC.to_string(),
        p2c: PBKDF2_ITERATIONS,
        p2s: b64u::encode(&p2s),
    };
    let header_b64u = b64u::encode(
        serde_json::to_string(&header)
            .expect("header serialization is infallible")
            .as_bytes(),
    );

    let kek = derive_kek(password, &p2s, PBKDF2_ITERATIONS);
    let cek: [u8; GCM_KEY_LEN] = crypto::random_bytes();
    let wrapped = aead::aes_kw_wrap(&kek, &cek).expect("fixed-size key wrap cannot fail");

    let iv: [u8; GCM_IV_LEN] = crypto::random_bytes();
    let (ciphertext, tag) = aead::aes128_gcm_seal(&cek, &iv, header_b64u.as_bytes(), plaintext)
        .expect("in-memory seal cannot fail");

    [
        header_b64u,
        b64u::encode(&wrapped),
        b64u::encode(&iv),
        b64u::encode(&ciphertext),
        b64u::encode(&tag),
    ]
    .join(".")
}

/// Open a compact envelope. Shape problems are `Format`; anything that
/// touches key unwrap or the AEAD and fails is `Decrypt`.
pub fn decrypt(password: &str, compact: &str) -> Result<Vec<u8>, PbesError> {
    let segments: Vec<&str> = compact.split('.').collect();
    let [header_b64u, ek, iv, ct, tag] = segments.as_slice() else {
        return Err(PbesError::Format("expected 5 segments"));
    };

    let header_json =
        b64u::decode(header_b64u).map_err(|_| PbesError::Format("header encoding"))?;
    let header: Header =
        serde_json::from_slice(&header_json).map_err(|_| PbesError::Format("header JSON"))?;
    if header.alg != ALG || header.enc != ENC {
        return Err(PbesError::Format("unsupported algorithm"));
    }
    let p2s = b64u::decode(&header.p2s).map_err(|_| PbesError::Format("p2s encoding"))?;

    let wrapped = b64u::decode(ek).map_err(|_| PbesError::Format("ek encoding"))?;
    let iv: [u8; GCM_IV_LEN] = b64u::decode(iv)
        .map_err(|_| PbesError::Format("iv encoding"))?
        .try_into()
        .map_err(|_| PbesError::Format("iv length"))?;
    let ciphertext = b64u::decode(ct).map_err(|_| PbesError::Format("ct encoding"))?;
    let tag: [u8; GCM_TAG_LEN] = b64u::decode(tag)
        .map_err(|_| PbesError::Format("tag encoding"))?
        .try_into()
        .map_err(|_| PbesError::Format("tag length"))?;

    let kek = derive_kek(password, &p2s, header.p2c);
    let cek = aead::aes_kw_unwrap(&kek, &wrapped).map_err(|_| PbesError::Decrypt)?;
    aead::aes128_gcm_open(&cek, &iv, header_b64u.as_bytes(), &ciphertext, &tag)
        .map_err(|_| PbesError::Decrypt)
}

/// PBES2 KEK: PBKDF2 salted with `UTF8(alg) || 0x00 || p2s`, 128-bit output.
fn derive_kek(password: &str, p2s: &[u8], iterations: u32) -> [u8; GCM_KEY_LEN] {
    let mut salt = Vec::with_capacity(ALG.len() + 1 + p2s.len());
    salt.extend_from_slice(ALG.as_bytes());
    salt.push(0x00);
    salt.extend_from_slice(p2s);

    let mut kek = [0u8; GCM_KEY_LEN];
    kdf::pbkdf2_hmac_sha256(password.as_bytes(), &salt, iterations, &mut kek);
    kek
}
