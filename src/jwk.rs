//! EC P-256 JWK encoding and RFC 7638 thumbprints.
//!
//! Coordinates are base64url without padding and decode to exactly 32 bytes
//! (left-padded with zeros on encode). The thumbprint is the base64url of
//! SHA-256 over the canonical JSON `{"crv","kty","x","y"}` — that key order,
//! no whitespace — and doubles as the `kid` when none is set.

use p256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::b64u;

pub const KTY_EC: &str = "EC";
pub const CRV_P256: &str = "P-256";

#[derive(Debug, thiserror::Error)]
pub enum JwkError {
    #[error("unsupported key type: {0}")]
    KeyType(String),
    #[error("unsupported curve: {0}")]
    Curve(String),
    #[error("field {0} is not valid base64url")]
    Encoding(&'static str),
    #[error("field {0} must decode to 32 bytes")]
    FieldLength(&'static str),
    #[error("point is not on the curve")]
    NotOnCurve,
    #[error("private scalar out of range")]
    InvalidScalar,
}

/// Public EC key in JWK form. `x`/`y` stay in their wire encoding; all
/// consumers go through [`EcPublicJwk::to_public_key`], which validates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EcPublicJwk {
    pub kty: String,
    pub crv: String,
    pub x: String,
    pub y: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

impl EcPublicJwk {
    pub fn from_public_key(key: &p256::PublicKey) -> Self {
        let point = key.to_encoded_point(false);
        // Uncompressed SEC1 points always carry both coordinates.
        let x = point.x().expect("uncompressed point has x");
        let y = point.y().expect("uncompressed point has y");
        Self {
            kty: KTY_EC.to_string(),
            crv: CRV_P256.to_string(),
            x: b64u::encode(x),
            y: b64u::encode(y),
            kid: None,
        }
    }

    /// Decode and validate both coordinates.
    pub fn coordinates(&self) -> Result<([u8; 32], [u8; 32]), JwkError> {
        if self.kty != KTY_EC {
            return Err(JwkError::KeyType(self.kty.clone()));
        }
        if self.crv != CRV_P256 {
            return Err(JwkError::Curve(self.crv.clone()));
        }
        Ok((decode_coord(&self.x, "x")?, decode_coord(&self.y, "y")?))
    }

    /// Parse into a curve point, rejecting coordinates that are not on P-256.
    pub fn to_public_key(&self) -> Result<p256::PublicKey, JwkError> {
        let (x, y) = self.coordinates()?;
        let point = p256::EncodedPoint::from_affine_coordinates(&x.into(), &y.into(), false);
        Option::from(p256::PublicKey::from_encoded_point(&point)).ok_or(JwkError::NotOnCurve)
    }

    /// Canonical JSON: keys strictly `crv,kty,x,y`, no whitespace. Input
    /// coordinates are validated and re-encoded so the output is unique per
    /// point regardless of how the JWK arrived.
    pub fn canonical_json(&self) -> Result<String, JwkError> {
        let (x, y) = self.coordinates()?;
        Ok(format!(
            r#"{{"crv":"{}","kty":"{}","x":"{}","y":"{}"}}"#,
            CRV_P256,
            KTY_EC,
            b64u::encode(&x),
            b64u::encode(&y),
        ))
    }

    /// RFC 7638 thumbprint.
    pub fn thumbprint(&self) -> Result<String, JwkError> {
        let canonical = self.canonical_json()?;
        Ok(b64u::encode(&Sha256::digest(canonical.as_bytes())))
    }

    /// The explicit `kid` when present, the thumbprint otherwise.
    pub fn kid(&self) -> Result<String, JwkError> {
        match &self.kid {
            Some(kid) => Ok(kid.clone()),
            None => self.thumbprint(),
        }
    }
}

/// Pointwise equality of `{kid, crv, x, y}` with absent kids replaced by the
/// thumbprint. Malformed keys compare unequal to everything.
impl PartialEq for EcPublicJwk {
    fn eq(&self, other: &Self) -> bool {
        let (Ok(a), Ok(b)) = (self.coordinates(), other.coordinates()) else {
            return false;
        };
        let (Ok(kid_a), Ok(kid_b)) = (self.kid(), other.kid()) else {
            return false;
        };
        self.crv == other.crv && a == b && kid_a == kid_b
    }
}

impl Eq for EcPublicJwk {}

/// Private EC key in JWK form: the public fields plus the scalar `d`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EcPrivateJwk {
    pub kty: String,
    pub crv: String,
    pub x: String,
    pub y: String,
    pub d: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

impl EcPrivateJwk {
    pub fn from_secret_key(key: &p256::SecretKey) -> Self {
        let public = EcPublicJwk::from_public_key(&key.public_key());
        Self {
            kty: public.kty,
            crv: public.crv,
            x: public.x,
            y: public.y,
            d: b64u::encode(&key.to_bytes()),
            kid: None,
        }
    }

    pub fn to_secret_key(&self) -> Result<p256::SecretKey, JwkError> {
        if self.kty != KTY_EC {
            return Err(JwkError::KeyType(self.kty.clone()));
        }
        if self.crv != CRV_P256 {
            return Err(JwkError::Curve(self.crv.clone()));
        }
        let d = decode_coord(&self.d, "d")?;
        p256::SecretKey::from_slice(&d).map_err(|_| JwkError::InvalidScalar)
    }

    pub fn public(&self) -> EcPublicJwk {
        EcPublicJwk {
            kty: self.kty.clone(),
            crv: self.crv.clone(),
            x: self.x.clone(),
            y: self.y.clone(),
            kid: self.kid.clone(),
        }
    }
}

impl Drop for EcPrivateJwk {
    fn drop(&mut self) {
        self.d.zeroize();
    }
}

fn decode_coord(field: &str, name: &'static str) -> Result<[u8; 32], JwkError> {
    let bytes = b64u::decode(field).map_err(|_| JwkError::Encoding(name))?;
    bytes.try_into().map_err(|_| JwkError::FieldLength(name))
}
