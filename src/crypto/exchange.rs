//! ECDH P-256.
//!
//! The negotiation protocol chains DH results: an intermediate hop reuses
//! the full shared point as the next hop's public key, so this module
//! exposes the point itself, not just the X coordinate.

use p256::elliptic_curve::sec1::ToEncodedPoint;

use super::CryptoError;

/// `secret · public` as a full curve point. Fails on the identity.
pub fn shared_point(
    public: &p256::PublicKey,
    secret: &p256::SecretKey,
) -> Result<p256::PublicKey, CryptoError> {
    let scalar = secret.to_nonzero_scalar();
    let product = public.to_projective() * *scalar;
    p256::PublicKey::from_affine(product.to_affine()).map_err(|_| CryptoError::IdentityPoint)
}

/// The X coordinate of the shared point as 32 big-endian bytes. This is the
/// final-hop form: the value that becomes the shared seed.
pub fn shared_x(
    public: &p256::PublicKey,
    secret: &p256::SecretKey,
) -> Result<[u8; 32], CryptoError> {
    let point = shared_point(public, secret)?.to_encoded_point(false);
    let x = point.x().ok_or(CryptoError::IdentityPoint)?;
    Ok((*x).into())
}
