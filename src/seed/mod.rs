//! The per-device seed subsystem.
//!
//! A seed is a 32-byte secret shared by every device in a user's ring,
//! produced by the multi-party DH ceremony. From the seed,
//! per-service ownership verification keys (OVKs) are derived on demand:
//! `d = HKDF-SHA256(ikm = seed, salt = r)` treated as a P-256 scalar. The
//! OVK private half never leaves this module.
//!
//! Rotation keeps the previous seed alongside the new one until the caller
//! has seen the service acknowledge the rotation, then commits.

mod negotiate;

use std::collections::BTreeMap;

use p256::elliptic_curve::ops::Reduce;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::crypto::sign::SIGNATURE_LEN;
use crate::crypto::{kdf, mac, sign, CryptoError};
use crate::jwk::{EcPublicJwk, JwkError};

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("update flag inconsistent with held seeds")]
    InvalidState,
    #[error("negotiation metadata changed between rounds")]
    MetaMismatch,
    #[error("no completed negotiation, nothing to derive from")]
    NoSeed,
    #[error("no previous seed to rotate from")]
    NotUpdating,
    #[error("jwk: {0}")]
    Jwk(#[from] JwkError),
    #[error("crypto: {0}")]
    Crypto(#[from] CryptoError),
}

/// Identity of one negotiation ceremony as seen by one device. Must stay
/// constant across rounds; `partner_id` names the ring neighbour this device
/// consumes DH material from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationMeta {
    pub id: String,
    pub partner_id: String,
    pub dev_num: u32,
}

/// The two step-indexed key maps a negotiation round works from: what this
/// device has published so far (`mine`) and the partner's latest (`partner`).
#[derive(Debug, Clone, Default)]
pub struct EpkMaps {
    pub mine: BTreeMap<u32, EcPublicJwk>,
    pub partner: BTreeMap<u32, EcPublicJwk>,
}

#[derive(Debug)]
pub struct NegotiationProgress {
    pub completion: bool,
    pub epk: BTreeMap<u32, EcPublicJwk>,
}

/// Seed operations as the device orchestration sees them.
pub trait Seed {
    fn negotiate(
        &mut self,
        meta: &NegotiationMeta,
        epk: Option<&EpkMaps>,
        update: bool,
    ) -> Result<NegotiationProgress, SeedError>;

    /// Public half of the OVK derived from the current seed with salt `r`.
    fn derive_ovk(&self, r: &[u8]) -> Result<EcPublicJwk, SeedError>;

    /// Binding MAC: `HMAC-SHA256(OVK.d, r || service_id)`.
    fn mac_ovk(&self, r: &[u8], service_id: &str) -> Result<[u8; 32], SeedError>;

    fn verify_ovk(&self, r: &[u8], service_id: &str, tag: &[u8]) -> Result<bool, SeedError>;

    /// ECDSA signature by the OVK over an arbitrary message.
    fn sign_ovk(&self, r: &[u8], message: &[u8]) -> Result<[u8; SIGNATURE_LEN], SeedError>;

    /// Rotation cross-signature: sign the canonical JSON of the next OVK's
    /// public key with the OVK derived from the *previous* seed under
    /// `prev_r`.
    fn update(&self, prev_r: &[u8], next_ovk: &EcPublicJwk)
        -> Result<[u8; SIGNATURE_LEN], SeedError>;

    fn is_updating(&self) -> bool;

    /// Drop superseded seeds once the rotation has been acknowledged.
    fn commit_update(&mut self) -> Result<(), SeedError>;
}

struct Ephemeral {
    meta: NegotiationMeta,
    sk: p256::SecretKey,
    idx: usize,
}

/// Seed state negotiated over a device ring.
pub struct RingSeed {
    seeds: Vec<Zeroizing<[u8; 32]>>,
    ephemeral: Option<Ephemeral>,
}

impl RingSeed {
    pub fn new() -> Self {
        Self {
            seeds: Vec::new(),
            ephemeral: None,
        }
    }

    /// Start from already-established seed material (imported state, or the
    /// artificial single-party seeds used in tests and demos).
    pub fn from_seeds(seeds: Vec<[u8; 32]>) -> Self {
        Self {
            seeds: seeds.into_iter().map(Zeroizing::new).collect(),
            ephemeral: None,
        }
    }

    pub fn seed_count(&self) -> usize {
        self.seeds.len()
    }

    /// Copy of the most recent seed, for cross-device comparison.
    pub fn current_seed(&self) -> Option<[u8; 32]> {
        self.seeds.last().map(|s| **s)
    }

    fn current(&self) -> Result<&[u8; 32], SeedError> {
        self.seeds.last().map(|s| &**s).ok_or(SeedError::NoSeed)
    }

    fn previous(&self) -> Result<&[u8; 32], SeedError> {
        if self.seeds.len() < 2 {
            return Err(SeedError::NotUpdating);
        }
        Ok(&self.seeds[self.seeds.len() - 2])
    }
}

impl Default for RingSeed {
    fn default() -> Self {
        Self::new()
    }
}

impl Seed for RingSeed {
    fn negotiate(
        &mut self,
        meta: &NegotiationMeta,
        epk: Option<&EpkMaps>,
        update: bool,
    ) -> Result<NegotiationProgress, SeedError> {
        negotiate::advance(self, meta, epk, update)
    }

    fn derive_ovk(&self, r: &[u8]) -> Result<EcPublicJwk, SeedError> {
        let sk = ovk_secret(self.current()?, r)?;
        Ok(EcPublicJwk::from_public_key(&sk.public_key()))
    }

    fn mac_ovk(&self, r: &[u8], service_id: &str) -> Result<[u8; 32], SeedError> {
        let sk = ovk_secret(self.current()?, r)?;
        let key = Zeroizing::new(sk.to_bytes());
        let mut message = r.to_vec();
        message.extend_from_slice(service_id.as_bytes());
        Ok(mac::hmac_sha256(&key, &message))
    }

    fn verify_ovk(&self, r: &[u8], service_id: &str, tag: &[u8]) -> Result<bool, SeedError> {
        let expected = self.mac_ovk(r, service_id)?;
        Ok(expected[..].ct_eq(tag).into())
    }

    fn sign_ovk(&self, r: &[u8], message: &[u8]) -> Result<[u8; SIGNATURE_LEN], SeedError> {
        let sk = ovk_secret(self.current()?, r)?;
        Ok(sign::sign(&sk, message))
    }

    fn update(
        &self,
        prev_r: &[u8],
        next_ovk: &EcPublicJwk,
    ) -> Result<[u8; SIGNATURE_LEN], SeedError> {
        let sk = ovk_secret(self.previous()?, prev_r)?;
        let message = next_ovk.canonical_json()?;
        Ok(sign::sign(&sk, message.as_bytes()))
    }

    fn is_updating(&self) -> bool {
        self.seeds.len() > 1
    }

    fn commit_update(&mut self) -> Result<(), SeedError> {
        if self.seeds.len() < 2 {
            return Err(SeedError::NotUpdating);
        }
        let retained = self.seeds.len() - 1;
        self.seeds.drain(..retained);
        tracing::debug!("previous seed dropped after rotation acknowledgement");
        Ok(())
    }
}

/// OVK private key: HKDF output reduced into a P-256 scalar.
fn ovk_secret(seed: &[u8; 32], r: &[u8]) -> Result<p256::SecretKey, SeedError> {
    let mut okm = Zeroizing::new([0u8; 32]);
    kdf::hkdf_sha256(seed, r, b"", &mut okm[..])?;
    let scalar = p256::Scalar::reduce_bytes(p256::FieldBytes::from_slice(&okm[..]));
    let bytes = Zeroizing::new(scalar.to_bytes());
    p256::SecretKey::from_bytes(&bytes).map_err(|_| SeedError::Crypto(CryptoError::InvalidScalar))
}
