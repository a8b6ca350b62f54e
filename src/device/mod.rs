//! Device orchestration: one seed, one attestation key, one credential
//! store, and the flows that tie them to a service — registration (initial
//! and seamless), challenge/response authentication, and the rotation
//! handshake piggybacked on authentication.

pub mod store;

mod negotiation;

pub use negotiation::{run_ring_ceremony, NegotiationStep};

use crate::crypto::{self, sign};
use crate::jwk::{EcPrivateJwk, EcPublicJwk, JwkError};
use crate::messages::{
    Attestation, AuthnAssertion, CredentialBundle, OvkMaterial, OvkmStatus, RegistrationProof,
    UpdateBlock,
};
use crate::pbes::PbesError;
use crate::seed::{RingSeed, Seed, SeedError};
use store::CredentialStore;

const OVK_SALT_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("ownership key MAC did not validate for this seed")]
    OvkVerifyFailed,
    #[error("no stored credential matches the service's list")]
    NoMatchingCredential,
    #[error("no negotiation in progress")]
    NotNegotiating,
    #[error("malformed negotiation payload: {0}")]
    Format(&'static str),
    #[error("ceremony: {0}")]
    Ceremony(&'static str),
    #[error("envelope: {0}")]
    Pbes(#[from] PbesError),
    #[error("seed: {0}")]
    Seed(#[from] SeedError),
    #[error("jwk: {0}")]
    Jwk(#[from] JwkError),
}

pub struct Device<S: Seed = RingSeed> {
    seed: S,
    attestation_sk: p256::SecretKey,
    attestation_jwk: EcPublicJwk,
    store: CredentialStore,
    negotiation: Option<negotiation::NegotiationSession>,
}

impl Device<RingSeed> {
    /// A blank device: fresh attestation key, no seed, no credentials.
    pub fn new() -> Self {
        Self::with_seed(RingSeed::new())
    }
}

impl Default for Device<RingSeed> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Seed> Device<S> {
    pub fn with_seed(seed: S) -> Self {
        let attestation_sk = p256::SecretKey::random(&mut rand::thread_rng());
        let attestation_jwk = EcPublicJwk::from_public_key(&attestation_sk.public_key());
        Self {
            seed,
            attestation_sk,
            attestation_jwk,
            store: CredentialStore::new(),
            negotiation: None,
        }
    }

    pub fn seed(&self) -> &S {
        &self.seed
    }

    pub fn is_updating(&self) -> bool {
        self.seed.is_updating()
    }

    pub fn credential_count(&self) -> usize {
        self.store.credential_count()
    }

    /// Register a fresh credential for `(user, service)`.
    ///
    /// Without `existing` this is the user's first registration: the device
    /// picks the per-service salt, derives the OVK and returns its material.
    /// With `existing` (salt + MAC fetched from the service) this is a
    /// seamless registration: the MAC must validate under this device's
    /// seed, and the new credential is vouched for by an OVK signature
    /// instead of fresh material.
    pub fn register(
        &mut self,
        service_id: &str,
        challenge: &[u8],
        existing: Option<&OvkMaterial>,
    ) -> Result<(CredentialBundle, RegistrationProof), DeviceError> {
        let cred_sk = p256::SecretKey::random(&mut rand::thread_rng());
        let cred_jwk = EcPublicJwk::from_public_key(&cred_sk.public_key());

        let mut atts_message = challenge.to_vec();
        atts_message.extend_from_slice(cred_jwk.canonical_json()?.as_bytes());
        let atts_sig = sign::sign(&self.attestation_sk, &atts_message);

        let proof = match existing {
            None => {
                let r: [u8; OVK_SALT_LEN] = crypto::random_bytes();
                let ovk_jwk = self.seed.derive_ovk(&r)?;
                let mac = self.seed.mac_ovk(&r, service_id)?;
                tracing::debug!(service = service_id, "initial registration material derived");
                RegistrationProof::Initial(OvkMaterial {
                    ovk_jwk,
                    r: r.to_vec(),
                    mac: mac.to_vec(),
                })
            }
            Some(material) => {
                if !self
                    .seed
                    .verify_ovk(&material.r, service_id, &material.mac)?
                {
                    return Err(DeviceError::OvkVerifyFailed);
                }
                let sig = self
                    .seed
                    .sign_ovk(&material.r, cred_jwk.canonical_json()?.as_bytes())?;
                tracing::debug!(service = service_id, "seamless registration signed");
                RegistrationProof::OvkSigned { sig: sig.to_vec() }
            }
        };

        // All checks passed; only now does the credential enter the store.
        self.store
            .add(service_id, EcPrivateJwk::from_secret_key(&cred_sk));

        Ok((
            CredentialBundle {
                jwk: cred_jwk,
                atts: Attestation {
                    sig: atts_sig.to_vec(),
                    key: self.attestation_jwk.clone(),
                },
            },
            proof,
        ))
    }

    /// Answer a challenge with a stored credential. While the seed is
    /// rotating, piggyback an update block: reuse a posted candidate OVK if
    /// one validates under this device's seed, otherwise mint fresh
    /// material, and cross-sign it with the previous seed's OVK.
    pub fn authn(
        &self,
        service_id: &str,
        challenge: &[u8],
        creds: &[EcPublicJwk],
        ovkm: &OvkmStatus,
    ) -> Result<AuthnAssertion, DeviceError> {
        let stored = self
            .store
            .find_matching(creds)
            .ok_or(DeviceError::NoMatchingCredential)?;
        let cred_sk = stored.jwk.to_secret_key()?;
        let sig = sign::sign(&cred_sk, challenge);

        let updating = if self.seed.is_updating() {
            let mut reusable = None;
            for candidate in ovkm.next.iter().flatten() {
                if self
                    .seed
                    .verify_ovk(&candidate.r, service_id, &candidate.mac)?
                {
                    reusable = Some(candidate.clone());
                    break;
                }
            }
            let material = match reusable {
                Some(material) => material,
                None => {
                    let r: [u8; OVK_SALT_LEN] = crypto::random_bytes();
                    OvkMaterial {
                        ovk_jwk: self.seed.derive_ovk(&r)?,
                        mac: self.seed.mac_ovk(&r, service_id)?.to_vec(),
                        r: r.to_vec(),
                    }
                }
            };
            let update = self.seed.update(&ovkm.current.r, &material.ovk_jwk)?;
            tracing::info!(service = service_id, "emitting rotation update");
            Some(UpdateBlock {
                update: update.to_vec(),
                ovkm: material,
            })
        } else {
            None
        };

        Ok(AuthnAssertion {
            cred_jwk: stored.jwk.public(),
            sig: sig.to_vec(),
            updating,
        })
    }

    /// External-acknowledgement hook for rotation: once the service's
    /// current OVK material validates under the *new* seed, the rotation has
    /// been adopted and the previous seed can be dropped.
    pub fn acknowledge_rotation(
        &mut self,
        service_id: &str,
        current: &OvkMaterial,
    ) -> Result<bool, DeviceError> {
        if !self.seed.is_updating() {
            return Ok(false);
        }
        if self.seed.verify_ovk(&current.r, service_id, &current.mac)? {
            self.seed.commit_update()?;
            tracing::info!(service = service_id, "rotation acknowledged");
            return Ok(true);
        }
        Ok(false)
    }
}
