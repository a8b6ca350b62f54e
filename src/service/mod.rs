//! The service side: challenge issuance, credential registration, and
//! challenge/response authentication with OVK migration.
//!
//! Internally every refusal has a typed cause; at the public boundary
//! register/authn/delete collapse to a bare boolean, with the cause logged.
//! Operations for one user run under `&mut self` and are therefore
//! serialized; there is no cross-call state outside this struct.

pub mod clock;
pub mod cred_manager;

use std::collections::HashMap;

use crate::crypto::{self, sign};
use crate::jwk::JwkError;
use crate::messages::{
    AuthnRequest, RegistrationProof, RegistrationRequest, StartAuthnResponse, UpdateBlock,
};
use clock::{Clock, SystemClock};
use cred_manager::CredManager;

const CHALLENGE_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("attestation signature rejected")]
    BadAttestation,
    #[error("signature under the trusted ownership key rejected")]
    BadOvkSignature,
    #[error("credential signature rejected")]
    BadSignature,
    #[error("no pending challenge")]
    NoChallenge,
    #[error("unknown user")]
    UnknownUser,
    #[error("ownership key material supplied for an existing user")]
    DoubleInit,
    #[error("registration locked during key migration")]
    RegistrationLocked,
    #[error("credential not registered")]
    UnknownCredential,
    #[error("jwk: {0}")]
    Jwk(#[from] JwkError),
}

pub struct Service<C: Clock = SystemClock> {
    users: HashMap<String, CredManager>,
    challenges: HashMap<String, Vec<[u8; CHALLENGE_LEN]>>,
    clock: C,
}

impl Service<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for Service<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> Service<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            users: HashMap::new(),
            challenges: HashMap::new(),
            clock,
        }
    }

    /// Issue a fresh one-shot challenge. Known users also get their
    /// credential list and current OVK view so a device can pick a
    /// credential and detect a pending migration.
    pub fn start_authn(&mut self, username: &str) -> StartAuthnResponse {
        let challenge: [u8; CHALLENGE_LEN] = crypto::random_bytes();
        self.challenges
            .entry(username.to_string())
            .or_default()
            .push(challenge);

        let now = self.clock.now_ms();
        match self.users.get_mut(username) {
            Some(manager) => {
                let (creds, ovkm) = manager.creds_view(now);
                StartAuthnResponse {
                    challenge: challenge.to_vec(),
                    creds: Some(creds),
                    ovkm: Some(ovkm),
                }
            }
            None => StartAuthnResponse {
                challenge: challenge.to_vec(),
                creds: None,
                ovkm: None,
            },
        }
    }

    pub fn register(&mut self, request: &RegistrationRequest) -> bool {
        match self.register_internal(request) {
            Ok(()) => {
                tracing::info!(username = %request.username, "registration accepted");
                true
            }
            Err(cause) => {
                tracing::debug!(username = %request.username, %cause, "registration refused");
                false
            }
        }
    }

    pub fn authn(&mut self, request: &AuthnRequest) -> bool {
        match self.authn_internal(request) {
            Ok(()) => {
                tracing::info!(username = %request.username, "authentication accepted");
                true
            }
            Err(cause) => {
                tracing::debug!(username = %request.username, %cause, "authentication refused");
                false
            }
        }
    }

    /// Drop the user's state unconditionally.
    pub fn delete(&mut self, username: &str) -> bool {
        let existed = self.users.remove(username).is_some();
        self.challenges.remove(username);
        tracing::info!(username, existed, "user state dropped");
        true
    }

    /// Read-only view for drivers and tests.
    pub fn user(&self, username: &str) -> Option<&CredManager> {
        self.users.get(username)
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    fn register_internal(&mut self, request: &RegistrationRequest) -> Result<(), ServiceError> {
        let challenge = self.pop_challenge(&request.username)?;

        // Attestation covers challenge || canonical JSON of the credential.
        let atts_key = request.cred.atts.key.to_public_key()?;
        let mut message = challenge.to_vec();
        message.extend_from_slice(request.cred.jwk.canonical_json()?.as_bytes());
        if !sign::verify(&atts_key, &message, &request.cred.atts.sig) {
            return Err(ServiceError::BadAttestation);
        }

        let now = self.clock.now_ms();
        match self.users.get_mut(&request.username) {
            None => match &request.ovkm {
                RegistrationProof::Initial(material) => {
                    self.users.insert(
                        request.username.clone(),
                        CredManager::init(request.cred.jwk.clone(), material.clone()),
                    );
                    Ok(())
                }
                // A signature proves nothing without a registered OVK.
                RegistrationProof::OvkSigned { .. } => Err(ServiceError::UnknownUser),
            },
            Some(manager) => match &request.ovkm {
                RegistrationProof::Initial(_) => Err(ServiceError::DoubleInit),
                RegistrationProof::OvkSigned { sig } => {
                    if manager.is_updating(now) {
                        return Err(ServiceError::RegistrationLocked);
                    }
                    let trusted = manager.ovkm().ovk_jwk.to_public_key()?;
                    let message = request.cred.jwk.canonical_json()?;
                    if !sign::verify(&trusted, message.as_bytes(), sig) {
                        return Err(ServiceError::BadOvkSignature);
                    }
                    manager.add(request.cred.jwk.clone())
                }
            },
        }
    }

    fn authn_internal(&mut self, request: &AuthnRequest) -> Result<(), ServiceError> {
        if let Some(block) = &request.updating {
            self.update_internal(&request.username, request, block)?;
        }

        let challenge = self.pop_challenge(&request.username)?;
        let manager = self
            .users
            .get(&request.username)
            .ok_or(ServiceError::UnknownUser)?;
        if !manager.contains_cred(&request.cred_jwk) {
            return Err(ServiceError::UnknownCredential);
        }

        let key = request.cred_jwk.to_public_key()?;
        if !sign::verify(&key, &challenge, &request.sig) {
            return Err(ServiceError::BadSignature);
        }
        Ok(())
    }

    /// Apply a rotation update: the next OVK material must be cross-signed
    /// by the currently trusted OVK.
    fn update_internal(
        &mut self,
        username: &str,
        request: &AuthnRequest,
        block: &UpdateBlock,
    ) -> Result<(), ServiceError> {
        let now = self.clock.now_ms();
        let manager = self.users.get_mut(username).ok_or(ServiceError::UnknownUser)?;

        let trusted = manager.ovkm().ovk_jwk.to_public_key()?;
        let message = block.ovkm.ovk_jwk.canonical_json()?;
        if !sign::verify(&trusted, message.as_bytes(), &block.update) {
            return Err(ServiceError::BadOvkSignature);
        }
        manager.add_updating(&request.cred_jwk, &block.ovkm, now)
    }

    fn pop_challenge(&mut self, username: &str) -> Result<[u8; CHALLENGE_LEN], ServiceError> {
        self.challenges
            .get_mut(username)
            .and_then(|stack| stack.pop())
            .ok_or(ServiceError::NoChallenge)
    }
}

#[cfg(test)]
mod tests {
    use super::clock::ManualClock;
    use super::*;
    use crate::device::Device;
    use crate::messages::RegistrationProof;
    use crate::seed::RingSeed;

    fn seeded_device(byte: u8) -> Device<RingSeed> {
        Device::with_seed(RingSeed::from_seeds(vec![[byte; 32]]))
    }

    fn register_first(
        service: &mut Service<ManualClock>,
        device: &mut Device<RingSeed>,
        username: &str,
    ) -> bool {
        let resp = service.start_authn(username);
        let (cred, proof) = device.register("svc", &resp.challenge, None).unwrap();
        service.register(&RegistrationRequest {
            username: username.to_string(),
            cred,
            ovkm: proof,
        })
    }

    #[test]
    fn test_register_then_authn() {
        let mut service = Service::with_clock(ManualClock::new(0));
        let mut device = seeded_device(0x01);
        assert!(register_first(&mut service, &mut device, "alice"));

        let resp = service.start_authn("alice");
        let creds = resp.creds.expect("known user gets creds");
        assert_eq!(creds.len(), 1);
        let ovkm = resp.ovkm.expect("known user gets ovkm");

        let assertion = device.authn("svc", &resp.challenge, &creds, &ovkm).unwrap();
        assert!(service.authn(&assertion.into_request("alice")));
    }

    #[test]
    fn test_register_consumes_challenge() {
        let mut service = Service::with_clock(ManualClock::new(0));
        let mut device = seeded_device(0x01);
        assert!(register_first(&mut service, &mut device, "alice"));

        // No start_authn in between: the stack is empty.
        let (cred, proof) = device.register("svc", &[0u8; 32], None).unwrap();
        assert!(!service.register(&RegistrationRequest {
            username: "bob".into(),
            cred,
            ovkm: proof,
        }));
    }

    #[test]
    fn test_register_rejects_tampered_attestation() {
        let mut service = Service::with_clock(ManualClock::new(0));
        let mut device = seeded_device(0x01);
        let resp = service.start_authn("alice");
        let (cred, proof) = device.register("svc", &resp.challenge, None).unwrap();

        let mut bad = cred.clone();
        bad.atts.sig[0] ^= 1;
        assert!(!service.register(&RegistrationRequest {
            username: "alice".into(),
            cred: bad,
            ovkm: proof,
        }));
        assert_eq!(service.user_count(), 0);
    }

    #[test]
    fn test_double_init_refused() {
        let mut service = Service::with_clock(ManualClock::new(0));
        let mut device = seeded_device(0x01);
        assert!(register_first(&mut service, &mut device, "alice"));

        let mut second = seeded_device(0x01);
        let resp = service.start_authn("alice");
        let (cred, proof) = second.register("svc", &resp.challenge, None).unwrap();
        assert!(matches!(proof, RegistrationProof::Initial(_)));
        assert!(!service.register(&RegistrationRequest {
            username: "alice".into(),
            cred,
            ovkm: proof,
        }));
        assert_eq!(service.user("alice").unwrap().creds().len(), 1);
    }

    #[test]
    fn test_seamless_registration_for_unknown_user_refused() {
        let mut service = Service::with_clock(ManualClock::new(0));
        let mut device = seeded_device(0x01);

        // Forge material the device itself can validate; the service has
        // never seen this user, so there is no OVK to bind against.
        let (_, proof) = device.register("svc", &[0u8; 32], None).unwrap();
        let RegistrationProof::Initial(material) = proof else {
            panic!("expected material");
        };
        let resp = service.start_authn("alice");
        let (cred, proof) = device
            .register("svc", &resp.challenge, Some(&material))
            .unwrap();
        assert!(!service.register(&RegistrationRequest {
            username: "alice".into(),
            cred,
            ovkm: proof,
        }));
    }

    #[test]
    fn test_authn_unknown_user_and_unknown_cred() {
        let mut service = Service::with_clock(ManualClock::new(0));
        let mut device = seeded_device(0x01);
        assert!(register_first(&mut service, &mut device, "alice"));

        let resp = service.start_authn("alice");
        let creds = resp.creds.unwrap();
        let ovkm = resp.ovkm.unwrap();
        let assertion = device.authn("svc", &resp.challenge, &creds, &ovkm).unwrap();

        // Same signature presented for a user that does not exist.
        assert!(!service.authn(&assertion.clone().into_request("mallory")));

        // Unknown credential for a known user.
        service.start_authn("alice");
        let mut forged = assertion.into_request("alice");
        forged.cred_jwk = crate::jwk::EcPublicJwk::from_public_key(
            &p256::SecretKey::random(&mut rand::thread_rng()).public_key(),
        );
        assert!(!service.authn(&forged));
    }

    #[test]
    fn test_delete_drops_state() {
        let mut service = Service::with_clock(ManualClock::new(0));
        let mut device = seeded_device(0x01);
        assert!(register_first(&mut service, &mut device, "alice"));
        assert!(service.delete("alice"));
        assert_eq!(service.user_count(), 0);

        let resp = service.start_authn("alice");
        assert!(resp.creds.is_none(), "deleted user looks unknown");
    }
}
