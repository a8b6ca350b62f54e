//! Per-device credential bookkeeping.
//!
//! One entry per (service, registration): the private JWK the device signs
//! challenges with. Nothing here is persisted; credentials live for the
//! process lifetime.

use crate::jwk::{EcPrivateJwk, EcPublicJwk};

#[derive(Debug, Clone)]
pub struct StoredCredential {
    pub service_id: String,
    pub jwk: EcPrivateJwk,
}

#[derive(Debug, Default)]
pub struct CredentialStore {
    creds: Vec<StoredCredential>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self { creds: Vec::new() }
    }

    pub fn add(&mut self, service_id: &str, jwk: EcPrivateJwk) {
        self.creds.push(StoredCredential {
            service_id: service_id.to_string(),
            jwk,
        });
    }

    /// First stored credential whose public half appears in `allowed` (the
    /// list the service says it holds for this user).
    pub fn find_matching(&self, allowed: &[EcPublicJwk]) -> Option<&StoredCredential> {
        self.creds.iter().find(|cred| {
            let public = cred.jwk.public();
            allowed.iter().any(|candidate| *candidate == public)
        })
    }

    pub fn credential_count(&self) -> usize {
        self.creds.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_jwk() -> EcPrivateJwk {
        EcPrivateJwk::from_secret_key(&p256::SecretKey::random(&mut rand::thread_rng()))
    }

    #[test]
    fn test_find_matching_by_public_half() {
        let mut store = CredentialStore::new();
        let a = fresh_jwk();
        let b = fresh_jwk();
        store.add("svc1", a.clone());
        store.add("svc2", b.clone());

        let found = store.find_matching(&[b.public()]).expect("b must match");
        assert_eq!(found.service_id, "svc2");
        assert_eq!(found.jwk.public(), b.public());
    }

    #[test]
    fn test_find_matching_none_for_unknown_key() {
        let mut store = CredentialStore::new();
        store.add("svc1", fresh_jwk());
        assert!(store.find_matching(&[fresh_jwk().public()]).is_none());
        assert!(store.find_matching(&[]).is_none());
    }
}
