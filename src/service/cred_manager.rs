//! Per-user credential state and the OVK migration state machine.
//!
//! Every credential is bound to the OVK that vouched for it. Rotation opens
//! a migration: update messages rebind credentials to candidate OVKs, a
//! strict majority commits immediately, and a migration left open past the
//! window resolves on the next observation — most bindings win, ties break
//! to the earliest-posted candidate. Committing prunes credentials bound to
//! losing OVKs; their devices re-enroll seamlessly.

use crate::jwk::EcPublicJwk;
use crate::messages::{OvkMaterial, OvkmStatus};

use super::ServiceError;

/// How long a migration stays open before timeout resolution.
pub const MIGRATION_WINDOW_MS: u64 = 3 * 60 * 1000;

#[derive(Debug, Clone)]
pub struct CredBinding {
    pub cred: EcPublicJwk,
    pub ovk: EcPublicJwk,
}

#[derive(Debug, Clone)]
struct Candidate {
    material: OvkMaterial,
    first_seen_ms: u64,
}

#[derive(Debug, Clone)]
struct Migration {
    start_ms: u64,
    candidates: Vec<Candidate>,
}

#[derive(Debug)]
pub struct CredManager {
    creds: Vec<CredBinding>,
    ovkm: OvkMaterial,
    next: Option<Migration>,
}

impl CredManager {
    pub fn init(cred: EcPublicJwk, ovkm: OvkMaterial) -> Self {
        let binding = CredBinding {
            cred,
            ovk: ovkm.ovk_jwk.clone(),
        };
        Self {
            creds: vec![binding],
            ovkm,
            next: None,
        }
    }

    pub fn creds(&self) -> &[CredBinding] {
        &self.creds
    }

    pub fn ovkm(&self) -> &OvkMaterial {
        &self.ovkm
    }

    pub fn contains_cred(&self, cred: &EcPublicJwk) -> bool {
        self.creds.iter().any(|b| b.cred == *cred)
    }

    /// Add a credential bound to the currently trusted OVK. Refused while a
    /// migration is open.
    pub fn add(&mut self, cred: EcPublicJwk) -> Result<(), ServiceError> {
        if self.next.is_some() {
            return Err(ServiceError::RegistrationLocked);
        }
        self.creds.push(CredBinding {
            cred,
            ovk: self.ovkm.ovk_jwk.clone(),
        });
        Ok(())
    }

    /// Apply a verified update message: rebind the sending credential to the
    /// candidate OVK, record the candidate, and commit if a strict majority
    /// of credentials now back it.
    pub fn add_updating(
        &mut self,
        cred: &EcPublicJwk,
        material: &OvkMaterial,
        now_ms: u64,
    ) -> Result<(), ServiceError> {
        let position = self
            .creds
            .iter()
            .position(|b| b.cred == *cred)
            .ok_or(ServiceError::UnknownCredential)?;
        self.creds[position].ovk = material.ovk_jwk.clone();

        let migration = self.next.get_or_insert_with(|| {
            tracing::info!("ownership key migration opened");
            Migration {
                start_ms: now_ms,
                candidates: Vec::new(),
            }
        });
        if !migration
            .candidates
            .iter()
            .any(|c| c.material.ovk_jwk == material.ovk_jwk)
        {
            migration.candidates.push(Candidate {
                material: material.clone(),
                first_seen_ms: now_ms,
            });
        }

        let total = self.creds.len();
        let backing = self
            .creds
            .iter()
            .filter(|b| b.ovk == material.ovk_jwk)
            .count();
        if backing > total / 2 {
            tracing::info!(backing, total, "migration committed by quorum");
            self.commit(material.clone());
        }
        Ok(())
    }

    /// Whether a migration is currently open. An expired migration is
    /// resolved here, on observation.
    pub fn is_updating(&mut self, now_ms: u64) -> bool {
        let Some(migration) = &self.next else {
            return false;
        };
        if now_ms.saturating_sub(migration.start_ms) <= MIGRATION_WINDOW_MS {
            return true;
        }
        self.resolve_timeout();
        false
    }

    /// The view `start_authn` hands out: credential list, trusted OVKM, and
    /// (while migrating) the posted candidates stripped of timing fields.
    pub fn creds_view(&mut self, now_ms: u64) -> (Vec<EcPublicJwk>, OvkmStatus) {
        let next = if self.is_updating(now_ms) {
            let migration = self.next.as_ref().expect("open migration checked above");
            Some(
                migration
                    .candidates
                    .iter()
                    .map(|c| c.material.clone())
                    .collect(),
            )
        } else {
            None
        };
        let creds = self.creds.iter().map(|b| b.cred.clone()).collect();
        (
            creds,
            OvkmStatus {
                current: self.ovkm.clone(),
                next,
            },
        )
    }

    fn commit(&mut self, material: OvkMaterial) {
        let winner = material.ovk_jwk.clone();
        self.creds.retain(|b| b.ovk == winner);
        self.ovkm = material;
        self.next = None;
    }

    /// Timeout resolution: among the posted candidates, the one with the
    /// most bound credentials wins; ties break to the earliest
    /// `first_seen_ms`, with a candidate equal to the pre-migration OVK
    /// treated as oldest.
    fn resolve_timeout(&mut self) {
        let Some(migration) = self.next.take() else {
            return;
        };

        let mut winner: Option<(&Candidate, usize, u64)> = None;
        for candidate in &migration.candidates {
            let backing = self
                .creds
                .iter()
                .filter(|b| b.ovk == candidate.material.ovk_jwk)
                .count();
            let first_seen = if candidate.material.ovk_jwk == self.ovkm.ovk_jwk {
                0
            } else {
                candidate.first_seen_ms
            };
            let better = match winner {
                None => true,
                Some((_, best_backing, best_seen)) => {
                    backing > best_backing || (backing == best_backing && first_seen < best_seen)
                }
            };
            if better {
                winner = Some((candidate, backing, first_seen));
            }
        }

        if let Some((candidate, backing, _)) = winner {
            tracing::info!(backing, "migration resolved by timeout");
            if candidate.material.ovk_jwk == self.ovkm.ovk_jwk {
                let keep = self.ovkm.ovk_jwk.clone();
                self.creds.retain(|b| b.ovk == keep);
            } else {
                self.commit(candidate.material.clone());
            }
        }
    }
}
