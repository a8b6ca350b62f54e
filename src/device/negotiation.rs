//! Password-enveloped transport wrapper around seed negotiation.
//!
//! Devices exchange `dev_id "." json(step -> jwk)` payloads sealed in a
//! PBES2 envelope under a password shared out-of-band. Each device
//! accumulates its own published map (`mine`) and its partner's (`partner`)
//! across rounds; the seed state machine itself is stateless per round
//! beyond the ephemeral key.

use std::collections::BTreeMap;

use crate::jwk::EcPublicJwk;
use crate::pbes;
use crate::seed::{EpkMaps, NegotiationMeta, Seed};

use super::{Device, DeviceError};

#[derive(Debug)]
pub struct NegotiationStep {
    pub completion: bool,
    pub ciphertext: String,
}

pub(super) struct NegotiationSession {
    password: String,
    dev_id: String,
    meta: NegotiationMeta,
    mine: BTreeMap<u32, EcPublicJwk>,
    partner: BTreeMap<u32, EcPublicJwk>,
}

impl<S: Seed> Device<S> {
    /// Open a negotiation ceremony and produce the first outgoing message.
    /// Any prior unfinished ceremony is abandoned.
    pub fn init_seed_negotiation(
        &mut self,
        password: &str,
        dev_id: &str,
        partner_id: &str,
        dev_num: u32,
        updating: bool,
    ) -> Result<String, DeviceError> {
        self.negotiation = None;
        let meta = NegotiationMeta {
            id: dev_id.to_string(),
            partner_id: partner_id.to_string(),
            dev_num,
        };
        let progress = self.seed.negotiate(&meta, None, updating)?;
        let mine = progress.epk;
        let ciphertext = pbes::encrypt(password, encode_payload(dev_id, &mine).as_bytes());
        self.negotiation = Some(NegotiationSession {
            password: password.to_string(),
            dev_id: dev_id.to_string(),
            meta,
            mine,
            partner: BTreeMap::new(),
        });
        Ok(ciphertext)
    }

    /// Consume one incoming ceremony message and produce the next outgoing
    /// one. Messages from anyone but the ring partner are ignored (the local
    /// map is re-sent unchanged).
    pub fn seed_negotiating(
        &mut self,
        ciphertext: &str,
        updating: bool,
    ) -> Result<NegotiationStep, DeviceError> {
        let session = self.negotiation.as_mut().ok_or(DeviceError::NotNegotiating)?;

        let plaintext = pbes::decrypt(&session.password, ciphertext)?;
        let (sender, map) = decode_payload(&plaintext)?;
        if sender == session.meta.partner_id {
            session.partner.extend(map);
        } else {
            tracing::debug!(sender = %sender, "ignoring message from non-partner");
        }

        let maps = EpkMaps {
            mine: session.mine.clone(),
            partner: session.partner.clone(),
        };
        let progress = self.seed.negotiate(&session.meta, Some(&maps), updating)?;
        session.mine.extend(progress.epk);

        let ciphertext = pbes::encrypt(
            &session.password,
            encode_payload(&session.dev_id, &session.mine).as_bytes(),
        );
        let completion = progress.completion;
        if completion {
            self.negotiation = None;
        }
        Ok(NegotiationStep {
            completion,
            ciphertext,
        })
    }
}

fn encode_payload(dev_id: &str, map: &BTreeMap<u32, EcPublicJwk>) -> String {
    let string_map: BTreeMap<String, &EcPublicJwk> =
        map.iter().map(|(step, jwk)| (step.to_string(), jwk)).collect();
    let json = serde_json::to_string(&string_map).expect("JWK map serialization is infallible");
    format!("{dev_id}.{json}")
}

fn decode_payload(
    plaintext: &[u8],
) -> Result<(String, BTreeMap<u32, EcPublicJwk>), DeviceError> {
    let text =
        std::str::from_utf8(plaintext).map_err(|_| DeviceError::Format("payload is not UTF-8"))?;
    let (sender, json) = text
        .split_once('.')
        .ok_or(DeviceError::Format("missing sender separator"))?;
    let string_map: BTreeMap<String, EcPublicJwk> =
        serde_json::from_str(json).map_err(|_| DeviceError::Format("exchange map JSON"))?;

    let mut map = BTreeMap::new();
    for (key, jwk) in string_map {
        let step: u32 = key
            .parse()
            .map_err(|_| DeviceError::Format("non-numeric step key"))?;
        map.insert(step, jwk);
    }
    Ok((sender.to_string(), map))
}

/// Drive a full ring of devices to a shared seed by circulating each
/// device's latest envelope to its successor. `ids[i]`'s partner is
/// `ids[(i - 1) mod n]`; convergence takes at most `n` passes.
pub fn run_ring_ceremony<S: Seed>(
    devices: &mut [Device<S>],
    ids: &[&str],
    password: &str,
    updating: bool,
) -> Result<(), DeviceError> {
    let n = devices.len();
    if n < 2 || ids.len() != n {
        return Err(DeviceError::Ceremony("ring needs at least two devices"));
    }

    let mut latest: Vec<String> = Vec::with_capacity(n);
    for (i, device) in devices.iter_mut().enumerate() {
        let partner = ids[(i + n - 1) % n];
        latest.push(device.init_seed_negotiation(password, ids[i], partner, n as u32, updating)?);
    }

    let mut done = vec![false; n];
    for _round in 0..n {
        for i in 0..n {
            if done[i] {
                continue;
            }
            let incoming = latest[(i + n - 1) % n].clone();
            let step = devices[i].seed_negotiating(&incoming, updating)?;
            latest[i] = step.ciphertext;
            done[i] = step.completion;
        }
        if done.iter().all(|d| *d) {
            return Ok(());
        }
    }
    Err(DeviceError::Ceremony("ring did not converge"))
}
