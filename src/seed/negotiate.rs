//! One round of the ring DH ceremony.
//!
//! N devices stand in a ring; each consumes key material from exactly one
//! neighbour. Step 0 of every device's map is its own ephemeral public key;
//! step `c+1` is the partner's step-`c` entry multiplied by the local
//! ephemeral scalar. After a partner entry has passed through all N scalars
//! (`c == dev_num - 2`), its X coordinate is the shared seed. A round is a
//! pure function of the maps presented, so duplicate or reordered deliveries
//! converge on the same state.

use std::collections::{BTreeMap, BTreeSet};

use zeroize::Zeroizing;

use super::{Ephemeral, EpkMaps, NegotiationMeta, NegotiationProgress, RingSeed, SeedError};
use crate::crypto::exchange;
use crate::jwk::EcPublicJwk;

pub(super) fn advance(
    seed: &mut RingSeed,
    meta: &NegotiationMeta,
    epk: Option<&EpkMaps>,
    update: bool,
) -> Result<NegotiationProgress, SeedError> {
    if meta.dev_num < 2 {
        return Err(SeedError::InvalidState);
    }
    // An initial ceremony requires a blank device; a rotation requires an
    // established seed to rotate from.
    if update == seed.seeds.is_empty() {
        return Err(SeedError::InvalidState);
    }

    match &seed.ephemeral {
        Some(eph) if eph.meta != *meta => return Err(SeedError::MetaMismatch),
        Some(_) => {}
        None => {
            seed.ephemeral = Some(Ephemeral {
                meta: meta.clone(),
                sk: p256::SecretKey::random(&mut rand::thread_rng()),
                idx: seed.seeds.len(),
            });
            tracing::debug!(id = %meta.id, dev_num = meta.dev_num, "negotiation started");
        }
    }
    let (sk, idx) = {
        let eph = seed.ephemeral.as_ref().expect("ephemeral initialized above");
        (eph.sk.clone(), eph.idx)
    };

    let mut epk_out: BTreeMap<u32, EcPublicJwk> = BTreeMap::new();
    epk_out.insert(0, EcPublicJwk::from_public_key(&sk.public_key()));

    // Decode all partner points up front so a malformed entry cannot leave a
    // half-applied round behind.
    let mut partner_points: Vec<(u32, p256::PublicKey)> = Vec::new();
    if let Some(maps) = epk {
        for (&step, jwk) in &maps.partner {
            partner_points.push((step, jwk.to_public_key()?));
        }
    }

    let mut seed_written = false;
    for (step, point) in &partner_points {
        if step + 2 < meta.dev_num {
            // Intermediate hop: extend the partner's chain by our scalar,
            // unless we already published that step.
            let next_step = step + 1;
            let already_mine = epk.map_or(false, |maps| maps.mine.contains_key(&next_step));
            if !already_mine && !epk_out.contains_key(&next_step) {
                let shared = exchange::shared_point(point, &sk)?;
                epk_out.insert(next_step, EcPublicJwk::from_public_key(&shared));
            }
        } else if step + 2 == meta.dev_num {
            // Final hop: the chain now contains every scalar but ours.
            let x = exchange::shared_x(point, &sk)?;
            if seed.seeds.len() == idx {
                seed.seeds.push(Zeroizing::new(x));
            } else if idx < seed.seeds.len() {
                // Duplicate delivery of the final entry; same value.
                seed.seeds[idx] = Zeroizing::new(x);
            }
            seed_written = true;
        }
        // Entries past dev_num - 2 are not ours to consume.
    }

    let mut covered: BTreeSet<u32> = epk_out.keys().copied().collect();
    if let Some(maps) = epk {
        covered.extend(maps.mine.keys().copied());
    }
    if seed_written {
        covered.insert(meta.dev_num - 1);
    }

    let completion = covered.len() as u32 == meta.dev_num;
    if completion {
        seed.ephemeral = None;
        tracing::info!(id = %meta.id, dev_num = meta.dev_num, "seed established");
    }

    Ok(NegotiationProgress {
        completion,
        epk: epk_out,
    })
}
