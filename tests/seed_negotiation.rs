//! Multi-device seed negotiation over the password-sealed envelope
//! transport, driven the way a real orchestrator would: ciphertexts
//! circulate around the ring until every device reports completion.

use seedring::device::{run_ring_ceremony, Device, DeviceError};
use seedring::pbes::PbesError;
use seedring::seed::RingSeed;

const PASSWORD: &str = "shared out-of-band";

fn ring_ids(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("dev-{i}")).collect()
}

fn fresh_devices(n: usize) -> Vec<Device<RingSeed>> {
    (0..n).map(|_| Device::new()).collect()
}

#[test]
fn test_rings_of_two_to_five_share_a_seed() {
    for n in 2..=5 {
        let ids = ring_ids(n);
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let mut devices = fresh_devices(n);

        run_ring_ceremony(&mut devices, &id_refs, PASSWORD, false).unwrap();

        let expected = devices[0].seed().current_seed().unwrap();
        for (i, device) in devices.iter().enumerate() {
            assert_eq!(device.seed().seed_count(), 1, "ring of {n}, device {i}");
            assert_eq!(
                device.seed().current_seed().unwrap(),
                expected,
                "ring of {n}, device {i}"
            );
        }
    }
}

#[test]
fn test_three_device_ring_manual_rounds() {
    // Scenario: A→B→C→A, each device consuming from its predecessor. Drive
    // the exchange by hand, delivering each device's latest envelope to its
    // successor, with every device calling seed_negotiating at least twice.
    let mut a = Device::new();
    let mut b = Device::new();
    let mut c = Device::new();

    let mut ct_a = a.init_seed_negotiation(PASSWORD, "a", "c", 3, false).unwrap();
    let mut ct_b = b.init_seed_negotiation(PASSWORD, "b", "a", 3, false).unwrap();
    let mut ct_c = c.init_seed_negotiation(PASSWORD, "c", "b", 3, false).unwrap();

    let mut done = [false; 3];
    for _round in 0..3 {
        if !done[0] {
            let step = a.seed_negotiating(&ct_c, false).unwrap();
            ct_a = step.ciphertext;
            done[0] = step.completion;
        }
        if !done[1] {
            let step = b.seed_negotiating(&ct_a, false).unwrap();
            ct_b = step.ciphertext;
            done[1] = step.completion;
        }
        if !done[2] {
            let step = c.seed_negotiating(&ct_b, false).unwrap();
            ct_c = step.ciphertext;
            done[2] = step.completion;
        }
        if done.iter().all(|d| *d) {
            break;
        }
    }

    assert!(done.iter().all(|d| *d), "three rounds must suffice");
    let seed = a.seed().current_seed().unwrap();
    assert_eq!(b.seed().current_seed().unwrap(), seed);
    assert_eq!(c.seed().current_seed().unwrap(), seed);
}

#[test]
fn test_reversed_processing_order_converges() {
    // Same ring, but successors are serviced before their predecessors, so
    // fresh maps propagate as slowly as possible.
    let n = 4;
    let ids = ring_ids(n);
    let mut devices = fresh_devices(n);

    let mut latest: Vec<String> = Vec::new();
    for i in 0..n {
        let partner = &ids[(i + n - 1) % n];
        latest.push(
            devices[i]
                .init_seed_negotiation(PASSWORD, &ids[i], partner, n as u32, false)
                .unwrap(),
        );
    }

    let mut done = vec![false; n];
    for _round in 0..n {
        for i in (0..n).rev() {
            if done[i] {
                continue;
            }
            let incoming = latest[(i + n - 1) % n].clone();
            let step = devices[i].seed_negotiating(&incoming, false).unwrap();
            latest[i] = step.ciphertext;
            done[i] = step.completion;
        }
        if done.iter().all(|d| *d) {
            break;
        }
    }

    assert!(done.iter().all(|d| *d));
    let expected = devices[0].seed().current_seed().unwrap();
    for device in &devices {
        assert_eq!(device.seed().current_seed().unwrap(), expected);
    }
}

#[test]
fn test_two_device_ceremony_and_post_completion_delivery() {
    let mut a = Device::new();
    let mut b = Device::new();

    let ct_a = a.init_seed_negotiation(PASSWORD, "a", "b", 2, false).unwrap();
    let ct_b = b.init_seed_negotiation(PASSWORD, "b", "a", 2, false).unwrap();

    let first = b.seed_negotiating(&ct_a, false).unwrap();
    assert!(first.completion);
    // A completes from B's original envelope even though B is already done.
    let step = a.seed_negotiating(&ct_b, false).unwrap();
    assert!(step.completion);

    assert_eq!(
        a.seed().current_seed().unwrap(),
        b.seed().current_seed().unwrap()
    );

    // A stray re-delivery after completion is refused, not re-processed: the
    // ceremony state is gone.
    let result = b.seed_negotiating(&ct_a, false);
    assert!(matches!(result, Err(DeviceError::NotNegotiating)));
    assert_eq!(b.seed().seed_count(), 1);
}

#[test]
fn test_message_from_non_partner_is_ignored() {
    let mut a = Device::new();
    let mut b = Device::new();
    let mut c = Device::new();

    let _ct_a = a.init_seed_negotiation(PASSWORD, "a", "c", 3, false).unwrap();
    let _ct_b = b.init_seed_negotiation(PASSWORD, "b", "a", 3, false).unwrap();
    let ct_c = c.init_seed_negotiation(PASSWORD, "c", "b", 3, false).unwrap();

    // B consumes from A, not C; C's envelope must not advance B.
    let step = b.seed_negotiating(&ct_c, false).unwrap();
    assert!(!step.completion);
    assert_eq!(b.seed().seed_count(), 0);
}

#[test]
fn test_wrong_password_surfaces_decrypt_error() {
    let mut a = Device::new();
    let mut b = Device::new();

    let ct_a = a.init_seed_negotiation("password one", "a", "b", 2, false).unwrap();
    b.init_seed_negotiation("password two", "b", "a", 2, false).unwrap();

    let result = b.seed_negotiating(&ct_a, false);
    assert!(matches!(
        result,
        Err(DeviceError::Pbes(PbesError::Decrypt))
    ));
    assert_eq!(b.seed().seed_count(), 0, "no seed from a failed round");
}

#[test]
fn test_rotation_ceremony_appends_second_seed() {
    let n = 3;
    let ids = ring_ids(n);
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let mut devices = fresh_devices(n);

    run_ring_ceremony(&mut devices, &id_refs, PASSWORD, false).unwrap();
    let original = devices[0].seed().current_seed().unwrap();

    run_ring_ceremony(&mut devices, &id_refs, PASSWORD, true).unwrap();

    let rotated = devices[0].seed().current_seed().unwrap();
    assert_ne!(rotated, original);
    for device in &devices {
        assert_eq!(device.seed().seed_count(), 2);
        assert!(device.is_updating());
        assert_eq!(device.seed().current_seed().unwrap(), rotated);
    }
}

#[test]
fn test_ring_of_one_is_rejected() {
    let mut devices = fresh_devices(1);
    let result = run_ring_ceremony(&mut devices, &["solo"], PASSWORD, false);
    assert!(matches!(result, Err(DeviceError::Ceremony(_))));
}
