//! End-to-end registration and login: one device establishes the OVK,
//! same-seed devices register seamlessly, foreign-seed devices are refused.

use seedring::device::{Device, DeviceError};
use seedring::messages::{RegistrationProof, RegistrationRequest};
use seedring::seed::{RingSeed, Seed};
use seedring::service::Service;

const SERVICE_ID: &str = "svc1";
const PRE_SEED: [u8; 32] = [0x01; 32];

fn seeded_device(seed: [u8; 32]) -> Device<RingSeed> {
    Device::with_seed(RingSeed::from_seeds(vec![seed]))
}

fn register(
    service: &mut Service,
    device: &mut Device<RingSeed>,
    username: &str,
    seamless: bool,
) -> bool {
    let resp = service.start_authn(username);
    let existing = if seamless {
        Some(resp.ovkm.clone().expect("service must hold OVK state").current)
    } else {
        None
    };
    let (cred, proof) = device
        .register(SERVICE_ID, &resp.challenge, existing.as_ref())
        .unwrap();
    service.register(&RegistrationRequest {
        username: username.to_string(),
        cred,
        ovkm: proof,
    })
}

fn login(service: &mut Service, device: &Device<RingSeed>, username: &str) -> bool {
    let resp = service.start_authn(username);
    let creds = resp.creds.clone().expect("known user");
    let ovkm = resp.ovkm.as_ref().expect("known user");
    match device.authn(SERVICE_ID, &resp.challenge, &creds, ovkm) {
        Ok(assertion) => service.authn(&assertion.into_request(username)),
        Err(_) => false,
    }
}

#[test]
fn test_single_device_registration_and_login() {
    let mut service = Service::new();
    let mut device = seeded_device(PRE_SEED);

    assert!(register(&mut service, &mut device, "alice", false));

    let resp = service.start_authn("alice");
    assert_eq!(resp.creds.as_ref().map(Vec::len), Some(1));
    let creds = resp.creds.unwrap();
    let ovkm = resp.ovkm.unwrap();
    let assertion = device
        .authn(SERVICE_ID, &resp.challenge, &creds, &ovkm)
        .unwrap();
    assert!(service.authn(&assertion.into_request("alice")));
}

#[test]
fn test_two_devices_seamless_registration() {
    let mut service = Service::new();
    let mut a = seeded_device(PRE_SEED);
    let mut b = seeded_device(PRE_SEED);

    assert!(register(&mut service, &mut a, "alice", false));
    assert!(register(&mut service, &mut b, "alice", true));

    let manager = service.user("alice").unwrap();
    assert_eq!(manager.creds().len(), 2);
    let ovk = &manager.ovkm().ovk_jwk;
    assert!(
        manager.creds().iter().all(|binding| binding.ovk == *ovk),
        "both credentials bind to the same OVK"
    );

    assert!(login(&mut service, &a, "alice"));
    assert!(login(&mut service, &b, "alice"));
}

#[test]
fn test_foreign_seed_seamless_registration_rejected_device_side() {
    let mut service = Service::new();
    let mut a = seeded_device(PRE_SEED);
    assert!(register(&mut service, &mut a, "alice", false));

    let mut c = seeded_device([0x5A; 32]);
    let resp = service.start_authn("alice");
    let material = resp.ovkm.unwrap().current;
    let result = c.register(SERVICE_ID, &resp.challenge, Some(&material));
    assert!(matches!(result, Err(DeviceError::OvkVerifyFailed)));
    assert_eq!(service.user("alice").unwrap().creds().len(), 1);
}

#[test]
fn test_negotiated_ring_registers_and_logs_in() {
    // The full pipeline: real ceremony, then registration and login from
    // every device in the ring.
    let mut devices: Vec<Device<RingSeed>> = (0..3).map(|_| Device::new()).collect();
    let ids = ["d0", "d1", "d2"];
    seedring::device::run_ring_ceremony(&mut devices, &ids, "pw", false).unwrap();

    let mut service = Service::new();
    assert!(register(&mut service, &mut devices[0], "alice", false));
    for device in devices.iter_mut().skip(1) {
        assert!(register(&mut service, device, "alice", true));
    }
    assert_eq!(service.user("alice").unwrap().creds().len(), 3);
    for device in &devices {
        assert!(login(&mut service, device, "alice"));
    }
}

#[test]
fn test_registration_requires_fresh_challenge() {
    let mut service = Service::new();
    let mut device = seeded_device(PRE_SEED);

    // Register without ever asking for a challenge.
    let (cred, proof) = device.register(SERVICE_ID, &[0u8; 32], None).unwrap();
    assert!(!service.register(&RegistrationRequest {
        username: "alice".into(),
        cred,
        ovkm: proof,
    }));
    assert!(service.user("alice").is_none());
}

#[test]
fn test_challenge_is_single_use() {
    let mut service = Service::new();
    let mut device = seeded_device(PRE_SEED);
    assert!(register(&mut service, &mut device, "alice", false));
    assert!(login(&mut service, &device, "alice"));

    // Replaying an assertion against a consumed challenge fails.
    let resp = service.start_authn("alice");
    let creds = resp.creds.clone().unwrap();
    let ovkm = resp.ovkm.as_ref().unwrap();
    let assertion = device
        .authn(SERVICE_ID, &resp.challenge, &creds, ovkm)
        .unwrap();
    let request = assertion.into_request("alice");
    assert!(service.authn(&request));
    assert!(!service.authn(&request), "challenge already consumed");
}

#[test]
fn test_wire_shapes_roundtrip_through_json() {
    let mut service = Service::new();
    let mut a = seeded_device(PRE_SEED);
    let mut b = seeded_device(PRE_SEED);

    // Initial registration, via serialized request.
    let resp = service.start_authn("alice");
    let (cred, proof) = a.register(SERVICE_ID, &resp.challenge, None).unwrap();
    let request = RegistrationRequest {
        username: "alice".into(),
        cred,
        ovkm: proof,
    };
    let json = serde_json::to_string(&request).unwrap();
    assert!(json.contains("\"ovk_jwk\"") && json.contains("\"r_b64u\""));
    let request: RegistrationRequest = serde_json::from_str(&json).unwrap();
    assert!(service.register(&request));

    // Seamless registration, via serialized request and response.
    let resp = service.start_authn("alice");
    let resp: seedring::messages::StartAuthnResponse =
        serde_json::from_str(&serde_json::to_string(&resp).unwrap()).unwrap();
    let material = resp.ovkm.unwrap().current;
    let (cred, proof) = b
        .register(SERVICE_ID, &resp.challenge, Some(&material))
        .unwrap();
    let json = serde_json::to_string(&RegistrationRequest {
        username: "alice".into(),
        cred,
        ovkm: proof,
    })
    .unwrap();
    assert!(json.contains("\"sig_b64u\""));
    let request: RegistrationRequest = serde_json::from_str(&json).unwrap();
    assert!(matches!(request.ovkm, RegistrationProof::OvkSigned { .. }));
    assert!(service.register(&request));
}

#[test]
fn test_delete_then_reregister() {
    let mut service = Service::new();
    let mut device = seeded_device(PRE_SEED);
    assert!(register(&mut service, &mut device, "alice", false));
    assert!(service.delete("alice"));

    let resp = service.start_authn("alice");
    assert!(resp.creds.is_none() && resp.ovkm.is_none());

    // The user can start over with fresh OVK material.
    assert!(register(&mut service, &mut device, "alice", false));
    assert!(login(&mut service, &device, "alice"));
}

#[test]
fn test_ovk_material_is_recomputable_by_same_seed_only() {
    // The MAC stored by the service lets any same-seed device verify it can
    // derive the OVK, and nobody else.
    let mut service = Service::new();
    let mut a = seeded_device(PRE_SEED);
    assert!(register(&mut service, &mut a, "alice", false));

    let material = service.user("alice").unwrap().ovkm().clone();
    let same = RingSeed::from_seeds(vec![PRE_SEED]);
    let foreign = RingSeed::from_seeds(vec![[0xEE; 32]]);
    assert!(same
        .verify_ovk(&material.r, SERVICE_ID, &material.mac)
        .unwrap());
    assert!(!foreign
        .verify_ovk(&material.r, SERVICE_ID, &material.mac)
        .unwrap());
    assert_eq!(same.derive_ovk(&material.r).unwrap(), material.ovk_jwk);
}
