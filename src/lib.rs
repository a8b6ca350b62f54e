pub mod b64u;
pub mod config;
pub mod crypto;
pub mod device;
pub mod error;
pub mod jwk;
pub mod messages;
pub mod pbes;
pub mod seed;
pub mod service;

pub use error::{Error, Result};

use device::{run_ring_ceremony, Device, DeviceError};
use messages::RegistrationRequest;
use service::Service;

/// Demo scenario: a ring of in-process devices negotiates a shared seed over
/// password-sealed envelopes, registers with an in-process service (one
/// initial, the rest seamless), authenticates, then rotates the seed and
/// migrates the service to the new ownership key.
pub fn run(cfg: config::Config) -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;
    let level = match cfg.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level))
        .init();

    anyhow::ensure!(
        cfg.devices >= 2,
        "the ring needs at least 2 devices, got {}",
        cfg.devices
    );

    let ids: Vec<String> = (0..cfg.devices).map(|i| format!("dev-{i}")).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let mut devices: Vec<Device> = (0..cfg.devices).map(|_| Device::new()).collect();

    tracing::info!(devices = cfg.devices, "negotiating shared seed");
    run_ring_ceremony(&mut devices, &id_refs, &cfg.password, false)?;

    let mut service = Service::new();

    // First device registers and establishes the OVK for this service.
    let resp = service.start_authn(&cfg.username);
    let (cred, proof) = devices[0].register(&cfg.service, &resp.challenge, None)?;
    let request = RegistrationRequest {
        username: cfg.username.clone(),
        cred,
        ovkm: proof,
    };
    // Round-trip through JSON: these structs are the wire contract.
    let request: RegistrationRequest = serde_json::from_str(&serde_json::to_string(&request)?)?;
    anyhow::ensure!(service.register(&request), "initial registration refused");
    tracing::info!(device = %ids[0], "initial registration accepted");

    // Every other device registers seamlessly: same seed, no re-enrollment.
    for i in 1..cfg.devices {
        let resp = service.start_authn(&cfg.username);
        let ovkm = resp
            .ovkm
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("service has no OVK state for the user"))?;
        let (cred, proof) =
            devices[i].register(&cfg.service, &resp.challenge, Some(&ovkm.current))?;
        let request = RegistrationRequest {
            username: cfg.username.clone(),
            cred,
            ovkm: proof,
        };
        anyhow::ensure!(
            service.register(&request),
            "seamless registration refused for {}",
            ids[i]
        );
        tracing::info!(device = %ids[i], "seamless registration accepted");
    }

    // Everyone can log in.
    for i in 0..cfg.devices {
        authenticate(&mut service, &devices[i], &cfg)?;
        tracing::info!(device = %ids[i], "authenticated");
    }

    if cfg.no_rotation {
        tracing::info!("scenario complete");
        return Ok(());
    }

    let ovk_before = service
        .user(&cfg.username)
        .map(|cm| cm.ovkm().ovk_jwk.clone())
        .ok_or_else(|| anyhow::anyhow!("user state missing before rotation"))?;

    tracing::info!("rotating seed");
    run_ring_ceremony(&mut devices, &id_refs, &cfg.password, true)?;

    // Each device logs in once while rotating; update messages accumulate on
    // the service until a majority commits the new OVK. Devices whose
    // credentials were pruned by the commit re-enroll seamlessly.
    for i in 0..cfg.devices {
        let resp = service.start_authn(&cfg.username);
        let ovkm = resp
            .ovkm
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("service lost the user mid-rotation"))?;
        devices[i].acknowledge_rotation(&cfg.service, &ovkm.current)?;

        let creds = resp.creds.clone().unwrap_or_default();
        match devices[i].authn(&cfg.service, &resp.challenge, &creds, ovkm) {
            Ok(assertion) => {
                anyhow::ensure!(
                    service.authn(&assertion.into_request(&cfg.username)),
                    "authentication refused for {} during rotation",
                    ids[i]
                );
            }
            Err(DeviceError::NoMatchingCredential) => {
                tracing::info!(device = %ids[i], "credential pruned by migration, re-enrolling");
                let resp = service.start_authn(&cfg.username);
                let ovkm = resp
                    .ovkm
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("service lost the user mid-rotation"))?;
                let (cred, proof) =
                    devices[i].register(&cfg.service, &resp.challenge, Some(&ovkm.current))?;
                let request = RegistrationRequest {
                    username: cfg.username.clone(),
                    cred,
                    ovkm: proof,
                };
                anyhow::ensure!(
                    service.register(&request),
                    "re-enrollment refused for {}",
                    ids[i]
                );
            }
            Err(other) => return Err(other.into()),
        }
    }

    // Final pass: every device acknowledges the rotation and logs in on the
    // new key.
    for i in 0..cfg.devices {
        let resp = service.start_authn(&cfg.username);
        let ovkm = resp
            .ovkm
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("user state missing after rotation"))?;
        devices[i].acknowledge_rotation(&cfg.service, &ovkm.current)?;
        let creds = resp.creds.clone().unwrap_or_default();
        let assertion = devices[i].authn(&cfg.service, &resp.challenge, &creds, ovkm)?;
        anyhow::ensure!(
            service.authn(&assertion.into_request(&cfg.username)),
            "post-rotation authentication refused for {}",
            ids[i]
        );
    }

    let ovk_after = service
        .user(&cfg.username)
        .map(|cm| cm.ovkm().ovk_jwk.clone())
        .ok_or_else(|| anyhow::anyhow!("user state missing after rotation"))?;
    anyhow::ensure!(ovk_after != ovk_before, "service never adopted the new OVK");
    anyhow::ensure!(
        devices.iter().all(|d| !d.is_updating()),
        "a device is still holding the previous seed"
    );

    tracing::info!("rotation complete, all devices on the new seed");
    Ok(())
}

fn authenticate(
    service: &mut Service,
    device: &Device,
    cfg: &config::Config,
) -> anyhow::Result<()> {
    let resp = service.start_authn(&cfg.username);
    let creds = resp
        .creds
        .clone()
        .ok_or_else(|| anyhow::anyhow!("service has no credentials for the user"))?;
    let ovkm = resp
        .ovkm
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("service has no OVK state for the user"))?;
    let assertion = device.authn(&cfg.service, &resp.challenge, &creds, ovkm)?;
    anyhow::ensure!(
        service.authn(&assertion.into_request(&cfg.username)),
        "authentication refused"
    );
    Ok(())
}
