//! Device ↔ service message shapes.
//!
//! Field names are the wire contract; binary fields travel as base64url
//! without padding (the `*_b64u` names). Transport framing is the caller's
//! problem — these are plain serde types.

use serde::{Deserialize, Serialize};

use crate::jwk::EcPublicJwk;

/// Ownership-verification key material: the derived public key, the
/// derivation salt, and the binding MAC any same-seed device can recompute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OvkMaterial {
    pub ovk_jwk: EcPublicJwk,
    #[serde(rename = "r_b64u", with = "crate::b64u::bytes")]
    pub r: Vec<u8>,
    #[serde(rename = "mac_b64u", with = "crate::b64u::bytes")]
    pub mac: Vec<u8>,
}

/// The service's current OVK view handed out by `start_authn`. While a
/// migration is open, `next` lists the candidate OVKs posted so far.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OvkmStatus {
    #[serde(flatten)]
    pub current: OvkMaterial,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<Vec<OvkMaterial>>,
}

/// Attestation block accompanying a fresh credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attestation {
    #[serde(rename = "sig_b64u", with = "crate::b64u::bytes")]
    pub sig: Vec<u8>,
    pub key: EcPublicJwk,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialBundle {
    pub jwk: EcPublicJwk,
    pub atts: Attestation,
}

/// Proof accompanying a registration: either fresh OVK material (the first
/// device for this user) or a signature by the already-registered OVK
/// (seamless registration from another device on the same seed).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegistrationProof {
    Initial(OvkMaterial),
    OvkSigned {
        #[serde(rename = "sig_b64u", with = "crate::b64u::bytes")]
        sig: Vec<u8>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub username: String,
    pub cred: CredentialBundle,
    pub ovkm: RegistrationProof,
}

/// Rotation block piggybacked on an authentication: the next OVK material,
/// cross-signed by the previous OVK.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateBlock {
    #[serde(rename = "update_b64u", with = "crate::b64u::bytes")]
    pub update: Vec<u8>,
    pub ovkm: OvkMaterial,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthnRequest {
    pub username: String,
    pub cred_jwk: EcPublicJwk,
    #[serde(rename = "sig_b64u", with = "crate::b64u::bytes")]
    pub sig: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updating: Option<UpdateBlock>,
}

/// What a device produces for an authentication; the caller wraps it into an
/// [`AuthnRequest`] with the username it is acting for.
#[derive(Debug, Clone)]
pub struct AuthnAssertion {
    pub cred_jwk: EcPublicJwk,
    pub sig: Vec<u8>,
    pub updating: Option<UpdateBlock>,
}

impl AuthnAssertion {
    pub fn into_request(self, username: &str) -> AuthnRequest {
        AuthnRequest {
            username: username.to_string(),
            cred_jwk: self.cred_jwk,
            sig: self.sig,
            updating: self.updating,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartAuthnRequest {
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartAuthnResponse {
    #[serde(rename = "challenge_b64u", with = "crate::b64u::bytes")]
    pub challenge: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creds: Option<Vec<EcPublicJwk>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ovkm: Option<OvkmStatus>,
}
