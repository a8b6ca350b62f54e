#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("seed: {0}")]
    Seed(#[from] crate::seed::SeedError),
    #[error("device: {0}")]
    Device(#[from] crate::device::DeviceError),
    #[error("envelope: {0}")]
    Pbes(#[from] crate::pbes::PbesError),
    #[error("jwk: {0}")]
    Jwk(#[from] crate::jwk::JwkError),
    #[error("crypto: {0}")]
    Crypto(#[from] crate::crypto::CryptoError),
    #[error("{0}")]
    Internal(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
