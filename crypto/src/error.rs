use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("system randomness unavailable: {0}")]
    Rng(String),

    #[error("encoding is not a reduced BN254 scalar")]
    NonCanonicalScalar,

    #[error("invalid scalar hex: {0}")]
    InvalidHex(String),
}
