//! BN254 scalar codecs and randomness.
//!
//! Scalars travel as 32-byte big-endian strings on the wire and as 64-hex
//! in user-facing encodings. Decoders reject any encoding that is not a
//! reduced field element; `fr_reduce_bytes` is the only wrapping entry
//! point and is reserved for hash outputs and address widening.

use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use rand::{rngs::OsRng, RngCore};

use crate::error::CryptoError;

/// Serialize a scalar as 32 big-endian bytes, left-padded.
pub fn fr_to_bytes32(value: &Fr) -> [u8; 32] {
    let bytes = value.into_bigint().to_bytes_be();
    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(&bytes);
    out
}

/// Parse 32 big-endian bytes as a scalar, rejecting encodings >= p.
pub fn fr_from_bytes32(bytes: &[u8; 32]) -> Result<Fr, CryptoError> {
    let reduced = Fr::from_be_bytes_mod_order(bytes);
    if fr_to_bytes32(&reduced) != *bytes {
        return Err(CryptoError::NonCanonicalScalar);
    }
    Ok(reduced)
}

/// Reduce arbitrary big-endian bytes into the field.
pub fn fr_reduce_bytes(bytes: &[u8]) -> Fr {
    Fr::from_be_bytes_mod_order(bytes)
}

/// Lowercase 64-hex encoding of a scalar.
pub fn fr_to_hex(value: &Fr) -> String {
    hex::encode(fr_to_bytes32(value))
}

/// Parse a 64-hex scalar (case-insensitive, optional `0x` prefix).
pub fn fr_from_hex(input: &str) -> Result<Fr, CryptoError> {
    let stripped = input.strip_prefix("0x").unwrap_or(input);
    if stripped.len() != 64 {
        return Err(CryptoError::InvalidHex(format!(
            "expected 64 hex chars, got {}",
            stripped.len()
        )));
    }
    let raw = hex::decode(stripped).map_err(|err| CryptoError::InvalidHex(err.to_string()))?;
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&raw);
    fr_from_bytes32(&bytes)
}

/// Widen a 20-byte EVM address into the field. Always reduced.
pub fn address_to_fr(address: &[u8; 20]) -> Fr {
    Fr::from_be_bytes_mod_order(address)
}

/// Draw a uniform scalar from the OS CSPRNG.
///
/// A 31-byte draw is always below p, so no rejection loop is needed.
/// Pseudo-random fallbacks are deliberately not supported.
pub fn random_fr() -> Result<Fr, CryptoError> {
    let mut buf = [0u8; 31];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|err| CryptoError::Rng(err.to_string()))?;
    Ok(Fr::from_be_bytes_mod_order(&buf))
}
