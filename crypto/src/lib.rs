//! Field arithmetic and hashing for the dogenado shielded pool.
//!
//! Everything downstream of this crate operates on BN254 scalar-field
//! elements. The two-input hash is MiMC-Sponge(2, 220, 1) with the
//! circomlib constant schedule, so commitments and Merkle nodes computed
//! here agree with the deployed circuits and the on-chain verifier.

pub mod error;
pub mod fields;
pub mod mimc;

pub use ark_bn254::Fr;
pub use error::CryptoError;
pub use fields::{
    address_to_fr, fr_from_bytes32, fr_from_hex, fr_reduce_bytes, fr_to_bytes32, fr_to_hex,
    random_fr,
};
pub use mimc::{hash2, hash3};

use ark_ff::MontFp;
use sha3::{Digest, Keccak256};

/// Domain tags mixed into key and note derivations.
pub const TAG_SPENDING_KEY: Fr = MontFp!("0");
pub const TAG_VIEWING_KEY: Fr = MontFp!("1");
pub const TAG_SHIELDED_ADDRESS: Fr = MontFp!("2");
pub const TAG_COMMITMENT: Fr = MontFp!("3");
pub const TAG_NULLIFIER: Fr = MontFp!("4");

/// Keccak-256 of arbitrary bytes.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}
