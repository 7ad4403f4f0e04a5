//! MiMC-Sponge(2, 220, 1) over the BN254 scalar field.
//!
//! The constant schedule is the circomlib one: a keccak chain seeded with
//! the ASCII string `mimcsponge`, reduced mod p, with the first and last
//! round constants fixed to zero. The schedule is immutable and computed
//! once per process.

use std::sync::LazyLock;

use ark_bn254::Fr;
use ark_ff::{PrimeField, Zero};

use crate::keccak256;

const ROUNDS: usize = 220;
const SEED: &[u8] = b"mimcsponge";

static ROUND_CONSTANTS: LazyLock<Vec<Fr>> = LazyLock::new(|| {
    let mut constants = vec![Fr::zero(); ROUNDS];
    let mut chain = keccak256(SEED);
    for slot in constants.iter_mut().take(ROUNDS - 1).skip(1) {
        chain = keccak256(&chain);
        *slot = Fr::from_be_bytes_mod_order(&chain);
    }
    constants
});

/// One Feistel permutation of the sponge state with key `k`.
fn permute(mut x_l: Fr, mut x_r: Fr, k: Fr) -> (Fr, Fr) {
    for (round, constant) in ROUND_CONSTANTS.iter().enumerate() {
        let t = x_l + k + constant;
        let t2 = t * t;
        let t4 = t2 * t2;
        let t5 = t4 * t;
        if round < ROUNDS - 1 {
            let next_l = x_r + t5;
            x_r = x_l;
            x_l = next_l;
        } else {
            x_r += t5;
        }
    }
    (x_l, x_r)
}

/// Sponge-absorb the inputs with key 0 and squeeze a single output.
pub fn multi_hash(inputs: &[Fr]) -> Fr {
    let mut r = Fr::zero();
    let mut c = Fr::zero();
    for input in inputs {
        r += input;
        let (next_r, next_c) = permute(r, c, Fr::zero());
        r = next_r;
        c = next_c;
    }
    r
}

/// Two-input hash, the workhorse for commitments and Merkle nodes.
pub fn hash2(a: Fr, b: Fr) -> Fr {
    multi_hash(&[a, b])
}

/// Three-input hash.
pub fn hash3(a: Fr, b: Fr, c: Fr) -> Fr {
    multi_hash(&[a, b, c])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_schedule_shape() {
        assert_eq!(ROUND_CONSTANTS.len(), ROUNDS);
        assert!(ROUND_CONSTANTS[0].is_zero());
        assert!(ROUND_CONSTANTS[ROUNDS - 1].is_zero());
        assert!(!ROUND_CONSTANTS[1].is_zero());
        // No repeated constants in the keccak chain.
        assert_ne!(ROUND_CONSTANTS[1], ROUND_CONSTANTS[2]);
    }

    #[test]
    fn hash_is_deterministic() {
        let a = Fr::from(7u64);
        let b = Fr::from(11u64);
        assert_eq!(hash2(a, b), hash2(a, b));
    }

    #[test]
    fn hash_is_order_sensitive() {
        let a = Fr::from(7u64);
        let b = Fr::from(11u64);
        assert_ne!(hash2(a, b), hash2(b, a));
    }

    #[test]
    fn arity_is_domain_separating() {
        let a = Fr::from(7u64);
        let b = Fr::from(11u64);
        assert_ne!(hash2(a, b), hash3(a, b, Fr::zero()));
    }

    #[test]
    fn zero_inputs_hash_nontrivially() {
        assert!(!hash2(Fr::zero(), Fr::zero()).is_zero());
    }
}
