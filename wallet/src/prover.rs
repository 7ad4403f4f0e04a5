//! Opaque proving backend seam.
//!
//! The Groth16 prover, its witness generator and the compiled circuit
//! artifacts live outside the core. The wallet hands a fully assembled
//! [`ProofRequest`] across this boundary and gets back a proof it only
//! needs to flatten for the verifier contract.

use std::collections::BTreeMap;

use alloy_primitives::U256;
use dogenado_crypto::Fr;

use crate::error::WalletError;

/// The four deployed circuits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Circuit {
    Shield,
    Transfer,
    Unshield,
    Swap,
}

impl Circuit {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Shield => "shield",
            Self::Transfer => "transfer",
            Self::Unshield => "unshield",
            Self::Swap => "swap",
        }
    }
}

/// Everything the external prover needs: the circuit id, the ordered
/// public-input vector and the named private signals.
#[derive(Clone, Debug)]
pub struct ProofRequest {
    pub circuit: Circuit,
    pub public_inputs: Vec<Fr>,
    pub private_inputs: BTreeMap<&'static str, Vec<Fr>>,
}

pub trait ProofBackend: Send + Sync {
    fn prove(&self, request: &ProofRequest) -> Result<Groth16Proof, WalletError>;
}

/// A Groth16 proof over BN254 with `b` in the twist, kept in the
/// coordinate order the prover emits: `b = [[x_c0, x_c1], [y_c0, y_c1]]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Groth16Proof {
    pub a: [U256; 2],
    pub b: [[U256; 2]; 2],
    pub c: [U256; 2],
}

impl Groth16Proof {
    /// Flatten for the solidity verifier ABI:
    /// `[A.x, A.y, B.x.c1, B.x.c0, B.y.c1, B.y.c0, C.x, C.y]`.
    ///
    /// The c1/c0 swap inside each Fp2 coordinate is load-bearing; any
    /// other order is rejected on-chain.
    pub fn to_contract_args(&self) -> [U256; 8] {
        [
            self.a[0],
            self.a[1],
            self.b[0][1],
            self.b[0][0],
            self.b[1][1],
            self.b[1][0],
            self.c[0],
            self.c[1],
        ]
    }
}
