use thiserror::Error;

use dogenado_crypto::CryptoError;
use state_merkle::MerkleError;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("stored commitment does not match the note contents")]
    CommitmentMismatch,

    #[error("note is not owned by this identity")]
    OwnershipMismatch,

    #[error("no note covers the requested amount (needed {needed}, best {available})")]
    InsufficientNote { needed: u128, available: u128 },

    #[error("input and output values do not balance")]
    ValueConservationViolation,

    #[error("note was already spent on-chain")]
    NoteSpent,

    #[error("reconstructed merkle root disagrees with the contract")]
    RootMismatch,

    #[error("merkle root is not in the contract's known-root history")]
    UnknownRoot,

    #[error("note has no confirmed leaf index and cannot be spent")]
    NoLeafIndex,

    #[error("proof generation failed: {0}")]
    ProverFailure(String),

    #[error("chain rpc unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("malformed on-chain event: {0}")]
    EventMalformed(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("memo did not decrypt for this identity")]
    DecryptionFailed,

    #[error("poll requested before the minimum interval elapsed")]
    RateLimited,

    #[error("relayer rejected the fee: {0}")]
    FeeTooLow(String),

    #[error("contract reverted: {0}")]
    ChainRevert(String),

    #[error("invalid address encoding: {0}")]
    AddressEncoding(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Merkle(#[from] MerkleError),
}

impl WalletError {
    /// Map a contract revert reason onto the wallet taxonomy.
    ///
    /// The reason strings are the ones the pool contract actually emits;
    /// anything unrecognized passes through as a raw revert.
    pub fn from_revert_reason(reason: &str) -> Self {
        let lowered = reason.to_ascii_lowercase();
        if lowered.contains("nullifier already spent") || lowered.contains("already been spent") {
            Self::NoteSpent
        } else if lowered.contains("unknown root") || lowered.contains("cannot find your merkle root")
        {
            Self::UnknownRoot
        } else if lowered.contains("fee too low") || lowered.contains("fee exceeds") {
            Self::FeeTooLow(reason.to_string())
        } else {
            Self::ChainRevert(reason.to_string())
        }
    }

    /// Returns a short message suitable for direct display.
    pub fn user_message(&self) -> String {
        match self {
            Self::NoteSpent => "This note was already spent on-chain".to_string(),
            Self::InsufficientNote { needed, available } => {
                format!("No single note is large enough (needed {needed}, best {available})")
            }
            Self::NoLeafIndex => {
                "The note has not been confirmed on-chain yet; wait for the deposit event"
                    .to_string()
            }
            Self::RootMismatch => {
                "Local tree reconstruction disagrees with the contract; re-run a full event sync"
                    .to_string()
            }
            _ => self.to_string(),
        }
    }
}

impl From<std::io::Error> for WalletError {
    fn from(err: std::io::Error) -> Self {
        Self::StorageUnavailable(err.to_string())
    }
}

impl From<bincode::Error> for WalletError {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
