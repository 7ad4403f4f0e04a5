//! Client-side shielded wallet core for the dogenado pool.
//!
//! The crate is organized leaves-first: scalar/hash primitives come from
//! `dogenado-crypto`, the sparse commitment tree from `state-merkle`,
//! and everything here builds on those — identity, notes, encrypted
//! memos, event parsing, witness assembly, discovery pollers and the
//! wallet service that ties every operation into a prepare → confirm
//! pair.

pub mod address;
pub mod config;
pub mod error;
pub mod events;
pub mod keys;
pub mod memo;
pub mod notes;
pub mod prover;
pub mod rpc;
pub mod scanner;
pub mod service;
pub mod stealth;
pub mod store;
pub mod sync;
pub mod tokens;
pub mod witness;

pub use config::WalletConfig;
pub use error::WalletError;
pub use events::{Log, TransferEvent, UnshieldEvent};
pub use keys::{Identity, SpendingKey, StoredIdentity};
pub use memo::{decrypt_note_memo, encrypt_note_memo, EncryptedMemo, NoteCipher, XorKeccakCipher};
pub use notes::{format_amount, parse_amount, Note, StoredNote, TokenInfo};
pub use prover::{Circuit, Groth16Proof, ProofBackend, ProofRequest};
pub use rpc::{ChainAdapter, EvmRpcClient, LogFilter, RpcConfig};
pub use scanner::{
    DiscoveredNote, ProcessedSet, ScannerConfig, TickOutcome, TransferScanner, UnshieldWatcher,
};
pub use service::{
    PreparedShield, PreparedSwap, PreparedTransfer, PreparedUnshield, ProofBundle, ScanSummary,
    SwapPlanEntry, WalletService,
};
pub use store::WalletStore;
pub use sync::{await_leaf_index, prove_membership, rebuild_tree, PathIndexer};
pub use tokens::TokenRegistry;
