//! Tree reconstruction from chain events.
//!
//! The pool's commitment history is recovered from its logs, folded into
//! a [`SparseTree`], and the resulting root is cross-checked against the
//! contract's known-root history before any path leaves this module. A
//! root the contract does not know means the hash schedule or the leaf
//! order disagrees with the deployed circuits, and no proof built on it
//! can verify; in that case an external indexer path may be used as a
//! fallback when one is configured and its own root checks out.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use alloy_primitives::Address;
use dogenado_crypto::Fr;
use state_merkle::{MerklePath, SparseTree};

use crate::error::WalletError;
use crate::events::parse_leaf_insertion;
use crate::rpc::{self, ChainAdapter, LogFilter};

/// Hard cap on a single `eth_getLogs` window.
pub const MAX_LOG_WINDOW: u64 = 10_000;

const INDEXER_TIMEOUT: Duration = Duration::from_secs(3);

/// External indexer seam for membership paths.
#[async_trait]
pub trait PathIndexer: Send + Sync {
    /// Returns `(root, path)` for the requested leaf.
    async fn tree_path(&self, leaf_index: u64) -> Result<(Fr, MerklePath), WalletError>;
}

/// Fetch every `(leaf_index, commitment)` pair the pool has emitted up to
/// `to_block`, windowed to the log-query cap.
pub async fn fetch_commitment_events(
    adapter: &dyn ChainAdapter,
    pool: Address,
    to_block: u64,
) -> Result<Vec<(u64, Fr)>, WalletError> {
    let mut entries = Vec::new();
    let mut from = 0u64;
    loop {
        let to = to_block.min(from.saturating_add(MAX_LOG_WINDOW - 1));
        let filter = LogFilter {
            address: pool,
            topics: Vec::new(),
            from_block: from,
            to_block: to,
        };
        let logs = adapter.get_logs(&filter).await?;
        entries.extend(logs.iter().filter_map(parse_leaf_insertion));
        if to >= to_block {
            break;
        }
        from = to + 1;
    }
    // Ascending leaf order; the stable sort keeps the earliest log first
    // among duplicates so the tree build retains the first occurrence.
    entries.sort_by_key(|(index, _)| *index);
    Ok(entries)
}

/// Rebuild the commitment tree from the full event history.
pub async fn rebuild_tree(
    adapter: &dyn ChainAdapter,
    pool: Address,
) -> Result<SparseTree, WalletError> {
    let head = adapter.block_number().await?;
    let entries = fetch_commitment_events(adapter, pool, head).await?;
    debug!(leaves = entries.len(), "rebuilt sparse commitment tree");
    Ok(SparseTree::build(&entries)?)
}

/// Produce a membership proof for `leaf_index` whose root the contract
/// recognizes, or fail with `RootMismatch`.
pub async fn prove_membership(
    adapter: &dyn ChainAdapter,
    pool: Address,
    indexer: Option<&dyn PathIndexer>,
    leaf_index: u64,
) -> Result<(Fr, MerklePath), WalletError> {
    let tree = rebuild_tree(adapter, pool).await?;
    let root = tree.root();
    if rpc::is_known_root(adapter, pool, root).await? {
        return Ok((root, tree.path(leaf_index)?));
    }

    let latest = rpc::get_latest_root(adapter, pool).await?;
    warn!(
        local = %dogenado_crypto::fr_to_hex(&root),
        latest = %dogenado_crypto::fr_to_hex(&latest),
        "local tree root is unknown to the contract"
    );

    if let Some(indexer) = indexer {
        match tokio::time::timeout(INDEXER_TIMEOUT, indexer.tree_path(leaf_index)).await {
            Ok(Ok((indexer_root, path))) => {
                if rpc::is_known_root(adapter, pool, indexer_root).await? {
                    debug!(leaf_index, "using indexer-provided membership path");
                    return Ok((indexer_root, path));
                }
                warn!("indexer root is unknown to the contract as well");
            }
            Ok(Err(err)) => warn!(error = %err, "indexer path lookup failed"),
            Err(_) => warn!("indexer path lookup timed out"),
        }
    }
    Err(WalletError::RootMismatch)
}

/// Wait for the insertion event of `commitment` and return its leaf
/// index. Intended for the gap between submitting an operation and
/// calling its `complete_*`; gives up after `timeout` (hosts default to
/// 60 s).
pub async fn await_leaf_index(
    adapter: &dyn ChainAdapter,
    pool: Address,
    commitment: Fr,
    timeout: Duration,
) -> Result<u64, WalletError> {
    const POLL_EVERY: Duration = Duration::from_secs(2);
    const REORG_SLACK: u64 = 5;

    let deadline = tokio::time::Instant::now() + timeout;
    let mut from = adapter.block_number().await?.saturating_sub(REORG_SLACK);
    loop {
        let head = adapter.block_number().await?;
        let filter = LogFilter {
            address: pool,
            topics: Vec::new(),
            from_block: from,
            to_block: head.min(from.saturating_add(MAX_LOG_WINDOW - 1)),
        };
        let logs = adapter.get_logs(&filter).await?;
        for log in &logs {
            if let Some((index, leaf)) = parse_leaf_insertion(log) {
                if leaf == commitment {
                    return Ok(index);
                }
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(WalletError::NetworkUnavailable(
                "timed out waiting for the insertion event".into(),
            ));
        }
        tokio::time::sleep(POLL_EVERY).await;
        from = head.saturating_sub(REORG_SLACK);
    }
}
