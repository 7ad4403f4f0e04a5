//! Wallet runtime configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Host-supplied settings; no global state, passed where needed.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletConfig {
    /// EVM JSON-RPC endpoint.
    pub rpc_endpoint: String,
    /// Pool contract address, `0x`-hex.
    pub pool_address: String,
    /// Optional external indexer endpoint for membership paths.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexer_endpoint: Option<String>,
    /// Directory holding encrypted wallet files.
    pub data_dir: PathBuf,
    /// Seconds between scan polls (floored at 5 by the scanner).
    pub scan_interval_secs: u64,
    /// General RPC timeout, seconds.
    pub rpc_timeout_secs: u64,
    /// How long to wait for an operation's confirmation event, seconds.
    pub confirmation_timeout_secs: u64,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            rpc_endpoint: "http://127.0.0.1:8545".to_string(),
            pool_address: "0x0000000000000000000000000000000000000000".to_string(),
            indexer_endpoint: None,
            data_dir: PathBuf::from("dogenado-data"),
            scan_interval_secs: 15,
            rpc_timeout_secs: 10,
            confirmation_timeout_secs: 60,
        }
    }
}

impl WalletConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs.max(5))
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }
}
