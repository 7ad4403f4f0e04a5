//! Chain access for the wallet core.
//!
//! The core depends on a deliberately narrow [`ChainAdapter`] seam:
//! block height, log queries, read-only calls, balances and raw
//! transaction submission. [`EvmRpcClient`] is the production
//! implementation over EVM JSON-RPC via jsonrpsee's HTTP client.

use std::time::Duration;

use async_trait::async_trait;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde::Deserialize;
use serde_json::json;

use alloy_primitives::{Address, B256, U256};
use dogenado_crypto::{fr_from_bytes32, fr_to_bytes32, Fr};

use crate::error::WalletError;
use crate::events::Log;

/// `getLatestRoot()`.
pub const SELECTOR_GET_LATEST_ROOT: [u8; 4] = [0x54, 0x45, 0xb0, 0x07];
/// `isKnownRoot(bytes32)`.
pub const SELECTOR_IS_KNOWN_ROOT: [u8; 4] = [0x6d, 0x98, 0x33, 0xe3];
/// `isSpent(bytes32)`.
pub const SELECTOR_IS_SPENT: [u8; 4] = [0xe5, 0x28, 0x5d, 0xcc];
/// ERC-20 `balanceOf(address)`.
pub const SELECTOR_ERC20_BALANCE_OF: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];

/// Log query parameters; `topics` entries of `None` are wildcards.
#[derive(Clone, Debug, Default)]
pub struct LogFilter {
    pub address: Address,
    pub topics: Vec<Option<B256>>,
    pub from_block: u64,
    pub to_block: u64,
}

#[async_trait]
pub trait ChainAdapter: Send + Sync {
    async fn block_number(&self) -> Result<u64, WalletError>;
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>, WalletError>;
    async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, WalletError>;
    async fn balance(&self, address: Address) -> Result<U256, WalletError>;
    async fn send_raw_transaction(&self, raw: Vec<u8>) -> Result<B256, WalletError>;
}

/// Configuration for the JSON-RPC client.
#[derive(Clone, Debug)]
pub struct RpcConfig {
    pub endpoint: String,
    pub request_timeout: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8545".to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl RpcConfig {
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }
}

/// EVM JSON-RPC implementation of [`ChainAdapter`].
pub struct EvmRpcClient {
    client: HttpClient,
    config: RpcConfig,
}

impl EvmRpcClient {
    pub fn new(config: RpcConfig) -> Result<Self, WalletError> {
        let client = HttpClientBuilder::default()
            .request_timeout(config.request_timeout)
            .build(&config.endpoint)
            .map_err(|err| WalletError::NetworkUnavailable(err.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn connect(endpoint: impl Into<String>) -> Result<Self, WalletError> {
        Self::new(RpcConfig::with_endpoint(endpoint))
    }

    pub fn config(&self) -> &RpcConfig {
        &self.config
    }
}

/// Wire shape of an `eth_getLogs` entry.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLog {
    address: String,
    topics: Vec<String>,
    data: String,
    block_number: Option<String>,
    transaction_hash: Option<String>,
}

impl RawLog {
    fn into_log(self) -> Result<Log, WalletError> {
        Ok(Log {
            address: parse_address(&self.address)?,
            topics: self
                .topics
                .iter()
                .map(|topic| parse_b256(topic))
                .collect::<Result<_, _>>()?,
            data: parse_bytes(&self.data)?,
            block_number: self
                .block_number
                .as_deref()
                .map(parse_quantity)
                .transpose()?
                .unwrap_or_default(),
            tx_hash: self
                .transaction_hash
                .as_deref()
                .map(parse_b256)
                .transpose()?
                .unwrap_or_default(),
        })
    }
}

#[async_trait]
impl ChainAdapter for EvmRpcClient {
    async fn block_number(&self) -> Result<u64, WalletError> {
        let raw: String = self
            .client
            .request("eth_blockNumber", rpc_params![])
            .await
            .map_err(map_client_error)?;
        parse_quantity(&raw)
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>, WalletError> {
        let topics: Vec<serde_json::Value> = filter
            .topics
            .iter()
            .map(|topic| match topic {
                Some(value) => json!(format!("{value:#x}")),
                None => serde_json::Value::Null,
            })
            .collect();
        let params = json!({
            "address": format!("{:#x}", filter.address),
            "topics": topics,
            "fromBlock": quantity(filter.from_block),
            "toBlock": quantity(filter.to_block),
        });
        let raw: Vec<RawLog> = self
            .client
            .request("eth_getLogs", rpc_params![params])
            .await
            .map_err(map_client_error)?;
        raw.into_iter().map(RawLog::into_log).collect()
    }

    async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, WalletError> {
        let params = json!({
            "to": format!("{to:#x}"),
            "data": format!("0x{}", hex::encode(data)),
        });
        let raw: String = self
            .client
            .request("eth_call", rpc_params![params, "latest"])
            .await
            .map_err(map_client_error)?;
        parse_bytes(&raw)
    }

    async fn balance(&self, address: Address) -> Result<U256, WalletError> {
        let raw: String = self
            .client
            .request(
                "eth_getBalance",
                rpc_params![format!("{address:#x}"), "latest"],
            )
            .await
            .map_err(map_client_error)?;
        parse_u256(&raw)
    }

    async fn send_raw_transaction(&self, raw: Vec<u8>) -> Result<B256, WalletError> {
        let response: String = self
            .client
            .request(
                "eth_sendRawTransaction",
                rpc_params![format!("0x{}", hex::encode(raw))],
            )
            .await
            .map_err(map_client_error)?;
        parse_b256(&response)
    }
}

/// `getLatestRoot()` on the pool.
pub async fn get_latest_root(
    adapter: &dyn ChainAdapter,
    pool: Address,
) -> Result<Fr, WalletError> {
    let out = adapter.call(pool, SELECTOR_GET_LATEST_ROOT.to_vec()).await?;
    let word = return_word(&out)?;
    fr_from_bytes32(&word).map_err(|_| WalletError::Serialization("root out of field".into()))
}

/// `isKnownRoot(bytes32)` on the pool.
pub async fn is_known_root(
    adapter: &dyn ChainAdapter,
    pool: Address,
    root: Fr,
) -> Result<bool, WalletError> {
    let mut data = SELECTOR_IS_KNOWN_ROOT.to_vec();
    data.extend_from_slice(&fr_to_bytes32(&root));
    let out = adapter.call(pool, data).await?;
    Ok(return_word(&out)?.iter().any(|byte| *byte != 0))
}

/// `isSpent(bytes32)` on the pool. The definitive spent check.
pub async fn is_spent(
    adapter: &dyn ChainAdapter,
    pool: Address,
    nullifier_hash: Fr,
) -> Result<bool, WalletError> {
    let mut data = SELECTOR_IS_SPENT.to_vec();
    data.extend_from_slice(&fr_to_bytes32(&nullifier_hash));
    let out = adapter.call(pool, data).await?;
    Ok(return_word(&out)?.iter().any(|byte| *byte != 0))
}

/// ERC-20 `balanceOf(address)`.
pub async fn erc20_balance_of(
    adapter: &dyn ChainAdapter,
    token: Address,
    owner: Address,
) -> Result<U256, WalletError> {
    let mut data = SELECTOR_ERC20_BALANCE_OF.to_vec();
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(owner.as_slice());
    let out = adapter.call(token, data).await?;
    Ok(U256::from_be_bytes(return_word(&out)?))
}

fn return_word(data: &[u8]) -> Result<[u8; 32], WalletError> {
    if data.len() < 32 {
        return Err(WalletError::Serialization(format!(
            "call returned {} bytes, expected a word",
            data.len()
        )));
    }
    let mut word = [0u8; 32];
    word.copy_from_slice(&data[..32]);
    Ok(word)
}

fn map_client_error(err: jsonrpsee::core::client::Error) -> WalletError {
    match err {
        jsonrpsee::core::client::Error::Call(call) => {
            WalletError::from_revert_reason(call.message())
        }
        other => WalletError::NetworkUnavailable(other.to_string()),
    }
}

fn quantity(value: u64) -> String {
    format!("{value:#x}")
}

fn parse_quantity(input: &str) -> Result<u64, WalletError> {
    let stripped = input.strip_prefix("0x").unwrap_or(input);
    u64::from_str_radix(stripped, 16)
        .map_err(|_| WalletError::Serialization(format!("bad quantity {input:?}")))
}

fn parse_u256(input: &str) -> Result<U256, WalletError> {
    let stripped = input.strip_prefix("0x").unwrap_or(input);
    U256::from_str_radix(stripped, 16)
        .map_err(|_| WalletError::Serialization(format!("bad quantity {input:?}")))
}

fn parse_bytes(input: &str) -> Result<Vec<u8>, WalletError> {
    let stripped = input.strip_prefix("0x").unwrap_or(input);
    hex::decode(stripped).map_err(|err| WalletError::Serialization(err.to_string()))
}

fn parse_b256(input: &str) -> Result<B256, WalletError> {
    let bytes = parse_bytes(input)?;
    if bytes.len() != 32 {
        return Err(WalletError::Serialization(format!(
            "expected 32-byte hash, got {} bytes",
            bytes.len()
        )));
    }
    Ok(B256::from_slice(&bytes))
}

fn parse_address(input: &str) -> Result<Address, WalletError> {
    let bytes = parse_bytes(input)?;
    if bytes.len() != 20 {
        return Err(WalletError::Serialization(format!(
            "expected 20-byte address, got {} bytes",
            bytes.len()
        )));
    }
    Ok(Address::from_slice(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantity_codec_round_trip() {
        assert_eq!(quantity(0), "0x0");
        assert_eq!(quantity(255), "0xff");
        assert_eq!(parse_quantity("0xff").unwrap(), 255);
        assert_eq!(parse_quantity("ff").unwrap(), 255);
        assert!(parse_quantity("0xzz").is_err());
    }

    #[test]
    fn raw_log_parses_wire_shape() {
        let raw = RawLog {
            address: format!("{:#x}", Address::repeat_byte(0x01)),
            topics: vec![format!("{:#x}", B256::repeat_byte(0x02))],
            data: "0x0102".into(),
            block_number: Some("0x10".into()),
            transaction_hash: Some(format!("{:#x}", B256::repeat_byte(0x03))),
        };
        let log = raw.into_log().unwrap();
        assert_eq!(log.address, Address::repeat_byte(0x01));
        assert_eq!(log.topics, vec![B256::repeat_byte(0x02)]);
        assert_eq!(log.data, vec![0x01, 0x02]);
        assert_eq!(log.block_number, 16);
    }

    #[test]
    fn selector_payload_shapes() {
        let mut data = SELECTOR_IS_KNOWN_ROOT.to_vec();
        data.extend_from_slice(&fr_to_bytes32(&Fr::from(1u64)));
        assert_eq!(data.len(), 36);
        assert_eq!(&data[..4], &[0x6d, 0x98, 0x33, 0xe3]);
    }
}
