//! On-chain event shapes the core parses.
//!
//! Topic-0 constants are derived from the declared signatures below; the
//! deployed contract ABI is authoritative at integration time. Data
//! payloads are decoded manually with bounds checks — the shapes are fixed
//! and small, and anything off-shape must surface as `EventMalformed`
//! rather than panic.

use std::sync::LazyLock;

use alloy_primitives::{Address, B256, U256};
use dogenado_crypto::{fr_from_bytes32, keccak256, Fr};

use crate::error::WalletError;
use crate::memo::EncryptedMemo;

/// Narrow mirror of an `eth_getLogs` entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Vec<u8>,
    pub block_number: u64,
    pub tx_hash: B256,
}

const TRANSFER_SIGNATURE: &str =
    "ShieldedTransfer(bytes32,uint256,uint256,bytes32,bytes32,bytes,bytes,uint256)";
const UNSHIELD_SIGNATURE: &str =
    "Unshield(bytes32,address,address,uint256,bytes32,address,uint256,uint256)";

static TRANSFER_TOPIC: LazyLock<B256> =
    LazyLock::new(|| B256::from(keccak256(TRANSFER_SIGNATURE.as_bytes())));
static UNSHIELD_TOPIC: LazyLock<B256> =
    LazyLock::new(|| B256::from(keccak256(UNSHIELD_SIGNATURE.as_bytes())));

pub fn transfer_topic() -> B256 {
    *TRANSFER_TOPIC
}

pub fn unshield_topic() -> B256 {
    *UNSHIELD_TOPIC
}

/// A parsed shielded transfer: one spent nullifier, two fresh outputs.
#[derive(Clone, Debug)]
pub struct TransferEvent {
    pub nullifier_hash: B256,
    pub leaf_index_1: u64,
    pub leaf_index_2: u64,
    pub commitment_1: Fr,
    pub commitment_2: Fr,
    pub memo_1: EncryptedMemo,
    pub memo_2: EncryptedMemo,
    pub timestamp: u64,
    pub block_number: u64,
    pub tx_hash: B256,
}

impl TransferEvent {
    /// The two `(leaf index, commitment, memo)` output slots.
    pub fn outputs(&self) -> [(u64, Fr, &EncryptedMemo); 2] {
        [
            (self.leaf_index_1, self.commitment_1, &self.memo_1),
            (self.leaf_index_2, self.commitment_2, &self.memo_2),
        ]
    }
}

/// A parsed unshield. `change_commitment` is absent on the V2 shape.
#[derive(Clone, Debug)]
pub struct UnshieldEvent {
    pub nullifier_hash: B256,
    pub recipient: Address,
    pub token: Address,
    pub amount: U256,
    pub change_commitment: Option<Fr>,
    pub relayer: Address,
    pub fee: U256,
    pub timestamp: u64,
    pub block_number: u64,
    pub tx_hash: B256,
}

/// Interpret any pool log with three or more topics as a leaf insertion:
/// `topic[1]` commitment, `topic[2]` leaf index.
///
/// Logs whose topics do not fit that shape (an unshield's recipient topic,
/// a commitment at an impossible index) return `None` and are skipped by
/// the caller. A transfer event read this way yields its nullifier hash at
/// `leafIndex1`, which the first-occurrence dedup in the tree build drops
/// in favor of the dedicated insertion event emitted earlier in the
/// same transaction.
pub fn parse_leaf_insertion(log: &Log) -> Option<(u64, Fr)> {
    if log.topics.len() < 3 {
        return None;
    }
    let commitment = fr_from_bytes32(&log.topics[1].0).ok()?;
    let index = topic_to_u64(&log.topics[2]).ok()?;
    if index >= 1u64 << state_merkle::TREE_DEPTH {
        return None;
    }
    Some((index, commitment))
}

pub fn parse_transfer(log: &Log, pool: Address) -> Result<TransferEvent, WalletError> {
    if log.address != pool {
        return Err(WalletError::EventMalformed(
            "transfer event from foreign contract".into(),
        ));
    }
    if log.topics.len() != 4 || log.topics[0] != *TRANSFER_TOPIC {
        return Err(WalletError::EventMalformed(
            "unexpected transfer topic shape".into(),
        ));
    }
    let leaf_index_1 = topic_to_u64(&log.topics[2])?;
    let leaf_index_2 = topic_to_u64(&log.topics[3])?;

    // Head: C1, C2, offset(memo1), offset(memo2), timestamp.
    let commitment_1 = word_as_fr(&log.data, 0)?;
    let commitment_2 = word_as_fr(&log.data, 1)?;
    let memo_1 = EncryptedMemo::from_bytes(&dynamic_bytes(&log.data, 2)?)?;
    let memo_2 = EncryptedMemo::from_bytes(&dynamic_bytes(&log.data, 3)?)?;
    let timestamp = word_as_u64(&log.data, 4)?;

    Ok(TransferEvent {
        nullifier_hash: log.topics[1],
        leaf_index_1,
        leaf_index_2,
        commitment_1,
        commitment_2,
        memo_1,
        memo_2,
        timestamp,
        block_number: log.block_number,
        tx_hash: log.tx_hash,
    })
}

pub fn parse_unshield(log: &Log, pool: Address) -> Result<UnshieldEvent, WalletError> {
    if log.address != pool {
        return Err(WalletError::EventMalformed(
            "unshield event from foreign contract".into(),
        ));
    }
    if log.topics.len() != 4 || log.topics[0] != *UNSHIELD_TOPIC {
        return Err(WalletError::EventMalformed(
            "unexpected unshield topic shape".into(),
        ));
    }
    let recipient = topic_to_address(&log.topics[2])?;
    let token = topic_to_address(&log.topics[3])?;

    // V3 carries a changeCommitment word the V2 shape lacks; the data
    // length discriminates.
    let (amount, change_commitment, relayer, fee, timestamp) = match log.data.len() {
        160 => (
            word_as_u256(&log.data, 0)?,
            Some(word_as_fr(&log.data, 1)?),
            word_as_address(&log.data, 2)?,
            word_as_u256(&log.data, 3)?,
            word_as_u64(&log.data, 4)?,
        ),
        128 => (
            word_as_u256(&log.data, 0)?,
            None,
            word_as_address(&log.data, 1)?,
            word_as_u256(&log.data, 2)?,
            word_as_u64(&log.data, 3)?,
        ),
        other => {
            return Err(WalletError::EventMalformed(format!(
                "unshield data length {other}"
            )))
        }
    };
    if fee > amount {
        return Err(WalletError::EventMalformed(
            "unshield fee exceeds amount".into(),
        ));
    }

    Ok(UnshieldEvent {
        nullifier_hash: log.topics[1],
        recipient,
        token,
        amount,
        change_commitment,
        relayer,
        fee,
        timestamp,
        block_number: log.block_number,
        tx_hash: log.tx_hash,
    })
}

fn word(data: &[u8], index: usize) -> Result<[u8; 32], WalletError> {
    let start = index * 32;
    let end = start + 32;
    if data.len() < end {
        return Err(WalletError::EventMalformed(format!(
            "event data truncated at word {index}"
        )));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&data[start..end]);
    Ok(out)
}

fn word_as_u256(data: &[u8], index: usize) -> Result<U256, WalletError> {
    Ok(U256::from_be_bytes(word(data, index)?))
}

fn word_as_u64(data: &[u8], index: usize) -> Result<u64, WalletError> {
    u64::try_from(word_as_u256(data, index)?)
        .map_err(|_| WalletError::EventMalformed(format!("word {index} exceeds u64")))
}

fn word_as_fr(data: &[u8], index: usize) -> Result<Fr, WalletError> {
    fr_from_bytes32(&word(data, index)?)
        .map_err(|_| WalletError::EventMalformed(format!("word {index} is not a field element")))
}

fn word_as_address(data: &[u8], index: usize) -> Result<Address, WalletError> {
    let raw = word(data, index)?;
    if raw[..12].iter().any(|byte| *byte != 0) {
        return Err(WalletError::EventMalformed(format!(
            "word {index} is not an address"
        )));
    }
    Ok(Address::from_slice(&raw[12..]))
}

/// Resolve an ABI `bytes` head slot into its payload.
fn dynamic_bytes(data: &[u8], head_index: usize) -> Result<Vec<u8>, WalletError> {
    let offset = usize::try_from(word_as_u256(data, head_index)?)
        .map_err(|_| WalletError::EventMalformed("bytes offset overflow".into()))?;
    if offset + 32 > data.len() {
        return Err(WalletError::EventMalformed("bytes offset out of range".into()));
    }
    let mut length_word = [0u8; 32];
    length_word.copy_from_slice(&data[offset..offset + 32]);
    let length = usize::try_from(U256::from_be_bytes(length_word))
        .map_err(|_| WalletError::EventMalformed("bytes length overflow".into()))?;
    let start = offset + 32;
    let end = start
        .checked_add(length)
        .ok_or_else(|| WalletError::EventMalformed("bytes length overflow".into()))?;
    if end > data.len() {
        return Err(WalletError::EventMalformed("bytes payload out of range".into()));
    }
    Ok(data[start..end].to_vec())
}

fn topic_to_u64(topic: &B256) -> Result<u64, WalletError> {
    u64::try_from(U256::from_be_bytes(topic.0))
        .map_err(|_| WalletError::EventMalformed("topic exceeds u64".into()))
}

fn topic_to_address(topic: &B256) -> Result<Address, WalletError> {
    if topic.0[..12].iter().any(|byte| *byte != 0) {
        return Err(WalletError::EventMalformed(
            "topic is not a padded address".into(),
        ));
    }
    Ok(Address::from_slice(&topic.0[12..]))
}

/// Left-pad an address into a 32-byte topic.
pub fn address_topic(address: Address) -> B256 {
    B256::left_padding_from(address.as_slice())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use dogenado_crypto::fr_to_bytes32;

    pub(crate) const POOL: Address = Address::repeat_byte(0xaa);

    fn u256_word(value: u64) -> [u8; 32] {
        U256::from(value).to_be_bytes()
    }

    /// ABI-encode a transfer event body the way the pool emits it.
    pub(crate) fn transfer_log(
        nullifier_hash: B256,
        leaves: (u64, u64),
        commitments: (Fr, Fr),
        memos: (&[u8], &[u8]),
        block_number: u64,
        tx_hash: B256,
    ) -> Log {
        let mut data = Vec::new();
        data.extend_from_slice(&fr_to_bytes32(&commitments.0));
        data.extend_from_slice(&fr_to_bytes32(&commitments.1));
        let memo1_offset = 5 * 32;
        let memo1_padded = memos.0.len().div_ceil(32) * 32;
        let memo2_offset = memo1_offset + 32 + memo1_padded;
        data.extend_from_slice(&u256_word(memo1_offset as u64));
        data.extend_from_slice(&u256_word(memo2_offset as u64));
        data.extend_from_slice(&u256_word(1_700_000_000));
        for memo in [memos.0, memos.1] {
            data.extend_from_slice(&u256_word(memo.len() as u64));
            data.extend_from_slice(memo);
            data.resize(data.len() + (32 - memo.len() % 32) % 32, 0);
        }
        Log {
            address: POOL,
            topics: vec![
                transfer_topic(),
                nullifier_hash,
                B256::from(u256_word(leaves.0)),
                B256::from(u256_word(leaves.1)),
            ],
            data,
            block_number,
            tx_hash,
        }
    }

    fn unshield_log(data_words: &[[u8; 32]], recipient: Address) -> Log {
        Log {
            address: POOL,
            topics: vec![
                unshield_topic(),
                B256::repeat_byte(0x01),
                address_topic(recipient),
                address_topic(Address::ZERO),
            ],
            data: data_words.concat(),
            block_number: 10,
            tx_hash: B256::repeat_byte(0x02),
        }
    }

    fn memo_bytes(tag: u8) -> Vec<u8> {
        let mut memo = vec![0u8; 64];
        memo[31] = 1; // ephemeral = 1
        memo[63] = 2; // nonce = 2
        memo.extend_from_slice(&[tag; 40]);
        memo
    }

    #[test]
    fn transfer_round_trip() {
        let memo1 = memo_bytes(0x33);
        let memo2 = memo_bytes(0x44);
        let log = transfer_log(
            B256::repeat_byte(0x05),
            (12, 13),
            (Fr::from(111u64), Fr::from(222u64)),
            (&memo1, &memo2),
            42,
            B256::repeat_byte(0x06),
        );
        let event = parse_transfer(&log, POOL).unwrap();
        assert_eq!(event.leaf_index_1, 12);
        assert_eq!(event.leaf_index_2, 13);
        assert_eq!(event.commitment_1, Fr::from(111u64));
        assert_eq!(event.commitment_2, Fr::from(222u64));
        assert_eq!(event.memo_1.to_bytes(), memo1);
        assert_eq!(event.memo_2.to_bytes(), memo2);
        assert_eq!(event.timestamp, 1_700_000_000);
    }

    #[test]
    fn transfer_rejects_foreign_contract_and_bad_topics() {
        let memo = memo_bytes(0x33);
        let mut log = transfer_log(
            B256::ZERO,
            (0, 1),
            (Fr::from(1u64), Fr::from(2u64)),
            (&memo, &memo),
            1,
            B256::ZERO,
        );
        assert!(parse_transfer(&log, Address::repeat_byte(0xbb)).is_err());
        log.topics.truncate(3);
        assert!(parse_transfer(&log, POOL).is_err());
    }

    #[test]
    fn transfer_rejects_truncated_data() {
        let memo = memo_bytes(0x33);
        let mut log = transfer_log(
            B256::ZERO,
            (0, 1),
            (Fr::from(1u64), Fr::from(2u64)),
            (&memo, &memo),
            1,
            B256::ZERO,
        );
        log.data.truncate(4 * 32);
        assert!(matches!(
            parse_transfer(&log, POOL),
            Err(WalletError::EventMalformed(_))
        ));
    }

    #[test]
    fn unshield_v3_and_v2_shapes() {
        let recipient = Address::repeat_byte(0x07);
        let change = Fr::from(9u64);
        let v3 = unshield_log(
            &[
                u256_word(1_000),
                fr_to_bytes32(&change),
                [0u8; 32],
                u256_word(30),
                u256_word(1_700_000_001),
            ],
            recipient,
        );
        let event = parse_unshield(&v3, POOL).unwrap();
        assert_eq!(event.amount, U256::from(1_000u64));
        assert_eq!(event.change_commitment, Some(change));
        assert_eq!(event.fee, U256::from(30u64));
        assert_eq!(event.recipient, recipient);

        let v2 = unshield_log(
            &[u256_word(500), [0u8; 32], u256_word(5), u256_word(1_700_000_002)],
            recipient,
        );
        let event = parse_unshield(&v2, POOL).unwrap();
        assert_eq!(event.change_commitment, None);
        assert_eq!(event.amount, U256::from(500u64));
    }

    #[test]
    fn unshield_rejects_fee_above_amount_and_odd_lengths() {
        let recipient = Address::repeat_byte(0x07);
        let bad_fee = unshield_log(
            &[u256_word(10), [0u8; 32], u256_word(11), u256_word(0)],
            recipient,
        );
        assert!(parse_unshield(&bad_fee, POOL).is_err());

        let odd = Log {
            data: vec![0u8; 96],
            ..unshield_log(&[], recipient)
        };
        assert!(parse_unshield(&odd, POOL).is_err());
    }

    #[test]
    fn leaf_insertion_accepts_generic_logs_and_skips_odd_shapes() {
        let commitment = Fr::from(77u64);
        let log = Log {
            address: POOL,
            topics: vec![
                B256::repeat_byte(0x99),
                B256::from(fr_to_bytes32(&commitment)),
                B256::from(u256_word(4)),
            ],
            data: Vec::new(),
            block_number: 1,
            tx_hash: B256::ZERO,
        };
        assert_eq!(parse_leaf_insertion(&log), Some((4, commitment)));

        let two_topics = Log {
            topics: vec![B256::ZERO, B256::ZERO],
            ..log.clone()
        };
        assert_eq!(parse_leaf_insertion(&two_topics), None);

        let address_as_index = Log {
            topics: vec![
                B256::ZERO,
                B256::from(fr_to_bytes32(&commitment)),
                B256::repeat_byte(0xee),
            ],
            ..log
        };
        assert_eq!(parse_leaf_insertion(&address_as_index), None);
    }
}
