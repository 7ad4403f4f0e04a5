//! The shielded note record and its derivations.
//!
//! A note binds an amount, an owner address and two random scalars into
//! the commitment `C = H(H(v, A), H(s, b))` published on-chain. Spending
//! requires the confirmed leaf index: the nullifier is
//! `N = H(H(s, l), sk)` and the published nullifier hash is `H(N, N)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use alloy_primitives::Address;
use dogenado_crypto::{fr_from_hex, fr_to_hex, hash2, random_fr, Fr};

use crate::error::WalletError;
use crate::keys::SpendingKey;

const NOTE_VERSION: u32 = 1;
const SHAREABLE_PREFIX: &str = "dogenado-note-v";

/// Token metadata carried by every note.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenInfo {
    pub symbol: String,
    #[serde(with = "serde_evm_address")]
    pub address: Address,
    pub decimals: u8,
    #[serde(default)]
    pub is_native: bool,
}

/// A shielded note. `leaf_index` is `None` until the on-chain insertion
/// event has been observed; an unconfirmed note cannot be spent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Note {
    pub amount: u128,
    pub owner: Fr,
    pub secret: Fr,
    pub blinding: Fr,
    pub commitment: Fr,
    pub token: TokenInfo,
    pub leaf_index: Option<u64>,
    pub created_at: DateTime<Utc>,
}

/// `C = H(H(v, A), H(s, b))`.
pub fn compute_commitment(amount: u128, owner: Fr, secret: Fr, blinding: Fr) -> Fr {
    hash2(hash2(Fr::from(amount), owner), hash2(secret, blinding))
}

impl Note {
    /// Create a note with fresh randomness.
    pub fn create(amount: u128, owner: Fr, token: TokenInfo) -> Result<Self, WalletError> {
        let secret = random_fr()?;
        let blinding = random_fr()?;
        Ok(Self::reconstruct(amount, owner, secret, blinding, token))
    }

    /// Rebuild a note from known scalars, recomputing the commitment.
    pub fn reconstruct(
        amount: u128,
        owner: Fr,
        secret: Fr,
        blinding: Fr,
        token: TokenInfo,
    ) -> Self {
        Self {
            amount,
            owner,
            secret,
            blinding,
            commitment: compute_commitment(amount, owner, secret, blinding),
            token,
            leaf_index: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.leaf_index.is_some()
    }

    /// Builder-style helper to attach a confirmed leaf index.
    pub fn with_leaf(mut self, leaf_index: u64) -> Self {
        self.leaf_index = Some(leaf_index);
        self
    }

    /// The nullifier pair `(N, H(N, N))` for this note under `sk`.
    pub fn nullifier(&self, sk: &SpendingKey) -> Result<(Fr, Fr), WalletError> {
        let leaf_index = self.leaf_index.ok_or(WalletError::NoLeafIndex)?;
        let nullifier = hash2(hash2(self.secret, Fr::from(leaf_index)), sk.as_fr());
        Ok((nullifier, hash2(nullifier, nullifier)))
    }

    /// The published nullifier hash.
    pub fn nullifier_hash(&self, sk: &SpendingKey) -> Result<Fr, WalletError> {
        Ok(self.nullifier(sk)?.1)
    }

    pub fn to_stored(&self) -> StoredNote {
        StoredNote {
            amount: self.amount.to_string(),
            owner_pubkey: fr_to_hex(&self.owner),
            secret: fr_to_hex(&self.secret),
            blinding: fr_to_hex(&self.blinding),
            commitment: fr_to_hex(&self.commitment),
            leaf_index: self.leaf_index,
            token: self.token.symbol.clone(),
            token_address: format!("{:#x}", self.token.address),
            decimals: self.token.decimals,
            is_native: self.token.is_native,
            created_at: self.created_at,
            version: NOTE_VERSION,
        }
    }

    /// Parse the at-rest layout, recomputing the commitment and rejecting
    /// any record whose stored commitment disagrees.
    pub fn from_stored(stored: &StoredNote) -> Result<Self, WalletError> {
        if stored.version != NOTE_VERSION {
            return Err(WalletError::Serialization(format!(
                "unsupported note version {}",
                stored.version
            )));
        }
        let amount: u128 = stored
            .amount
            .parse()
            .map_err(|_| WalletError::InvalidInput(format!("bad note amount {:?}", stored.amount)))?;
        let owner = fr_from_hex(&stored.owner_pubkey)
            .map_err(|err| WalletError::Serialization(err.to_string()))?;
        let secret = fr_from_hex(&stored.secret)
            .map_err(|err| WalletError::Serialization(err.to_string()))?;
        let blinding = fr_from_hex(&stored.blinding)
            .map_err(|err| WalletError::Serialization(err.to_string()))?;
        let claimed = fr_from_hex(&stored.commitment)
            .map_err(|err| WalletError::Serialization(err.to_string()))?;
        let token_address: Address = stored
            .token_address
            .parse()
            .map_err(|_| WalletError::Serialization("bad token address".into()))?;

        let commitment = compute_commitment(amount, owner, secret, blinding);
        if commitment != claimed {
            return Err(WalletError::CommitmentMismatch);
        }
        Ok(Self {
            amount,
            owner,
            secret,
            blinding,
            commitment,
            token: TokenInfo {
                symbol: stored.token.clone(),
                address: token_address,
                decimals: stored.decimals,
                is_native: stored.is_native,
            },
            leaf_index: stored.leaf_index,
            created_at: stored.created_at,
        })
    }

    /// Shareable string form: `dogenado-note-v1-<base64(json)>`.
    pub fn encode_shareable(&self) -> Result<String, WalletError> {
        use base64::Engine;
        let json = serde_json::to_vec(&self.to_stored())?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(json);
        Ok(format!("{SHAREABLE_PREFIX}{NOTE_VERSION}-{encoded}"))
    }

    /// Parse a shareable note string. The version token is validated
    /// before any base64 or scalar work happens.
    pub fn decode_shareable(input: &str) -> Result<Self, WalletError> {
        use base64::Engine;
        let tail = input
            .trim()
            .strip_prefix(SHAREABLE_PREFIX)
            .ok_or_else(|| WalletError::InvalidInput("not a dogenado note string".into()))?;
        let (version, payload) = tail
            .split_once('-')
            .ok_or_else(|| WalletError::InvalidInput("truncated note string".into()))?;
        if version != "1" {
            return Err(WalletError::Serialization(format!(
                "unsupported note version {version}"
            )));
        }
        let json = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .map_err(|err| WalletError::Serialization(err.to_string()))?;
        let stored: StoredNote = serde_json::from_slice(&json)?;
        Self::from_stored(&stored)
    }
}

/// At-rest note layout.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoredNote {
    pub amount: String,
    pub owner_pubkey: String,
    pub secret: String,
    pub blinding: String,
    pub commitment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leaf_index: Option<u64>,
    pub token: String,
    pub token_address: String,
    pub decimals: u8,
    #[serde(default)]
    pub is_native: bool,
    pub created_at: DateTime<Utc>,
    pub version: u32,
}

/// Parse a human decimal amount into the token's smallest unit.
///
/// Zero is allowed (fee-less variants); negative and malformed inputs are
/// not, and the fractional part may not exceed the token's precision.
pub fn parse_amount(input: &str, decimals: u8) -> Result<u128, WalletError> {
    let trimmed = input.trim();
    if trimmed.is_empty() || trimmed.starts_with('-') || trimmed.starts_with('+') {
        return Err(WalletError::InvalidInput(format!(
            "invalid amount {trimmed:?}"
        )));
    }
    let (integer, fraction) = match trimmed.split_once('.') {
        Some((i, f)) => (i, f),
        None => (trimmed, ""),
    };
    if integer.is_empty() && fraction.is_empty() {
        return Err(WalletError::InvalidInput("empty amount".into()));
    }
    if !integer.chars().all(|c| c.is_ascii_digit())
        || !fraction.chars().all(|c| c.is_ascii_digit())
    {
        return Err(WalletError::InvalidInput(format!(
            "invalid amount {trimmed:?}"
        )));
    }
    if fraction.len() > decimals as usize {
        return Err(WalletError::InvalidInput(format!(
            "amount has more than {decimals} decimal places"
        )));
    }

    let scale = 10u128
        .checked_pow(decimals as u32)
        .ok_or_else(|| WalletError::InvalidInput("unsupported token precision".into()))?;
    let integer_part: u128 = if integer.is_empty() {
        0
    } else {
        integer
            .parse()
            .map_err(|_| WalletError::InvalidInput("amount too large".into()))?
    };
    let mut fraction_part: u128 = 0;
    if !fraction.is_empty() {
        fraction_part = fraction
            .parse()
            .map_err(|_| WalletError::InvalidInput("amount too large".into()))?;
        fraction_part *= 10u128.pow((decimals as usize - fraction.len()) as u32);
    }
    integer_part
        .checked_mul(scale)
        .and_then(|scaled| scaled.checked_add(fraction_part))
        .ok_or_else(|| WalletError::InvalidInput("amount too large".into()))
}

/// Format a smallest-unit amount back into a trimmed decimal string.
pub fn format_amount(amount: u128, decimals: u8) -> String {
    if decimals == 0 {
        return amount.to_string();
    }
    let scale = 10u128.pow(decimals as u32);
    let integer = amount / scale;
    let fraction = amount % scale;
    if fraction == 0 {
        return integer.to_string();
    }
    let padded = format!("{fraction:0width$}", width = decimals as usize);
    format!("{integer}.{}", padded.trim_end_matches('0'))
}

mod serde_evm_address {
    use alloy_primitives::Address;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Address, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{value:#x}"))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Address, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse()
            .map_err(|_| serde::de::Error::custom("invalid EVM address"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::Identity;

    pub(crate) fn test_token() -> TokenInfo {
        TokenInfo {
            symbol: "DOGE".into(),
            address: Address::ZERO,
            decimals: 18,
            is_native: true,
        }
    }

    #[test]
    fn commitment_matches_definition() {
        let owner = hash2(Fr::from(1u64), Fr::from(2u64));
        let note = Note::reconstruct(100, owner, Fr::from(2u64), Fr::from(3u64), test_token());
        let expected = hash2(
            hash2(Fr::from(100u64), owner),
            hash2(Fr::from(2u64), Fr::from(3u64)),
        );
        assert_eq!(note.commitment, expected);
    }

    #[test]
    fn nullifier_requires_leaf_index() {
        let identity = Identity::recover(Fr::from(1u64)).unwrap();
        let mut note = Note::reconstruct(
            5,
            identity.shielded_address(),
            Fr::from(2u64),
            Fr::from(3u64),
            test_token(),
        );
        assert!(matches!(
            note.nullifier_hash(identity.spending_key()),
            Err(WalletError::NoLeafIndex)
        ));

        note.leaf_index = Some(0);
        let nullifier = hash2(hash2(Fr::from(2u64), Fr::from(0u64)), Fr::from(1u64));
        let expected = hash2(nullifier, nullifier);
        assert_eq!(
            note.nullifier_hash(identity.spending_key()).unwrap(),
            expected
        );
    }

    #[test]
    fn stored_round_trip_preserves_note() {
        let mut note = Note::create(42, Fr::from(9u64), test_token()).unwrap();
        note.leaf_index = Some(17);
        let restored = Note::from_stored(&note.to_stored()).unwrap();
        assert_eq!(restored, note);
    }

    #[test]
    fn tampered_commitment_rejected() {
        let note = Note::create(42, Fr::from(9u64), test_token()).unwrap();
        let mut stored = note.to_stored();
        stored.commitment = fr_to_hex(&Fr::from(1u64));
        assert!(matches!(
            Note::from_stored(&stored),
            Err(WalletError::CommitmentMismatch)
        ));
    }

    #[test]
    fn shareable_round_trip_and_version_gate() {
        let note = Note::create(1_000_000, Fr::from(3u64), test_token()).unwrap();
        let encoded = note.encode_shareable().unwrap();
        assert!(encoded.starts_with("dogenado-note-v1-"));
        assert_eq!(Note::decode_shareable(&encoded).unwrap(), note);

        let bumped = encoded.replacen("-v1-", "-v2-", 1);
        assert!(Note::decode_shareable(&bumped).is_err());
        assert!(Note::decode_shareable("garbage").is_err());
    }

    #[test]
    fn amount_parsing_boundaries() {
        assert_eq!(parse_amount("1", 18).unwrap(), 10u128.pow(18));
        assert_eq!(parse_amount("0.5", 18).unwrap(), 5 * 10u128.pow(17));
        assert_eq!(parse_amount("100", 18).unwrap(), 100 * 10u128.pow(18));
        assert_eq!(parse_amount("0", 18).unwrap(), 0);
        assert_eq!(parse_amount(".25", 2).unwrap(), 25);
        assert!(parse_amount("-1", 18).is_err());
        assert!(parse_amount("1.2.3", 18).is_err());
        assert!(parse_amount("0.123", 2).is_err());
        assert!(parse_amount("abc", 18).is_err());
        assert!(parse_amount("", 18).is_err());
    }

    #[test]
    fn amount_formatting_trims_zeros() {
        assert_eq!(format_amount(10u128.pow(18), 18), "1");
        assert_eq!(format_amount(5 * 10u128.pow(17), 18), "0.5");
        assert_eq!(format_amount(0, 18), "0");
        assert_eq!(format_amount(1_234, 2), "12.34");
        assert_eq!(format_amount(7, 0), "7");
    }
}
