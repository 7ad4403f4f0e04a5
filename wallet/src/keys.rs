//! Shielded identity: spending key, viewing key, shielded address.
//!
//! All three are BN254 scalars. The viewing key and shielded address are
//! domain-separated hashes of the spending key, so an identity is fully
//! determined by `sk` and every derivation is re-checkable.

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use ark_ff::Zero;
use dogenado_crypto::{
    fr_from_hex, fr_reduce_bytes, fr_to_bytes32, fr_to_hex, hash2, random_fr, Fr,
    TAG_SHIELDED_ADDRESS, TAG_VIEWING_KEY,
};

use crate::address;
use crate::error::WalletError;

const IDENTITY_VERSION: u32 = 1;

/// Spending key material, held as canonical bytes so it can be zeroized.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SpendingKey([u8; 32]);

impl SpendingKey {
    fn from_fr(value: &Fr) -> Self {
        Self(fr_to_bytes32(value))
    }

    /// The key as a field element. Always reduced by construction.
    pub fn as_fr(&self) -> Fr {
        fr_reduce_bytes(&self.0)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Debug for SpendingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SpendingKey(<redacted>)")
    }
}

/// A shielded identity and its public derivations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    spending_key: SpendingKey,
    viewing_key: Fr,
    shielded_address: Fr,
    address_string: String,
}

impl Identity {
    /// Generate a fresh identity from OS randomness.
    pub fn generate() -> Result<Self, WalletError> {
        loop {
            let sk = random_fr()?;
            if !sk.is_zero() {
                return Ok(Self::derive(sk));
            }
        }
    }

    /// Restore an identity from its spending key.
    ///
    /// A zero key is rejected; out-of-field encodings never reach here
    /// because `Fr` is reduced by construction.
    pub fn recover(sk: Fr) -> Result<Self, WalletError> {
        if sk.is_zero() {
            return Err(WalletError::InvalidInput(
                "spending key must be non-zero".into(),
            ));
        }
        Ok(Self::derive(sk))
    }

    fn derive(sk: Fr) -> Self {
        let viewing_key = hash2(sk, TAG_VIEWING_KEY);
        let shielded_address = hash2(sk, TAG_SHIELDED_ADDRESS);
        let address_string = address::encode(&shielded_address);
        Self {
            spending_key: SpendingKey::from_fr(&sk),
            viewing_key,
            shielded_address,
            address_string,
        }
    }

    pub fn spending_key(&self) -> &SpendingKey {
        &self.spending_key
    }

    pub fn viewing_key(&self) -> Fr {
        self.viewing_key
    }

    pub fn shielded_address(&self) -> Fr {
        self.shielded_address
    }

    pub fn address_string(&self) -> &str {
        &self.address_string
    }

    /// Export the spending key as 64-hex.
    pub fn export_spending_key(&self) -> String {
        self.spending_key.to_hex()
    }

    /// Import a 64-hex spending key and re-derive the identity.
    pub fn import_spending_key(input: &str) -> Result<Self, WalletError> {
        let sk = fr_from_hex(input.trim())
            .map_err(|err| WalletError::InvalidInput(format!("spending key: {err}")))?;
        Self::recover(sk)
    }

    pub fn to_stored(&self) -> StoredIdentity {
        StoredIdentity {
            spending_key: self.spending_key.to_hex(),
            viewing_key: fr_to_hex(&self.viewing_key),
            shielded_address: fr_to_hex(&self.shielded_address),
            address_string: self.address_string.clone(),
            version: IDENTITY_VERSION,
        }
    }

    /// Rebuild from the at-rest layout, re-deriving and cross-checking the
    /// public components against the spending key.
    pub fn from_stored(stored: &StoredIdentity) -> Result<Self, WalletError> {
        if stored.version != IDENTITY_VERSION {
            return Err(WalletError::Serialization(format!(
                "unsupported identity version {}",
                stored.version
            )));
        }
        let identity = Self::import_spending_key(&stored.spending_key)?;
        let viewing = fr_from_hex(&stored.viewing_key)
            .map_err(|err| WalletError::Serialization(err.to_string()))?;
        let addr = fr_from_hex(&stored.shielded_address)
            .map_err(|err| WalletError::Serialization(err.to_string()))?;
        if viewing != identity.viewing_key || addr != identity.shielded_address {
            return Err(WalletError::Serialization(
                "stored identity derivations do not match the spending key".into(),
            ));
        }
        Ok(identity)
    }
}

/// At-rest identity layout.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoredIdentity {
    pub spending_key: String,
    pub viewing_key: String,
    pub shielded_address: String,
    pub address_string: String,
    pub version: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivations_are_deterministic() {
        let sk = Fr::from(1u64);
        let a = Identity::recover(sk).unwrap();
        let b = Identity::recover(sk).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.viewing_key(), hash2(sk, Fr::from(1u64)));
        assert_eq!(a.shielded_address(), hash2(sk, Fr::from(2u64)));
    }

    #[test]
    fn address_string_has_prefix_and_hex_tail() {
        let identity = Identity::recover(Fr::from(1u64)).unwrap();
        let encoded = identity.address_string();
        let tail = encoded.strip_prefix("zdoge:").expect("prefix");
        assert_eq!(tail.len(), 64);
        assert!(tail.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn zero_spending_key_rejected() {
        assert!(Identity::recover(Fr::from(0u64)).is_err());
        assert!(Identity::import_spending_key(&"0".repeat(64)).is_err());
    }

    #[test]
    fn oversized_spending_key_rejected() {
        // p < 2^254, so the all-ff encoding is out of field.
        assert!(Identity::import_spending_key(&"f".repeat(64)).is_err());
    }

    #[test]
    fn export_import_round_trip() {
        let identity = Identity::generate().unwrap();
        let exported = identity.export_spending_key();
        let restored = Identity::import_spending_key(&exported).unwrap();
        assert_eq!(identity, restored);
    }

    #[test]
    fn stored_round_trip_and_tamper_detection() {
        let identity = Identity::generate().unwrap();
        let stored = identity.to_stored();
        assert_eq!(Identity::from_stored(&stored).unwrap(), identity);

        let mut tampered = stored.clone();
        tampered.shielded_address = fr_to_hex(&Fr::from(42u64));
        assert!(Identity::from_stored(&tampered).is_err());

        let mut wrong_version = stored;
        wrong_version.version = 2;
        assert!(Identity::from_stored(&wrong_version).is_err());
    }
}
