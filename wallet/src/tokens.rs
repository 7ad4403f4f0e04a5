//! Token registry for the swap surface.
//!
//! DOGE is the built-in native token and cannot be removed or replaced;
//! user-added entries are persisted through the wallet store.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use alloy_primitives::Address;

use crate::error::WalletError;
use crate::notes::TokenInfo;

pub const NATIVE_TOKEN_SYMBOL: &str = "DOGE";
pub const NATIVE_TOKEN_DECIMALS: u8 = 18;

/// The built-in native token.
pub fn native_token() -> TokenInfo {
    TokenInfo {
        symbol: NATIVE_TOKEN_SYMBOL.to_string(),
        address: Address::ZERO,
        decimals: NATIVE_TOKEN_DECIMALS,
        is_native: true,
    }
}

/// At-rest layout for one user-added token entry.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoredToken {
    pub address: String,
    pub decimals: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_native: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct TokenRegistry {
    custom: BTreeMap<String, TokenInfo>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a token by symbol; DOGE always resolves.
    pub fn get(&self, symbol: &str) -> Option<TokenInfo> {
        if symbol.eq_ignore_ascii_case(NATIVE_TOKEN_SYMBOL) {
            return Some(native_token());
        }
        self.custom.get(symbol).cloned()
    }

    pub fn add(&mut self, token: TokenInfo) -> Result<(), WalletError> {
        if token.symbol.eq_ignore_ascii_case(NATIVE_TOKEN_SYMBOL) {
            return Err(WalletError::InvalidInput(
                "the native token entry cannot be replaced".into(),
            ));
        }
        if token.symbol.trim().is_empty() {
            return Err(WalletError::InvalidInput("token symbol is empty".into()));
        }
        self.custom.insert(token.symbol.clone(), token);
        Ok(())
    }

    pub fn remove(&mut self, symbol: &str) -> Result<(), WalletError> {
        if symbol.eq_ignore_ascii_case(NATIVE_TOKEN_SYMBOL) {
            return Err(WalletError::InvalidInput(
                "the native token cannot be removed".into(),
            ));
        }
        self.custom
            .remove(symbol)
            .map(|_| ())
            .ok_or_else(|| WalletError::InvalidInput(format!("unknown token {symbol}")))
    }

    /// All tokens, native first.
    pub fn list(&self) -> Vec<TokenInfo> {
        let mut tokens = vec![native_token()];
        tokens.extend(self.custom.values().cloned());
        tokens
    }

    /// User-added entries only, in the persisted layout.
    pub fn to_stored(&self) -> BTreeMap<String, StoredToken> {
        self.custom
            .iter()
            .map(|(symbol, token)| {
                (
                    symbol.clone(),
                    StoredToken {
                        address: format!("{:#x}", token.address),
                        decimals: token.decimals,
                        is_native: token.is_native.then_some(true),
                    },
                )
            })
            .collect()
    }

    pub fn from_stored(stored: &BTreeMap<String, StoredToken>) -> Result<Self, WalletError> {
        let mut registry = Self::new();
        for (symbol, entry) in stored {
            let address: Address = entry
                .address
                .parse()
                .map_err(|_| WalletError::Serialization(format!("bad address for {symbol}")))?;
            registry.add(TokenInfo {
                symbol: symbol.clone(),
                address,
                decimals: entry.decimals,
                is_native: entry.is_native.unwrap_or(false),
            })?;
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wdoge() -> TokenInfo {
        TokenInfo {
            symbol: "WDOGE".into(),
            address: Address::repeat_byte(0x11),
            decimals: 18,
            is_native: false,
        }
    }

    #[test]
    fn native_token_always_present() {
        let registry = TokenRegistry::new();
        let doge = registry.get("DOGE").unwrap();
        assert!(doge.is_native);
        assert_eq!(registry.get("doge").unwrap().symbol, "DOGE");
    }

    #[test]
    fn native_token_is_protected() {
        let mut registry = TokenRegistry::new();
        assert!(registry.remove("DOGE").is_err());
        assert!(registry.add(native_token()).is_err());
    }

    #[test]
    fn add_remove_round_trip() {
        let mut registry = TokenRegistry::new();
        registry.add(wdoge()).unwrap();
        assert_eq!(registry.get("WDOGE").unwrap(), wdoge());
        assert_eq!(registry.list().len(), 2);

        let stored = registry.to_stored();
        let restored = TokenRegistry::from_stored(&stored).unwrap();
        assert_eq!(restored.get("WDOGE").unwrap(), wdoge());

        registry.remove("WDOGE").unwrap();
        assert!(registry.get("WDOGE").is_none());
        assert!(registry.remove("WDOGE").is_err());
    }
}
