//! Shielded address string codec.
//!
//! The canonical form is `zdoge:` followed by the address scalar as
//! lowercase 64-hex. Decoding also accepts the legacy
//! `dogenado:z<version><64-hex>` form with version `1`. The hex portion is
//! case-insensitive either way; anything that is not a reduced scalar is
//! rejected.

use dogenado_crypto::{fr_from_hex, fr_to_hex, Fr};

use crate::error::WalletError;

pub const ADDRESS_PREFIX: &str = "zdoge:";
const LEGACY_PREFIX: &str = "dogenado:z";
const LEGACY_VERSION: char = '1';

pub fn encode(address: &Fr) -> String {
    format!("{ADDRESS_PREFIX}{}", fr_to_hex(address))
}

pub fn decode(input: &str) -> Result<Fr, WalletError> {
    let trimmed = input.trim();
    if let Some(tail) = trimmed.strip_prefix(ADDRESS_PREFIX) {
        return decode_hex_tail(tail);
    }
    if let Some(tail) = trimmed.strip_prefix(LEGACY_PREFIX) {
        let mut chars = tail.chars();
        match chars.next() {
            Some(LEGACY_VERSION) => {}
            Some(other) => {
                return Err(WalletError::AddressEncoding(format!(
                    "unsupported legacy address version '{other}'"
                )))
            }
            None => {
                return Err(WalletError::AddressEncoding(
                    "legacy address is truncated".into(),
                ))
            }
        }
        return decode_hex_tail(chars.as_str());
    }
    Err(WalletError::AddressEncoding(format!(
        "unrecognized address prefix in {trimmed:?}"
    )))
}

fn decode_hex_tail(tail: &str) -> Result<Fr, WalletError> {
    if tail.len() != 64 {
        return Err(WalletError::AddressEncoding(format!(
            "expected 64 hex chars, got {}",
            tail.len()
        )));
    }
    fr_from_hex(tail).map_err(|err| WalletError::AddressEncoding(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let address = Fr::from(77_777u64);
        let encoded = encode(&address);
        assert!(encoded.starts_with("zdoge:"));
        assert_eq!(decode(&encoded).unwrap(), address);
    }

    #[test]
    fn hex_tail_is_case_insensitive() {
        let address = Fr::from(0xabcdefu64);
        let encoded = encode(&address).to_uppercase().replace("ZDOGE:", "zdoge:");
        assert_eq!(decode(&encoded).unwrap(), address);
    }

    #[test]
    fn legacy_prefix_accepted_for_version_one() {
        let address = Fr::from(99u64);
        let legacy = format!("dogenado:z1{}", fr_to_hex(&address));
        assert_eq!(decode(&legacy).unwrap(), address);
    }

    #[test]
    fn legacy_other_versions_rejected() {
        let address = Fr::from(99u64);
        let legacy = format!("dogenado:z2{}", fr_to_hex(&address));
        assert!(decode(&legacy).is_err());
    }

    #[test]
    fn malformed_inputs_rejected() {
        assert!(decode("zdoge:abcd").is_err());
        assert!(decode("doge:0000").is_err());
        assert!(decode("").is_err());
        // Out-of-field scalar.
        assert!(decode(&format!("zdoge:{}", "f".repeat(64))).is_err());
    }
}
