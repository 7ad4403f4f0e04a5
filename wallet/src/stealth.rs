//! Stealth meta-addresses with a view-tag fast path.
//!
//! Optional variant of note delivery: recipients publish a meta-address
//! `(P_spend, P_view)` and senders derive a fresh one-time address per
//! payment. A 40-bit view tag derived from the shared secret lets a
//! receiver discard foreign payments without running the full
//! derivation. This module is self-contained and not wired into the
//! base transfer flow.

use ark_ff::Zero;
use dogenado_crypto::{fr_from_hex, fr_to_bytes32, fr_to_hex, hash2, keccak256, random_fr, Fr};

use crate::error::WalletError;

pub const STEALTH_PREFIX: &str = "dogenado:stealth:";
/// View-tag width: the first 40 bits of `keccak256(ss)`.
pub const VIEW_TAG_LEN: usize = 5;

/// Public half of a stealth identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StealthMetaAddress {
    pub spend: Fr,
    pub view: Fr,
}

impl StealthMetaAddress {
    /// `dogenado:stealth:<64-hex>:<64-hex>`.
    pub fn encode(&self) -> String {
        format!(
            "{STEALTH_PREFIX}{}:{}",
            fr_to_hex(&self.spend),
            fr_to_hex(&self.view)
        )
    }

    pub fn decode(input: &str) -> Result<Self, WalletError> {
        let tail = input
            .trim()
            .strip_prefix(STEALTH_PREFIX)
            .ok_or_else(|| WalletError::AddressEncoding("not a stealth meta-address".into()))?;
        let (spend_hex, view_hex) = tail
            .split_once(':')
            .ok_or_else(|| WalletError::AddressEncoding("stealth address needs two parts".into()))?;
        let spend = fr_from_hex(spend_hex)
            .map_err(|err| WalletError::AddressEncoding(err.to_string()))?;
        let view = fr_from_hex(view_hex)
            .map_err(|err| WalletError::AddressEncoding(err.to_string()))?;
        Ok(Self { spend, view })
    }
}

/// What a sender publishes alongside a stealth payment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StealthPayment {
    pub ephemeral: Fr,
    pub view_tag: [u8; VIEW_TAG_LEN],
    pub one_time_address: Fr,
}

fn shared_secret(ephemeral: Fr, view: Fr) -> Fr {
    hash2(ephemeral, view)
}

fn view_tag(shared: Fr) -> [u8; VIEW_TAG_LEN] {
    let digest = keccak256(&fr_to_bytes32(&shared));
    let mut tag = [0u8; VIEW_TAG_LEN];
    tag.copy_from_slice(&digest[..VIEW_TAG_LEN]);
    tag
}

/// Sender side: derive a one-time address for `meta`.
pub fn derive_payment(meta: &StealthMetaAddress) -> Result<StealthPayment, WalletError> {
    let ephemeral_secret = random_fr()?;
    let ephemeral = hash2(ephemeral_secret, Fr::zero());
    let shared = shared_secret(ephemeral, meta.view);
    Ok(StealthPayment {
        ephemeral,
        view_tag: view_tag(shared),
        one_time_address: hash2(meta.spend, shared),
    })
}

/// Receiver fast path: does the published tag match this meta-address?
/// A mismatch means the payment is certainly not ours and the full
/// derivation can be skipped.
pub fn tag_matches(meta: &StealthMetaAddress, payment: &StealthPayment) -> bool {
    view_tag(shared_secret(payment.ephemeral, meta.view)) == payment.view_tag
}

/// Receiver slow path: recompute the one-time address.
pub fn recover_one_time_address(meta: &StealthMetaAddress, ephemeral: Fr) -> Fr {
    hash2(meta.spend, shared_secret(ephemeral, meta.view))
}
