//! Encrypted memos for note delivery.
//!
//! Each transfer output carries a memo the intended recipient can open by
//! trial decryption. The key schedule is hash-derived end to end:
//!
//! ```text
//! E  = H(e, 0)            ephemeral public scalar
//! ss = H(E, A_recipient)  shared secret
//! k  = H(ss, n)           symmetric key, n is a fresh nonce scalar
//! ```
//!
//! The cipher itself is a keccak-expanded XOR stream. It is integrity-free
//! on purpose: the on-chain commitment is the authenticator, and a
//! reconstructed note is only accepted when its commitment matches the
//! event. The cipher sits behind [`NoteCipher`] so an AEAD can replace it
//! without touching the memo layout beyond a version byte.

use ark_ff::Zero;
use serde::{Deserialize, Serialize};

use alloy_primitives::Address;
use dogenado_crypto::{
    fr_from_bytes32, fr_from_hex, fr_to_bytes32, fr_to_hex, hash2, keccak256, random_fr, Fr,
};

use crate::error::WalletError;
use crate::notes::{Note, TokenInfo};

/// Soft upper bound on memo ciphertext size.
pub const MEMO_CIPHERTEXT_SOFT_CAP: usize = 128;

/// Symmetric cipher seam for the memo payload.
pub trait NoteCipher {
    fn encrypt(&self, key: &[u8; 32], plaintext: &[u8]) -> Vec<u8>;
    fn decrypt(&self, key: &[u8; 32], ciphertext: &[u8]) -> Result<Vec<u8>, WalletError>;
}

/// XOR stream cipher with a keccak-counter keystream.
///
/// Block `i` of the keystream is `keccak256(key || be32(i))`; encryption
/// and decryption are the same operation.
#[derive(Clone, Copy, Debug, Default)]
pub struct XorKeccakCipher;

impl XorKeccakCipher {
    fn keystream_xor(key: &[u8; 32], data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len());
        for (block_index, chunk) in data.chunks(32).enumerate() {
            let mut material = [0u8; 36];
            material[..32].copy_from_slice(key);
            material[32..].copy_from_slice(&(block_index as u32).to_be_bytes());
            let block = keccak256(&material);
            out.extend(chunk.iter().zip(block.iter()).map(|(d, k)| d ^ k));
        }
        out
    }
}

impl NoteCipher for XorKeccakCipher {
    fn encrypt(&self, key: &[u8; 32], plaintext: &[u8]) -> Vec<u8> {
        Self::keystream_xor(key, plaintext)
    }

    fn decrypt(&self, key: &[u8; 32], ciphertext: &[u8]) -> Result<Vec<u8>, WalletError> {
        Ok(Self::keystream_xor(key, ciphertext))
    }
}

/// One encrypted memo as it travels in event data: `E || n || ciphertext`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedMemo {
    pub ephemeral: Fr,
    pub nonce: Fr,
    pub ciphertext: Vec<u8>,
}

impl EncryptedMemo {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.ciphertext.len());
        out.extend_from_slice(&fr_to_bytes32(&self.ephemeral));
        out.extend_from_slice(&fr_to_bytes32(&self.nonce));
        out.extend_from_slice(&self.ciphertext);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WalletError> {
        if bytes.len() < 64 {
            return Err(WalletError::EventMalformed(format!(
                "memo blob too short ({} bytes)",
                bytes.len()
            )));
        }
        let mut ephemeral = [0u8; 32];
        ephemeral.copy_from_slice(&bytes[..32]);
        let mut nonce = [0u8; 32];
        nonce.copy_from_slice(&bytes[32..64]);
        Ok(Self {
            ephemeral: fr_from_bytes32(&ephemeral)
                .map_err(|_| WalletError::EventMalformed("memo ephemeral out of field".into()))?,
            nonce: fr_from_bytes32(&nonce)
                .map_err(|_| WalletError::EventMalformed("memo nonce out of field".into()))?,
            ciphertext: bytes[64..].to_vec(),
        })
    }

    pub fn ciphertext_hex(&self) -> String {
        hex::encode(&self.ciphertext)
    }
}

/// The plaintext the sender packs for the recipient.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MemoPayload {
    amount: String,
    secret: String,
    blinding: String,
    token_symbol: String,
    token_address: String,
    decimals: u8,
}

fn derive_key(shared_secret: Fr, nonce: Fr) -> [u8; 32] {
    fr_to_bytes32(&hash2(shared_secret, nonce))
}

/// Encrypt a note for the owner recorded on it.
pub fn encrypt_note_memo(note: &Note) -> Result<EncryptedMemo, WalletError> {
    let ephemeral_secret = random_fr()?;
    let ephemeral = hash2(ephemeral_secret, Fr::zero());
    let shared_secret = hash2(ephemeral, note.owner);
    let nonce = random_fr()?;
    let key = derive_key(shared_secret, nonce);

    let payload = MemoPayload {
        amount: note.amount.to_string(),
        secret: fr_to_hex(&note.secret),
        blinding: fr_to_hex(&note.blinding),
        token_symbol: note.token.symbol.clone(),
        token_address: format!("{:#x}", note.token.address),
        decimals: note.token.decimals,
    };
    let plaintext = serde_json::to_vec(&payload)?;
    let ciphertext = XorKeccakCipher.encrypt(&key, &plaintext);
    if ciphertext.len() > MEMO_CIPHERTEXT_SOFT_CAP {
        tracing::debug!(len = ciphertext.len(), "memo ciphertext exceeds soft cap");
    }
    Ok(EncryptedMemo {
        ephemeral,
        nonce,
        ciphertext,
    })
}

/// Trial-decrypt a memo against our own shielded address.
///
/// Returns the reconstructed (unconfirmed) note. The caller must still
/// compare its commitment against the event's commitment slot before
/// accepting it; a junk decryption under the wrong key almost always fails
/// JSON parsing and surfaces here as `DecryptionFailed`.
pub fn decrypt_note_memo(memo: &EncryptedMemo, own_address: Fr) -> Result<Note, WalletError> {
    let shared_secret = hash2(memo.ephemeral, own_address);
    let key = derive_key(shared_secret, memo.nonce);
    let plaintext = XorKeccakCipher.decrypt(&key, &memo.ciphertext)?;
    let payload: MemoPayload =
        serde_json::from_slice(&plaintext).map_err(|_| WalletError::DecryptionFailed)?;

    let amount: u128 = payload
        .amount
        .parse()
        .map_err(|_| WalletError::DecryptionFailed)?;
    let secret = fr_from_hex(&payload.secret).map_err(|_| WalletError::DecryptionFailed)?;
    let blinding = fr_from_hex(&payload.blinding).map_err(|_| WalletError::DecryptionFailed)?;
    let token_address: Address = payload
        .token_address
        .parse()
        .map_err(|_| WalletError::DecryptionFailed)?;

    Ok(Note::reconstruct(
        amount,
        own_address,
        secret,
        blinding,
        TokenInfo {
            symbol: payload.token_symbol,
            address: token_address,
            decimals: payload.decimals,
            is_native: token_address == Address::ZERO,
        },
    ))
}
