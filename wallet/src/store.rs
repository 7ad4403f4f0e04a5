//! Encrypted at-rest storage.
//!
//! One file per wallet, named after the public wallet address. The outer
//! envelope is bincode `{version, salt, nonce, ciphertext}`; the inner
//! plaintext is the JSON state layout (identity, notes, processed-event
//! sets, token registry, scan cursors). The key is derived with
//! PBKDF2-HMAC-SHA256 (100k iterations) and the payload sealed with
//! AES-256-GCM using the salt as AAD. There is no plaintext write path
//! for secrets.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use aes_gcm::{
    aead::{Aead, Payload},
    Aes256Gcm, KeyInit, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use alloy_primitives::Address;

use crate::error::WalletError;
use crate::keys::StoredIdentity;
use crate::notes::StoredNote;
use crate::tokens::StoredToken;

const FILE_VERSION: u32 = 1;
const KEY_LEN: usize = 32;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const PBKDF2_ITERATIONS: u32 = 100_000;
/// Soft cap on each processed-event set.
pub const PROCESSED_EVENT_CAP: usize = 500;

/// Outer file envelope. Everything sensitive lives in `ciphertext`.
#[derive(Serialize, Deserialize)]
struct WalletFile {
    version: u32,
    salt: [u8; SALT_LEN],
    nonce: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
}

/// Inner plaintext layout.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    pub identity: Option<StoredIdentity>,
    #[serde(default)]
    pub notes: Vec<StoredNote>,
    #[serde(default)]
    pub processed_transfers: Vec<String>,
    #[serde(default)]
    pub processed_unshields: Vec<String>,
    #[serde(default)]
    pub swap_tokens: BTreeMap<String, StoredToken>,
    #[serde(default)]
    pub transfer_cursor: Option<u64>,
    #[serde(default)]
    pub unshield_cursor: Option<u64>,
}

#[derive(Debug)]
pub struct WalletStore {
    path: PathBuf,
    key: [u8; KEY_LEN],
    salt: [u8; SALT_LEN],
    state: Mutex<PersistedState>,
}

fn derive_key(passphrase: &str, salt: &[u8; SALT_LEN]) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    key
}

impl WalletStore {
    /// File location for a wallet, keyed by its public address.
    pub fn wallet_path(dir: &Path, wallet_address: Address) -> PathBuf {
        dir.join(format!("{wallet_address:#x}.wallet"))
    }

    /// Create a fresh store. Refuses to clobber an existing wallet file.
    pub fn create(
        dir: &Path,
        wallet_address: Address,
        passphrase: &str,
    ) -> Result<Self, WalletError> {
        let path = Self::wallet_path(dir, wallet_address);
        if path.exists() {
            return Err(WalletError::InvalidInput(format!(
                "wallet file already exists at {}",
                path.display()
            )));
        }
        fs::create_dir_all(dir)?;
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let store = Self {
            path,
            key: derive_key(passphrase, &salt),
            salt,
            state: Mutex::new(PersistedState::default()),
        };
        store.write_locked()?;
        Ok(store)
    }

    /// Open an existing store, decrypting with the passphrase.
    pub fn open(
        dir: &Path,
        wallet_address: Address,
        passphrase: &str,
    ) -> Result<Self, WalletError> {
        let path = Self::wallet_path(dir, wallet_address);
        let bytes = fs::read(&path)?;
        Self::from_envelope(path, passphrase, &bytes)
    }

    pub fn open_or_create(
        dir: &Path,
        wallet_address: Address,
        passphrase: &str,
    ) -> Result<Self, WalletError> {
        if Self::wallet_path(dir, wallet_address).exists() {
            Self::open(dir, wallet_address, passphrase)
        } else {
            Self::create(dir, wallet_address, passphrase)
        }
    }

    fn from_envelope(
        path: PathBuf,
        passphrase: &str,
        bytes: &[u8],
    ) -> Result<Self, WalletError> {
        let file: WalletFile = bincode::deserialize(bytes)?;
        if file.version != FILE_VERSION {
            return Err(WalletError::Serialization(format!(
                "unsupported wallet file version {}",
                file.version
            )));
        }
        let key = derive_key(passphrase, &file.salt);
        let cipher = Aes256Gcm::new(&key.into());
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&file.nonce),
                Payload {
                    msg: &file.ciphertext,
                    aad: &file.salt,
                },
            )
            .map_err(|_| {
                WalletError::StorageUnavailable(
                    "wallet file cannot be decrypted with this passphrase".into(),
                )
            })?;
        let state: PersistedState = serde_json::from_slice(&plaintext)?;
        Ok(Self {
            path,
            key,
            salt: file.salt,
            state: Mutex::new(state),
        })
    }

    fn write_locked(&self) -> Result<(), WalletError> {
        let state = self
            .state
            .lock()
            .map_err(|_| WalletError::StorageUnavailable("store lock poisoned".into()))?;
        self.write_state(&state)
    }

    fn write_state(&self, state: &PersistedState) -> Result<(), WalletError> {
        let plaintext = serde_json::to_vec(state)?;
        let cipher = Aes256Gcm::new(&self.key.into());
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &plaintext,
                    aad: &self.salt,
                },
            )
            .map_err(|_| WalletError::StorageUnavailable("encryption failure".into()))?;
        let file = WalletFile {
            version: FILE_VERSION,
            salt: self.salt,
            nonce,
            ciphertext,
        };
        fs::write(&self.path, bincode::serialize(&file)?)?;
        Ok(())
    }

    fn with_state<T>(
        &self,
        f: impl FnOnce(&PersistedState) -> Result<T, WalletError>,
    ) -> Result<T, WalletError> {
        let state = self
            .state
            .lock()
            .map_err(|_| WalletError::StorageUnavailable("store lock poisoned".into()))?;
        f(&state)
    }

    /// Mutate the state and write it through.
    fn with_mut<T>(
        &self,
        f: impl FnOnce(&mut PersistedState) -> Result<T, WalletError>,
    ) -> Result<T, WalletError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| WalletError::StorageUnavailable("store lock poisoned".into()))?;
        let out = f(&mut state)?;
        self.write_state(&state)?;
        Ok(out)
    }

    pub fn identity(&self) -> Result<Option<StoredIdentity>, WalletError> {
        self.with_state(|state| Ok(state.identity.clone()))
    }

    pub fn set_identity(&self, identity: StoredIdentity) -> Result<(), WalletError> {
        self.with_mut(|state| {
            state.identity = Some(identity);
            Ok(())
        })
    }

    pub fn notes(&self) -> Result<Vec<StoredNote>, WalletError> {
        self.with_state(|state| Ok(state.notes.clone()))
    }

    pub fn set_notes(&self, notes: Vec<StoredNote>) -> Result<(), WalletError> {
        self.with_mut(|state| {
            state.notes = notes;
            Ok(())
        })
    }

    pub fn transfer_scan_state(&self) -> Result<(Option<u64>, Vec<String>), WalletError> {
        self.with_state(|state| Ok((state.transfer_cursor, state.processed_transfers.clone())))
    }

    pub fn set_transfer_scan_state(
        &self,
        cursor: Option<u64>,
        processed: Vec<String>,
    ) -> Result<(), WalletError> {
        self.with_mut(|state| {
            state.transfer_cursor = cursor;
            state.processed_transfers = cap_entries(processed);
            Ok(())
        })
    }

    pub fn unshield_scan_state(&self) -> Result<(Option<u64>, Vec<String>), WalletError> {
        self.with_state(|state| Ok((state.unshield_cursor, state.processed_unshields.clone())))
    }

    pub fn set_unshield_scan_state(
        &self,
        cursor: Option<u64>,
        processed: Vec<String>,
    ) -> Result<(), WalletError> {
        self.with_mut(|state| {
            state.unshield_cursor = cursor;
            state.processed_unshields = cap_entries(processed);
            Ok(())
        })
    }

    pub fn swap_tokens(&self) -> Result<BTreeMap<String, StoredToken>, WalletError> {
        self.with_state(|state| Ok(state.swap_tokens.clone()))
    }

    pub fn set_swap_tokens(
        &self,
        tokens: BTreeMap<String, StoredToken>,
    ) -> Result<(), WalletError> {
        self.with_mut(|state| {
            state.swap_tokens = tokens;
            Ok(())
        })
    }

    /// Decrypt a backup blob without touching any store, for validation
    /// before a restore is committed.
    pub fn decode_backup(
        passphrase: &str,
        blob: &[u8],
    ) -> Result<PersistedState, WalletError> {
        let decoded = Self::from_envelope(PathBuf::new(), passphrase, blob)?;
        decoded
            .state
            .into_inner()
            .map_err(|_| WalletError::StorageUnavailable("store lock poisoned".into()))
    }

    /// Export the encrypted envelope verbatim.
    pub fn backup(&self) -> Result<Vec<u8>, WalletError> {
        // Flush current state first so the backup is never stale.
        self.write_locked()?;
        Ok(fs::read(&self.path)?)
    }

    /// Replace this store's contents from an encrypted backup blob.
    /// The blob must decrypt with the supplied passphrase.
    pub fn restore(&self, passphrase: &str, blob: &[u8]) -> Result<(), WalletError> {
        let restored = Self::from_envelope(self.path.clone(), passphrase, blob)?;
        let new_state = restored
            .state
            .into_inner()
            .map_err(|_| WalletError::StorageUnavailable("store lock poisoned".into()))?;
        let mut state = self
            .state
            .lock()
            .map_err(|_| WalletError::StorageUnavailable("store lock poisoned".into()))?;
        *state = new_state;
        // Re-seal under this store's own envelope so later writes stay
        // consistent with the derived key.
        self.write_state(&state)?;
        Ok(())
    }
}

fn cap_entries(mut entries: Vec<String>) -> Vec<String> {
    if entries.len() > PROCESSED_EVENT_CAP {
        entries.drain(..entries.len() - PROCESSED_EVENT_CAP);
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::Identity;
    use crate::notes::{Note, TokenInfo};
    use dogenado_crypto::Fr;

    const WALLET: Address = Address::repeat_byte(0x42);

    fn doge() -> TokenInfo {
        TokenInfo {
            symbol: "DOGE".into(),
            address: Address::ZERO,
            decimals: 18,
            is_native: true,
        }
    }

    #[test]
    fn round_trips_identity_and_notes() {
        let dir = tempfile::tempdir().unwrap();
        let store = WalletStore::create(dir.path(), WALLET, "hunter2").unwrap();

        let identity = Identity::recover(Fr::from(7u64)).unwrap();
        store.set_identity(identity.to_stored()).unwrap();
        let note = Note::create(100, identity.shielded_address(), doge()).unwrap();
        store.set_notes(vec![note.to_stored()]).unwrap();
        store
            .set_transfer_scan_state(Some(42), vec!["0xdead:cafe".into()])
            .unwrap();
        drop(store);

        let reopened = WalletStore::open(dir.path(), WALLET, "hunter2").unwrap();
        assert_eq!(reopened.identity().unwrap(), Some(identity.to_stored()));
        assert_eq!(reopened.notes().unwrap(), vec![note.to_stored()]);
        assert_eq!(
            reopened.transfer_scan_state().unwrap(),
            (Some(42), vec!["0xdead:cafe".to_string()])
        );
    }

    #[test]
    fn wrong_passphrase_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        WalletStore::create(dir.path(), WALLET, "correct").unwrap();
        assert!(matches!(
            WalletStore::open(dir.path(), WALLET, "incorrect"),
            Err(WalletError::StorageUnavailable(_))
        ));
    }

    #[test]
    fn secrets_never_hit_disk_in_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let store = WalletStore::create(dir.path(), WALLET, "hunter2").unwrap();
        let identity = Identity::recover(Fr::from(7u64)).unwrap();
        store.set_identity(identity.to_stored()).unwrap();

        let raw = std::fs::read(WalletStore::wallet_path(dir.path(), WALLET)).unwrap();
        let spending_key = identity.export_spending_key();
        let needle = spending_key.as_bytes();
        assert!(!raw.windows(needle.len()).any(|window| window == needle));
    }

    #[test]
    fn create_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        WalletStore::create(dir.path(), WALLET, "a").unwrap();
        assert!(WalletStore::create(dir.path(), WALLET, "a").is_err());
    }

    #[test]
    fn processed_entries_are_capped() {
        let dir = tempfile::tempdir().unwrap();
        let store = WalletStore::create(dir.path(), WALLET, "a").unwrap();
        let entries: Vec<String> = (0..600).map(|i| format!("key-{i}")).collect();
        store.set_transfer_scan_state(None, entries).unwrap();
        let (_, stored) = store.transfer_scan_state().unwrap();
        assert_eq!(stored.len(), PROCESSED_EVENT_CAP);
        assert_eq!(stored.first().unwrap(), "key-100");
    }

    #[test]
    fn backup_restore_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = WalletStore::create(dir.path(), WALLET, "pass").unwrap();
        let identity = Identity::recover(Fr::from(9u64)).unwrap();
        store.set_identity(identity.to_stored()).unwrap();
        let blob = store.backup().unwrap();

        store.set_identity(Identity::recover(Fr::from(10u64)).unwrap().to_stored())
            .unwrap();
        store.restore("pass", &blob).unwrap();
        assert_eq!(store.identity().unwrap(), Some(identity.to_stored()));

        assert!(store.restore("wrong", &blob).is_err());
        assert!(store.restore("pass", b"garbage").is_err());
    }
}
