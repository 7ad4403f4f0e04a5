//! The wallet service: owns the identity and the live note set and
//! orchestrates every operation as a prepare → confirm pair.
//!
//! `prepare_X` assembles the witness, runs the prover and returns the
//! tentative notes; the caller submits the transaction (out of scope
//! here) and calls `complete_X` with the leaf indices observed on-chain.
//! Before any spend the service re-derives the nullifier hash and asks
//! the contract `isSpent` — the on-chain answer is definitive, the local
//! set is advisory. After a confirmed spend it verifies the nullifier is
//! actually spent before removing the note; when the check fails the
//! note is retained and the mismatch logged, never guessed away.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use alloy_primitives::{Address, U256};
use dogenado_crypto::{fr_to_hex, Fr};

use crate::error::WalletError;
use crate::keys::Identity;
use crate::memo::{encrypt_note_memo, EncryptedMemo};
use crate::notes::{compute_commitment, Note, TokenInfo};
use crate::prover::{Groth16Proof, ProofBackend};
use crate::rpc::{self, ChainAdapter};
use crate::scanner::{DiscoveredNote, ScannerConfig, TickOutcome, TransferScanner};
use crate::store::WalletStore;
use crate::sync::{prove_membership, PathIndexer};
use crate::tokens::TokenRegistry;
use crate::witness;

/// A prepared operation's proof payload.
#[derive(Clone, Debug)]
pub struct ProofBundle {
    pub proof: Groth16Proof,
    pub public_inputs: Vec<Fr>,
    pub contract_args: [U256; 8],
}

#[derive(Clone, Debug)]
pub struct PreparedShield {
    pub note: Note,
    pub bundle: ProofBundle,
}

#[derive(Clone, Debug)]
pub struct PreparedTransfer {
    pub spent_index: usize,
    pub nullifier_hash: Fr,
    pub send_note: Note,
    pub change_note: Note,
    pub memos: [EncryptedMemo; 2],
    pub bundle: ProofBundle,
}

#[derive(Clone, Debug)]
pub struct PreparedUnshield {
    pub spent_index: usize,
    pub nullifier_hash: Fr,
    pub change_note: Option<Note>,
    pub bundle: ProofBundle,
}

#[derive(Clone, Debug)]
pub struct PreparedSwap {
    pub input_index: usize,
    pub nullifier_hash: Fr,
    pub output_note: Note,
    pub change_note: Option<Note>,
    pub bundle: ProofBundle,
}

/// One step of a greedy multi-note swap plan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwapPlanEntry {
    pub note_index: usize,
    pub swap_amount: u128,
}

/// Result of one `scan_events` pass.
#[derive(Clone, Copy, Debug)]
pub struct ScanSummary {
    pub outcome: TickOutcome,
    pub imported: usize,
}

pub struct WalletService {
    identity: Identity,
    notes: Vec<Note>,
    tokens: TokenRegistry,
    adapter: Arc<dyn ChainAdapter>,
    prover: Option<Arc<dyn ProofBackend>>,
    store: Option<Arc<WalletStore>>,
    indexer: Option<Arc<dyn PathIndexer>>,
    pool: Address,
    scanner: TransferScanner,
    scanner_rx: mpsc::UnboundedReceiver<DiscoveredNote>,
}

impl WalletService {
    pub fn new(identity: Identity, adapter: Arc<dyn ChainAdapter>, pool: Address) -> Self {
        let (scanner, scanner_rx) = TransferScanner::new(
            adapter.clone(),
            pool,
            identity.shielded_address(),
            ScannerConfig::default(),
        );
        Self {
            identity,
            notes: Vec::new(),
            tokens: TokenRegistry::new(),
            adapter,
            prover: None,
            store: None,
            indexer: None,
            pool,
            scanner,
            scanner_rx,
        }
    }

    pub fn with_prover(mut self, prover: Arc<dyn ProofBackend>) -> Self {
        self.prover = Some(prover);
        self
    }

    pub fn with_indexer(mut self, indexer: Arc<dyn PathIndexer>) -> Self {
        self.indexer = Some(indexer);
        self
    }

    pub fn with_scanner_config(mut self, config: ScannerConfig) -> Self {
        let (scanner, scanner_rx) = TransferScanner::new(
            self.adapter.clone(),
            self.pool,
            self.identity.shielded_address(),
            config,
        );
        self.scanner = scanner;
        self.scanner_rx = scanner_rx;
        self
    }

    /// Attach persistent storage, loading notes, the token registry and
    /// the scanner state from it.
    pub fn with_store(mut self, store: Arc<WalletStore>) -> Result<Self, WalletError> {
        let stored_notes = store.notes()?;
        let mut notes = Vec::with_capacity(stored_notes.len());
        for stored in &stored_notes {
            notes.push(Note::from_stored(stored)?);
        }
        self.notes = notes;
        self.tokens = TokenRegistry::from_stored(&store.swap_tokens()?)?;
        let (cursor, processed) = store.transfer_scan_state()?;
        self.scanner.restore_state(cursor, processed);
        self.store = Some(store);
        Ok(self)
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn tokens(&self) -> &TokenRegistry {
        &self.tokens
    }

    pub fn tokens_mut(&mut self) -> &mut TokenRegistry {
        &mut self.tokens
    }

    /// Sum of confirmed notes in one token.
    pub fn shielded_balance(&self, token_symbol: &str) -> u128 {
        self.notes
            .iter()
            .filter(|note| note.is_confirmed() && note.token.symbol == token_symbol)
            .map(|note| note.amount)
            .sum()
    }

    fn prover(&self) -> Result<&Arc<dyn ProofBackend>, WalletError> {
        self.prover
            .as_ref()
            .ok_or_else(|| WalletError::ProverFailure("no proving backend configured".into()))
    }

    fn token(&self, symbol: &str) -> Result<TokenInfo, WalletError> {
        self.tokens
            .get(symbol)
            .ok_or_else(|| WalletError::InvalidInput(format!("unknown token {symbol}")))
    }

    fn persist_notes(&self) -> Result<(), WalletError> {
        if let Some(store) = &self.store {
            store.set_notes(self.notes.iter().map(Note::to_stored).collect())?;
        }
        Ok(())
    }

    fn persist_scan_state(&self) {
        if let Some(store) = &self.store {
            if let Err(err) = store
                .set_transfer_scan_state(self.scanner.cursor(), self.scanner.processed_entries())
            {
                // Dedup state degrades to memory-only; discovery stays
                // correct within this process.
                warn!(error = %err, "failed to persist scan state");
            }
        }
    }

    /// Pick the note to spend: the caller's pinned index, or the
    /// smallest confirmed note of the token covering `needed`.
    fn select_note(
        &self,
        token: &TokenInfo,
        needed: u128,
        pinned: Option<usize>,
    ) -> Result<usize, WalletError> {
        if let Some(index) = pinned {
            let note = self
                .notes
                .get(index)
                .ok_or_else(|| WalletError::InvalidInput(format!("no note at index {index}")))?;
            if !note.is_confirmed() {
                return Err(WalletError::NoLeafIndex);
            }
            if note.amount < needed {
                return Err(WalletError::InsufficientNote {
                    needed,
                    available: note.amount,
                });
            }
            return Ok(index);
        }

        let mut best: Option<(usize, u128)> = None;
        let mut largest = 0u128;
        for (index, note) in self.notes.iter().enumerate() {
            if !note.is_confirmed() || note.token.address != token.address {
                continue;
            }
            largest = largest.max(note.amount);
            if note.amount >= needed {
                match best {
                    Some((_, amount)) if amount <= note.amount => {}
                    _ => best = Some((index, note.amount)),
                }
            }
        }
        best.map(|(index, _)| index)
            .ok_or(WalletError::InsufficientNote {
                needed,
                available: largest,
            })
    }

    /// Just-in-time spend check. If the contract says the nullifier is
    /// spent, the stale note is dropped immediately.
    async fn ensure_unspent(&mut self, index: usize) -> Result<Fr, WalletError> {
        let nullifier_hash = self.notes[index].nullifier_hash(self.identity.spending_key())?;
        if rpc::is_spent(self.adapter.as_ref(), self.pool, nullifier_hash).await? {
            let stale = self.notes.remove(index);
            self.persist_notes()?;
            info!(
                commitment = %fr_to_hex(&stale.commitment),
                "dropping note already spent on-chain"
            );
            return Err(WalletError::NoteSpent);
        }
        Ok(nullifier_hash)
    }

    /// Post-confirmation check: only remove the note once the contract
    /// confirms its nullifier is spent. Returns false (note retained)
    /// otherwise.
    async fn verify_spent_and_remove(&mut self, index: usize) -> Result<bool, WalletError> {
        let nullifier_hash = self.notes[index].nullifier_hash(self.identity.spending_key())?;
        if !rpc::is_spent(self.adapter.as_ref(), self.pool, nullifier_hash).await? {
            warn!(
                nullifier = %fr_to_hex(&nullifier_hash),
                "confirmation claimed but nullifier is not spent on-chain; retaining note"
            );
            return Ok(false);
        }
        self.notes.remove(index);
        Ok(true)
    }

    // ---- shield ---------------------------------------------------------

    pub fn prepare_shield(
        &mut self,
        amount: u128,
        token_symbol: &str,
    ) -> Result<PreparedShield, WalletError> {
        if amount == 0 {
            return Err(WalletError::InvalidInput("shield amount must be positive".into()));
        }
        let token = self.token(token_symbol)?;
        let note = Note::create(amount, self.identity.shielded_address(), token)?;
        let request = witness::shield_witness(&note)?;
        let proof = self.prover()?.prove(&request)?;
        Ok(PreparedShield {
            note,
            bundle: ProofBundle {
                contract_args: proof.to_contract_args(),
                public_inputs: request.public_inputs,
                proof,
            },
        })
    }

    /// Record a shielded note once its insertion event was observed.
    pub fn complete_shield(&mut self, note: Note, leaf_index: u64) -> Result<(), WalletError> {
        if note.owner != self.identity.shielded_address() {
            return Err(WalletError::OwnershipMismatch);
        }
        if compute_commitment(note.amount, note.owner, note.secret, note.blinding)
            != note.commitment
        {
            return Err(WalletError::CommitmentMismatch);
        }
        let mut confirmed = note;
        confirmed.leaf_index = Some(leaf_index);
        self.notes.push(confirmed);
        self.persist_notes()
    }

    // ---- transfer -------------------------------------------------------

    pub async fn prepare_transfer(
        &mut self,
        token_symbol: &str,
        recipient: Fr,
        amount: u128,
        fee: u128,
        relayer: Address,
        note_index: Option<usize>,
    ) -> Result<PreparedTransfer, WalletError> {
        if amount == 0 {
            return Err(WalletError::InvalidInput("transfer amount must be positive".into()));
        }
        let token = self.token(token_symbol)?;
        let needed = amount
            .checked_add(fee)
            .ok_or(WalletError::ValueConservationViolation)?;
        let spent_index = self.select_note(&token, needed, note_index)?;
        let nullifier_hash = self.ensure_unspent(spent_index).await?;

        let input = self.notes[spent_index].clone();
        let leaf_index = input.leaf_index.ok_or(WalletError::NoLeafIndex)?;
        let (root, path) = prove_membership(
            self.adapter.as_ref(),
            self.pool,
            self.indexer.as_deref(),
            leaf_index,
        )
        .await?;

        let send_note = Note::create(amount, recipient, token.clone())?;
        let change_note = Note::create(
            input.amount - needed,
            self.identity.shielded_address(),
            token,
        )?;

        let request = witness::transfer_witness(
            &self.identity,
            &input,
            &path,
            root,
            &send_note,
            &change_note,
            relayer,
            fee,
        )?;
        let proof = self.prover()?.prove(&request)?;
        let memos = [
            encrypt_note_memo(&send_note)?,
            encrypt_note_memo(&change_note)?,
        ];

        Ok(PreparedTransfer {
            spent_index,
            nullifier_hash,
            send_note,
            change_note,
            memos,
            bundle: ProofBundle {
                contract_args: proof.to_contract_args(),
                public_inputs: request.public_inputs,
                proof,
            },
        })
    }

    /// Finalize a confirmed transfer: drop the spent note, adopt the
    /// change note at its observed leaf index. Returns false and keeps
    /// everything when the nullifier is not actually spent yet.
    pub async fn complete_transfer(
        &mut self,
        spent_index: usize,
        change_note: Note,
        change_leaf_index: u64,
    ) -> Result<bool, WalletError> {
        if spent_index >= self.notes.len() {
            return Err(WalletError::InvalidInput(format!(
                "no note at index {spent_index}"
            )));
        }
        if !self.verify_spent_and_remove(spent_index).await? {
            return Ok(false);
        }
        if change_note.amount > 0 {
            let mut confirmed = change_note;
            confirmed.leaf_index = Some(change_leaf_index);
            self.notes.push(confirmed);
        }
        self.persist_notes()?;
        Ok(true)
    }

    // ---- unshield -------------------------------------------------------

    pub async fn prepare_unshield(
        &mut self,
        token_symbol: &str,
        recipient: Address,
        amount: u128,
        fee: u128,
        relayer: Address,
        note_index: Option<usize>,
    ) -> Result<PreparedUnshield, WalletError> {
        if amount == 0 {
            return Err(WalletError::InvalidInput("unshield amount must be positive".into()));
        }
        if fee > amount {
            return Err(WalletError::InvalidInput(
                "unshield fee exceeds the withdrawn amount".into(),
            ));
        }
        let token = self.token(token_symbol)?;
        let needed = amount
            .checked_add(fee)
            .ok_or(WalletError::ValueConservationViolation)?;
        let spent_index = self.select_note(&token, needed, note_index)?;
        let nullifier_hash = self.ensure_unspent(spent_index).await?;

        let input = self.notes[spent_index].clone();
        let leaf_index = input.leaf_index.ok_or(WalletError::NoLeafIndex)?;
        let (root, path) = prove_membership(
            self.adapter.as_ref(),
            self.pool,
            self.indexer.as_deref(),
            leaf_index,
        )
        .await?;

        let change_amount = input.amount - needed;
        let change_note = if change_amount > 0 {
            Some(Note::create(
                change_amount,
                self.identity.shielded_address(),
                token,
            )?)
        } else {
            None
        };

        let request = witness::unshield_witness(
            &self.identity,
            &input,
            &path,
            root,
            recipient,
            amount,
            change_note.as_ref(),
            relayer,
            fee,
        )?;
        let proof = self.prover()?.prove(&request)?;

        Ok(PreparedUnshield {
            spent_index,
            nullifier_hash,
            change_note,
            bundle: ProofBundle {
                contract_args: proof.to_contract_args(),
                public_inputs: request.public_inputs,
                proof,
            },
        })
    }

    /// Finalize a confirmed unshield. The change note (if any) re-enters
    /// via `import_received_note` once its insertion event is observed.
    pub async fn complete_unshield(&mut self, index: usize) -> Result<bool, WalletError> {
        if index >= self.notes.len() {
            return Err(WalletError::InvalidInput(format!("no note at index {index}")));
        }
        if !self.verify_spent_and_remove(index).await? {
            return Ok(false);
        }
        self.persist_notes()?;
        Ok(true)
    }

    // ---- swap -----------------------------------------------------------

    pub async fn prepare_swap(
        &mut self,
        token_in: &str,
        token_out: &str,
        swap_amount: u128,
        output_amount: u128,
        note_index: Option<usize>,
    ) -> Result<PreparedSwap, WalletError> {
        if swap_amount == 0 {
            return Err(WalletError::InvalidInput("swap amount must be positive".into()));
        }
        let token_in = self.token(token_in)?;
        let token_out = self.token(token_out)?;
        if token_in.address == token_out.address {
            return Err(WalletError::InvalidInput("cannot swap a token for itself".into()));
        }
        let input_index = self.select_note(&token_in, swap_amount, note_index)?;
        let nullifier_hash = self.ensure_unspent(input_index).await?;

        let input = self.notes[input_index].clone();
        let leaf_index = input.leaf_index.ok_or(WalletError::NoLeafIndex)?;
        let (root, path) = prove_membership(
            self.adapter.as_ref(),
            self.pool,
            self.indexer.as_deref(),
            leaf_index,
        )
        .await?;

        let output_note = Note::create(
            output_amount,
            self.identity.shielded_address(),
            token_out,
        )?;
        let change_amount = input.amount - swap_amount;
        let change_note = if change_amount > 0 {
            Some(Note::create(
                change_amount,
                self.identity.shielded_address(),
                token_in,
            )?)
        } else {
            None
        };

        let request = witness::swap_witness(
            &self.identity,
            &input,
            &path,
            root,
            &output_note,
            change_note.as_ref(),
            swap_amount,
            output_amount,
        )?;
        let proof = self.prover()?.prove(&request)?;

        Ok(PreparedSwap {
            input_index,
            nullifier_hash,
            output_note,
            change_note,
            bundle: ProofBundle {
                contract_args: proof.to_contract_args(),
                public_inputs: request.public_inputs,
                proof,
            },
        })
    }

    /// Finalize a confirmed swap: drop the spent input note, adopt the
    /// output note and the change note at their observed leaf indices.
    pub async fn complete_swap(
        &mut self,
        input_index: usize,
        output_note: Note,
        change_note: Option<Note>,
        output_leaf_index: u64,
        change_leaf_index: Option<u64>,
    ) -> Result<bool, WalletError> {
        if input_index >= self.notes.len() {
            return Err(WalletError::InvalidInput(format!(
                "no note at index {input_index}"
            )));
        }
        if !self.verify_spent_and_remove(input_index).await? {
            return Ok(false);
        }
        let mut output = output_note;
        output.leaf_index = Some(output_leaf_index);
        self.notes.push(output);
        if let Some(change) = change_note {
            let leaf = change_leaf_index.ok_or_else(|| {
                WalletError::InvalidInput("change note requires its leaf index".into())
            })?;
            let mut change = change;
            change.leaf_index = Some(leaf);
            self.notes.push(change);
        }
        self.persist_notes()?;
        Ok(true)
    }

    /// Greedy plan for a swap target that exceeds any single note:
    /// largest notes first, skipping notes whose post-fee output would
    /// not be positive. Fails when the uncovered remainder exceeds
    /// `max(0.01 token, 1% of target)`.
    pub fn plan_swap_split(
        &self,
        token_in: &str,
        target: u128,
        fee_per_swap: u128,
    ) -> Result<Vec<SwapPlanEntry>, WalletError> {
        if target == 0 {
            return Err(WalletError::InvalidInput("swap target must be positive".into()));
        }
        let token = self.token(token_in)?;
        let mut candidates: Vec<(usize, u128)> = self
            .notes
            .iter()
            .enumerate()
            .filter(|(_, note)| note.is_confirmed() && note.token.address == token.address)
            .map(|(index, note)| (index, note.amount))
            .collect();
        candidates.sort_by_key(|(_, amount)| std::cmp::Reverse(*amount));

        let mut plan = Vec::new();
        let mut remaining = target;
        let mut covered = 0u128;
        for (index, amount) in candidates {
            if remaining == 0 {
                break;
            }
            let take = amount.min(remaining);
            if take <= fee_per_swap {
                // Post-fee output would be non-positive.
                continue;
            }
            plan.push(SwapPlanEntry {
                note_index: index,
                swap_amount: take,
            });
            covered += take;
            remaining -= take;
        }

        let hundredth_token = 10u128
            .checked_pow(token.decimals.saturating_sub(2) as u32)
            .unwrap_or(u128::MAX);
        let tolerance = hundredth_token.max(target / 100);
        if remaining > tolerance {
            return Err(WalletError::InsufficientNote {
                needed: target,
                available: covered,
            });
        }
        Ok(plan)
    }

    // ---- discovery ------------------------------------------------------

    /// One scan pass: tick the transfer poller, fold discovered notes
    /// into the live set, persist notes and scanner state.
    pub async fn scan_events(&mut self) -> Result<ScanSummary, WalletError> {
        let outcome = self.scanner.tick().await;
        let mut imported = 0usize;
        while let Ok(discovered) = self.scanner_rx.try_recv() {
            if self.adopt_note(discovered.note)? {
                imported += 1;
            }
        }
        if imported > 0 {
            self.persist_notes()?;
        }
        self.persist_scan_state();
        Ok(ScanSummary { outcome, imported })
    }

    /// Import a note shared out of band (e.g. a `dogenado-note-v1-`
    /// string). The note must be ours and carry a valid commitment.
    pub fn import_received_note(&mut self, note: Note) -> Result<bool, WalletError> {
        if note.owner != self.identity.shielded_address() {
            return Err(WalletError::OwnershipMismatch);
        }
        if compute_commitment(note.amount, note.owner, note.secret, note.blinding)
            != note.commitment
        {
            return Err(WalletError::CommitmentMismatch);
        }
        let adopted = self.adopt_note(note)?;
        if adopted {
            self.persist_notes()?;
        }
        Ok(adopted)
    }

    fn adopt_note(&mut self, note: Note) -> Result<bool, WalletError> {
        if self
            .notes
            .iter()
            .any(|existing| existing.commitment == note.commitment)
        {
            return Ok(false);
        }
        info!(
            commitment = %fr_to_hex(&note.commitment),
            token = %note.token.symbol,
            "adopting shielded note"
        );
        self.notes.push(note);
        Ok(true)
    }

    /// Stop the embedded scan poller. Idempotent.
    pub fn stop_scanning(&mut self) {
        self.scanner.stop();
    }

    // ---- persistence ----------------------------------------------------

    /// Export the encrypted wallet blob.
    pub fn backup(&self) -> Result<Vec<u8>, WalletError> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| WalletError::StorageUnavailable("no store attached".into()))?;
        store.backup()
    }

    /// Replace local state from an encrypted backup blob. The backup
    /// must belong to this wallet's identity.
    pub fn restore(&mut self, passphrase: &str, blob: &[u8]) -> Result<(), WalletError> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| WalletError::StorageUnavailable("no store attached".into()))?
            .clone();
        // Validate the blob belongs to this identity before committing.
        let decoded = WalletStore::decode_backup(passphrase, blob)?;
        if let Some(stored_identity) = &decoded.identity {
            let restored = Identity::from_stored(stored_identity)?;
            if restored != self.identity {
                return Err(WalletError::InvalidInput(
                    "backup belongs to a different identity".into(),
                ));
            }
        }
        store.restore(passphrase, blob)?;
        let stored_notes = store.notes()?;
        let mut notes = Vec::with_capacity(stored_notes.len());
        for stored in &stored_notes {
            notes.push(Note::from_stored(stored)?);
        }
        self.notes = notes;
        self.tokens = TokenRegistry::from_stored(&store.swap_tokens()?)?;
        let (cursor, processed) = store.transfer_scan_state()?;
        self.scanner.restore_state(cursor, processed);
        Ok(())
    }
}
