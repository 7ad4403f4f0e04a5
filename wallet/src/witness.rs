//! Witness assembly for the four circuits.
//!
//! Every circuit takes a fixed ordered public-input vector plus named
//! private signals. The assembly recomputes each claimed commitment,
//! enforces ownership and value conservation, and verifies the merkle
//! path locally before anything reaches the prover: a bad witness must
//! fail here, not as an opaque proving error or an on-chain revert.

use std::collections::BTreeMap;

use alloy_primitives::Address;
use dogenado_crypto::{address_to_fr, Fr};
use state_merkle::MerklePath;

use crate::error::WalletError;
use crate::keys::Identity;
use crate::notes::{compute_commitment, Note};
use crate::prover::{Circuit, ProofRequest};

pub(crate) fn evm_to_fr(address: Address) -> Fr {
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(address.as_slice());
    address_to_fr(&bytes)
}

fn verify_commitment(note: &Note) -> Result<(), WalletError> {
    let recomputed = compute_commitment(note.amount, note.owner, note.secret, note.blinding);
    if recomputed != note.commitment {
        return Err(WalletError::CommitmentMismatch);
    }
    Ok(())
}

/// Shared spent-note checks: confirmed leaf, ownership, commitment,
/// merkle membership. Returns `(leaf_index, nullifier_hash)`.
fn check_spend_input(
    identity: &Identity,
    input: &Note,
    path: &MerklePath,
    root: Fr,
) -> Result<(u64, Fr), WalletError> {
    let leaf_index = input.leaf_index.ok_or(WalletError::NoLeafIndex)?;
    if input.owner != identity.shielded_address() {
        return Err(WalletError::OwnershipMismatch);
    }
    verify_commitment(input)?;
    if path.compute_root(input.commitment) != root {
        return Err(WalletError::RootMismatch);
    }
    let nullifier_hash = input.nullifier_hash(identity.spending_key())?;
    Ok((leaf_index, nullifier_hash))
}

fn spend_private_signals(
    signals: &mut BTreeMap<&'static str, Vec<Fr>>,
    identity: &Identity,
    input: &Note,
    path: &MerklePath,
    leaf_index: u64,
) {
    signals.insert("inAmount", vec![Fr::from(input.amount)]);
    signals.insert("inOwner", vec![input.owner]);
    signals.insert("inSecret", vec![input.secret]);
    signals.insert("inBlinding", vec![input.blinding]);
    signals.insert("inLeafIndex", vec![Fr::from(leaf_index)]);
    signals.insert("pathElements", path.siblings.to_vec());
    signals.insert(
        "pathIndices",
        path.directions
            .iter()
            .map(|bit| Fr::from(u64::from(*bit)))
            .collect(),
    );
    signals.insert("spendingKey", vec![identity.spending_key().as_fr()]);
}

/// Shield: public `(C, v)`, private `(A, s, b)`.
pub fn shield_witness(note: &Note) -> Result<ProofRequest, WalletError> {
    verify_commitment(note)?;
    let mut private_inputs = BTreeMap::new();
    private_inputs.insert("owner", vec![note.owner]);
    private_inputs.insert("secret", vec![note.secret]);
    private_inputs.insert("blinding", vec![note.blinding]);
    Ok(ProofRequest {
        circuit: Circuit::Shield,
        public_inputs: vec![note.commitment, Fr::from(note.amount)],
        private_inputs,
    })
}

/// Transfer: public `(root, NH, C1, C2, relayer, fee)`.
pub fn transfer_witness(
    identity: &Identity,
    input: &Note,
    path: &MerklePath,
    root: Fr,
    send: &Note,
    change: &Note,
    relayer: Address,
    fee: u128,
) -> Result<ProofRequest, WalletError> {
    let (leaf_index, nullifier_hash) = check_spend_input(identity, input, path, root)?;
    verify_commitment(send)?;
    verify_commitment(change)?;

    let outgoing = send
        .amount
        .checked_add(change.amount)
        .and_then(|sum| sum.checked_add(fee))
        .ok_or(WalletError::ValueConservationViolation)?;
    if input.amount != outgoing {
        return Err(WalletError::ValueConservationViolation);
    }

    let mut private_inputs = BTreeMap::new();
    spend_private_signals(&mut private_inputs, identity, input, path, leaf_index);
    private_inputs.insert("outAmounts", vec![Fr::from(send.amount), Fr::from(change.amount)]);
    private_inputs.insert("outOwners", vec![send.owner, change.owner]);
    private_inputs.insert("outSecrets", vec![send.secret, change.secret]);
    private_inputs.insert("outBlindings", vec![send.blinding, change.blinding]);

    Ok(ProofRequest {
        circuit: Circuit::Transfer,
        public_inputs: vec![
            root,
            nullifier_hash,
            send.commitment,
            change.commitment,
            evm_to_fr(relayer),
            Fr::from(fee),
        ],
        private_inputs,
    })
}

/// Unshield: public `(root, NH, recipient, amount, changeCommitment,
/// relayer, fee)`. `changeCommitment` is the scalar zero iff there is no
/// change.
pub fn unshield_witness(
    identity: &Identity,
    input: &Note,
    path: &MerklePath,
    root: Fr,
    recipient: Address,
    amount: u128,
    change: Option<&Note>,
    relayer: Address,
    fee: u128,
) -> Result<ProofRequest, WalletError> {
    if fee > amount {
        return Err(WalletError::InvalidInput(
            "unshield fee exceeds the withdrawn amount".into(),
        ));
    }
    let (leaf_index, nullifier_hash) = check_spend_input(identity, input, path, root)?;

    let change_amount = change.map(|note| note.amount).unwrap_or(0);
    let outgoing = amount
        .checked_add(change_amount)
        .and_then(|sum| sum.checked_add(fee))
        .ok_or(WalletError::ValueConservationViolation)?;
    if input.amount != outgoing {
        return Err(WalletError::ValueConservationViolation);
    }

    let change_commitment = match change {
        Some(note) => {
            if note.amount == 0 {
                return Err(WalletError::InvalidInput(
                    "zero-value change must be omitted".into(),
                ));
            }
            if note.owner != identity.shielded_address() {
                return Err(WalletError::OwnershipMismatch);
            }
            verify_commitment(note)?;
            note.commitment
        }
        None => Fr::from(0u64),
    };

    let mut private_inputs = BTreeMap::new();
    spend_private_signals(&mut private_inputs, identity, input, path, leaf_index);
    private_inputs.insert("changeAmount", vec![Fr::from(change_amount)]);
    private_inputs.insert(
        "changeSecret",
        vec![change.map(|note| note.secret).unwrap_or(Fr::from(0u64))],
    );
    private_inputs.insert(
        "changeBlinding",
        vec![change.map(|note| note.blinding).unwrap_or(Fr::from(0u64))],
    );

    Ok(ProofRequest {
        circuit: Circuit::Unshield,
        public_inputs: vec![
            root,
            nullifier_hash,
            evm_to_fr(recipient),
            Fr::from(amount),
            change_commitment,
            evm_to_fr(relayer),
            Fr::from(fee),
        ],
        private_inputs,
    })
}

/// Swap: public `(root, NH, C_out, C_change, tokenIn, tokenOut,
/// swapAmount, outputAmount)`. The exchange-rate check lives on-chain;
/// `output_amount` is transported from the quote untouched.
pub fn swap_witness(
    identity: &Identity,
    input: &Note,
    path: &MerklePath,
    root: Fr,
    output: &Note,
    change: Option<&Note>,
    swap_amount: u128,
    output_amount: u128,
) -> Result<ProofRequest, WalletError> {
    if swap_amount == 0 {
        return Err(WalletError::InvalidInput("swap amount must be positive".into()));
    }
    let (leaf_index, nullifier_hash) = check_spend_input(identity, input, path, root)?;

    if output.owner != identity.shielded_address() {
        return Err(WalletError::OwnershipMismatch);
    }
    verify_commitment(output)?;
    if output.amount != output_amount {
        return Err(WalletError::InvalidInput(
            "output note does not match the quoted amount".into(),
        ));
    }

    let change_amount = change.map(|note| note.amount).unwrap_or(0);
    let spent = swap_amount
        .checked_add(change_amount)
        .ok_or(WalletError::ValueConservationViolation)?;
    if input.amount != spent {
        return Err(WalletError::ValueConservationViolation);
    }

    let change_commitment = match change {
        Some(note) => {
            if note.amount == 0 {
                return Err(WalletError::InvalidInput(
                    "zero-value change must be omitted".into(),
                ));
            }
            if note.owner != identity.shielded_address() {
                return Err(WalletError::OwnershipMismatch);
            }
            if note.token.address != input.token.address {
                return Err(WalletError::InvalidInput(
                    "swap change must stay in the input token".into(),
                ));
            }
            verify_commitment(note)?;
            note.commitment
        }
        None => Fr::from(0u64),
    };

    let mut private_inputs = BTreeMap::new();
    spend_private_signals(&mut private_inputs, identity, input, path, leaf_index);
    private_inputs.insert("outAmount", vec![Fr::from(output.amount)]);
    private_inputs.insert("outSecret", vec![output.secret]);
    private_inputs.insert("outBlinding", vec![output.blinding]);
    private_inputs.insert("changeAmount", vec![Fr::from(change_amount)]);
    private_inputs.insert(
        "changeSecret",
        vec![change.map(|note| note.secret).unwrap_or(Fr::from(0u64))],
    );
    private_inputs.insert(
        "changeBlinding",
        vec![change.map(|note| note.blinding).unwrap_or(Fr::from(0u64))],
    );

    Ok(ProofRequest {
        circuit: Circuit::Swap,
        public_inputs: vec![
            root,
            nullifier_hash,
            output.commitment,
            change_commitment,
            evm_to_fr(input.token.address),
            evm_to_fr(output.token.address),
            Fr::from(swap_amount),
            Fr::from(output_amount),
        ],
        private_inputs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notes::TokenInfo;
    use state_merkle::SparseTree;

    fn doge() -> TokenInfo {
        TokenInfo {
            symbol: "DOGE".into(),
            address: Address::ZERO,
            decimals: 18,
            is_native: true,
        }
    }

    fn wdoge() -> TokenInfo {
        TokenInfo {
            symbol: "WDOGE".into(),
            address: Address::repeat_byte(0x11),
            decimals: 18,
            is_native: false,
        }
    }

    struct Fixture {
        identity: Identity,
        input: Note,
        path: MerklePath,
        root: Fr,
    }

    fn fixture(amount: u128) -> Fixture {
        let identity = Identity::recover(Fr::from(1u64)).unwrap();
        let mut input = Note::create(amount, identity.shielded_address(), doge()).unwrap();
        input.leaf_index = Some(0);
        let tree = SparseTree::build(&[(0, input.commitment)]).unwrap();
        let path = tree.path(0).unwrap();
        let root = tree.root();
        Fixture {
            identity,
            input,
            path,
            root,
        }
    }

    #[test]
    fn shield_public_inputs_are_commitment_and_amount() {
        let note = Note::create(100, Fr::from(5u64), doge()).unwrap();
        let request = shield_witness(&note).unwrap();
        assert_eq!(request.circuit, Circuit::Shield);
        assert_eq!(
            request.public_inputs,
            vec![note.commitment, Fr::from(100u64)]
        );
        assert_eq!(request.private_inputs["secret"], vec![note.secret]);
    }

    #[test]
    fn transfer_conserves_value_and_exposes_commitments() {
        let f = fixture(10);
        let recipient = Identity::recover(Fr::from(2u64)).unwrap();
        let send = Note::create(7, recipient.shielded_address(), doge()).unwrap();
        let change = Note::create(2, f.identity.shielded_address(), doge()).unwrap();

        let request = transfer_witness(
            &f.identity,
            &f.input,
            &f.path,
            f.root,
            &send,
            &change,
            Address::repeat_byte(0x22),
            1,
        )
        .unwrap();

        assert_eq!(request.circuit, Circuit::Transfer);
        assert_eq!(request.public_inputs[0], f.root);
        assert_eq!(
            request.public_inputs[1],
            f.input
                .nullifier_hash(f.identity.spending_key())
                .unwrap()
        );
        assert_eq!(request.public_inputs[2], send.commitment);
        assert_eq!(request.public_inputs[3], change.commitment);
        assert_eq!(request.public_inputs[5], Fr::from(1u64));
        assert_eq!(request.private_inputs["pathElements"].len(), 20);
    }

    #[test]
    fn transfer_rejects_unbalanced_values() {
        let f = fixture(10);
        let recipient = Identity::recover(Fr::from(2u64)).unwrap();
        let send = Note::create(7, recipient.shielded_address(), doge()).unwrap();
        let change = Note::create(3, f.identity.shielded_address(), doge()).unwrap();
        // 7 + 3 + 1 != 10
        assert!(matches!(
            transfer_witness(
                &f.identity,
                &f.input,
                &f.path,
                f.root,
                &send,
                &change,
                Address::ZERO,
                1,
            ),
            Err(WalletError::ValueConservationViolation)
        ));
    }

    #[test]
    fn transfer_rejects_foreign_note() {
        let f = fixture(10);
        let outsider = Identity::recover(Fr::from(3u64)).unwrap();
        let mut foreign = Note::create(10, outsider.shielded_address(), doge()).unwrap();
        foreign.leaf_index = Some(0);
        let send = Note::create(9, outsider.shielded_address(), doge()).unwrap();
        let change = Note::create(1, f.identity.shielded_address(), doge()).unwrap();
        assert!(matches!(
            transfer_witness(
                &f.identity,
                &foreign,
                &f.path,
                f.root,
                &send,
                &change,
                Address::ZERO,
                0,
            ),
            Err(WalletError::OwnershipMismatch)
        ));
    }

    #[test]
    fn unconfirmed_note_cannot_be_spent() {
        let f = fixture(10);
        let mut unconfirmed = f.input.clone();
        unconfirmed.leaf_index = None;
        let send = Note::create(10, f.identity.shielded_address(), doge()).unwrap();
        let change = Note::create(0, f.identity.shielded_address(), doge()).unwrap();
        assert!(matches!(
            transfer_witness(
                &f.identity,
                &unconfirmed,
                &f.path,
                f.root,
                &send,
                &change,
                Address::ZERO,
                0,
            ),
            Err(WalletError::NoLeafIndex)
        ));
    }

    #[test]
    fn unshield_change_commitment_is_zero_iff_no_change() {
        let f = fixture(5);
        // Full withdrawal: change commitment must be the scalar zero.
        let request = unshield_witness(
            &f.identity,
            &f.input,
            &f.path,
            f.root,
            Address::repeat_byte(0x33),
            5,
            None,
            Address::ZERO,
            0,
        )
        .unwrap();
        assert_eq!(request.public_inputs[4], Fr::from(0u64));

        // Partial withdrawal carries the change commitment.
        let f = fixture(10);
        let change = Note::create(4, f.identity.shielded_address(), doge()).unwrap();
        let request = unshield_witness(
            &f.identity,
            &f.input,
            &f.path,
            f.root,
            Address::repeat_byte(0x33),
            5,
            Some(&change),
            Address::ZERO,
            1,
        )
        .unwrap();
        assert_eq!(request.public_inputs[4], change.commitment);
    }

    #[test]
    fn unshield_rejects_fee_above_amount() {
        let f = fixture(10);
        assert!(matches!(
            unshield_witness(
                &f.identity,
                &f.input,
                &f.path,
                f.root,
                Address::ZERO,
                4,
                None,
                Address::ZERO,
                6,
            ),
            Err(WalletError::InvalidInput(_))
        ));
    }

    #[test]
    fn swap_public_inputs_carry_both_tokens() {
        let f = fixture(10);
        let output = Note::create(9_700, f.identity.shielded_address(), wdoge()).unwrap();
        let change = Note::create(4, f.identity.shielded_address(), doge()).unwrap();

        let request = swap_witness(
            &f.identity,
            &f.input,
            &f.path,
            f.root,
            &output,
            Some(&change),
            6,
            9_700,
        )
        .unwrap();
        assert_eq!(request.circuit, Circuit::Swap);
        assert_eq!(request.public_inputs[2], output.commitment);
        assert_eq!(request.public_inputs[3], change.commitment);
        assert_eq!(request.public_inputs[4], evm_to_fr(Address::ZERO));
        assert_eq!(request.public_inputs[5], evm_to_fr(wdoge().address));
        assert_eq!(request.public_inputs[6], Fr::from(6u64));
    }

    #[test]
    fn swap_rejects_zero_amount_and_cross_token_change() {
        let f = fixture(10);
        let output = Note::create(1, f.identity.shielded_address(), wdoge()).unwrap();
        assert!(matches!(
            swap_witness(&f.identity, &f.input, &f.path, f.root, &output, None, 0, 1),
            Err(WalletError::InvalidInput(_))
        ));

        let bad_change = Note::create(4, f.identity.shielded_address(), wdoge()).unwrap();
        assert!(matches!(
            swap_witness(
                &f.identity,
                &f.input,
                &f.path,
                f.root,
                &output,
                Some(&bad_change),
                6,
                1,
            ),
            Err(WalletError::InvalidInput(_))
        ));
    }
}
