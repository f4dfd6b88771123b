//! Assembles proof inputs for the external prover.
//!
//! Nothing here computes a proof. A deposit witness is the bare commitment
//! opening, while a spend witness adds the Merkle path and nullifier.
//! Transfer plans compose several spends with recipient and change outputs
//! at the circuit's fixed arity.

use halo2curves_axiom::bn256::Fr;
use rand::RngCore;

use crate::codec::{encrypt_note, NotePlaintext};
use crate::error::{Error, Result};
use crate::hash::fr_to_hex;
use crate::note::{note_commitment, note_nullifier, Note, OwnerKey};
use crate::store::NoteStore;
use crate::tree::CommitmentTree;

/// Fixed input arity of the transfer circuit.
pub const MAX_TRANSFER_INPUTS: usize = 3;

/// Fixed output arity of the transfer circuit: recipient plus change.
pub const TRANSFER_OUTPUTS: usize = 2;

/// Proof inputs for inserting a fresh commitment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositWitness {
    pub commitment: Fr,
    pub asset_id: Fr,
    pub amount: u64,
    pub owner: Fr,
    pub secret: Fr,
}

/// Proof inputs for spending one confirmed note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendWitness {
    pub asset_id: Fr,
    pub amount: u64,
    pub owner: Fr,
    pub owner_secret: Fr,
    pub secret: Fr,
    pub leaf_index: u64,
    /// Sibling hashes, leaf level first.
    pub path: Vec<Fr>,
    /// 1 where the note's node is the left operand.
    pub path_indices: Vec<u8>,
    pub nullifier: Fr,
    pub root: Fr,
}

/// Inputs and outputs of one private transfer, padded to circuit arity.
#[derive(Debug, Clone)]
pub struct TransferPlan {
    pub asset_id: Fr,
    /// Amount bound for the recipient.
    pub amount: u64,
    pub root: Fr,
    /// Exactly `MAX_TRANSFER_INPUTS` entries; unused slots are zero-owner
    /// placeholders with zero nullifiers.
    pub inputs: Vec<SpendWitness>,
    pub nullifiers: Vec<Fr>,
    /// Exactly `TRANSFER_OUTPUTS` entries: recipient first, then change or
    /// a zero placeholder.
    pub outputs: Vec<NotePlaintext>,
    pub output_commitments: Vec<Fr>,
    /// Pending note the recipient will discover via its payload.
    pub recipient_note: Note,
    /// Pending change note to persist once the transfer confirms.
    pub change_note: Option<Note>,
}

impl TransferPlan {
    /// ECIES-seals the real outputs: the recipient's note to their key and
    /// the change note, when present, back to the sender. Padding outputs
    /// carry no value and are never published.
    pub fn seal_outputs(
        &self,
        recipient_public_key: &[u8],
        sender_public_key: &[u8],
    ) -> Result<Vec<Vec<u8>>> {
        let mut sealed = vec![encrypt_note(&self.outputs[0], recipient_public_key)?];
        if self.change_note.is_some() {
            sealed.push(encrypt_note(&self.outputs[1], sender_public_key)?);
        }
        Ok(sealed)
    }
}

/// Deposit witnesses need no tree state: the commitment opening is the
/// whole story.
pub fn build_deposit_witness(note: &Note) -> DepositWitness {
    DepositWitness {
        commitment: note.commitment(),
        asset_id: note.asset_id(),
        amount: note.amount(),
        owner: note.owner(),
        secret: note.secret(),
    }
}

/// Builds the spend witness for one confirmed, unspent note.
pub fn build_spend_witness(
    tree: &CommitmentTree,
    note: &Note,
    owner_key: &OwnerKey,
) -> Result<SpendWitness> {
    let id = fr_to_hex(&note.commitment());
    if note.is_used() {
        return Err(Error::NoteAlreadySpent(id));
    }
    let leaf_index = note.leaf_index().ok_or(Error::NoteNotReady(id))?;
    if owner_key.address() != note.owner() {
        return Err(Error::InvalidConfig(format!(
            "owner key does not control note {}",
            fr_to_hex(&note.commitment())
        )));
    }
    // The tree must hold this exact commitment where the note claims to be.
    if tree.leaf(leaf_index) != Some(note.commitment()) {
        return Err(Error::ConflictingLeaf { index: leaf_index });
    }

    let proof = tree.proof(leaf_index)?;
    let nullifier = note_nullifier(
        leaf_index,
        note.owner(),
        note.secret(),
        note.asset_id(),
        note.amount(),
    );
    Ok(SpendWitness {
        asset_id: note.asset_id(),
        amount: note.amount(),
        owner: note.owner(),
        owner_secret: owner_key.secret(),
        secret: note.secret(),
        leaf_index,
        path: proof.siblings,
        path_indices: proof.indices,
        nullifier,
        root: tree.root(),
    })
}

/// Plans a private transfer: selects unused confirmed notes greedily in
/// insertion order (at most `MAX_TRANSFER_INPUTS`) until the amount is
/// covered, then derives recipient and change outputs.
#[allow(clippy::too_many_arguments)]
pub fn plan_transfer<R: RngCore>(
    tree: &CommitmentTree,
    store: &NoteStore,
    owner_key: &OwnerKey,
    asset_id: Fr,
    amount: u64,
    recipient_owner: Fr,
    rng: &mut R,
) -> Result<TransferPlan> {
    if amount == 0 {
        return Err(Error::InvalidConfig(
            "transfer amount must be positive".into(),
        ));
    }

    let owner = owner_key.address();
    let mut selected: Vec<Note> = Vec::new();
    let mut gathered: u128 = 0;
    for note in store.list_by_asset(asset_id)? {
        if selected.len() >= MAX_TRANSFER_INPUTS || gathered >= amount as u128 {
            break;
        }
        if note.is_used() || note.leaf_index().is_none() || note.owner() != owner {
            continue;
        }
        gathered += note.amount() as u128;
        selected.push(note);
    }
    if gathered < amount as u128 {
        return Err(Error::InsufficientNotes {
            requested: amount,
            available: gathered as u64,
        });
    }
    let change = (gathered - amount as u128) as u64;

    let root = tree.root();
    let mut inputs = selected
        .iter()
        .map(|note| build_spend_witness(tree, note, owner_key))
        .collect::<Result<Vec<_>>>()?;
    while inputs.len() < MAX_TRANSFER_INPUTS {
        inputs.push(empty_spend_witness(tree.depth(), root));
    }
    let nullifiers = inputs.iter().map(|input| input.nullifier).collect();

    let recipient_note = Note::random(asset_id, amount, recipient_owner, rng);
    let change_note = if change > 0 {
        Some(Note::random(asset_id, change, owner, rng))
    } else {
        None
    };

    let mut outputs = vec![NotePlaintext::from(&recipient_note)];
    match &change_note {
        Some(note) => outputs.push(NotePlaintext::from(note)),
        None => outputs.push(zero_output()),
    }
    let output_commitments = outputs
        .iter()
        .map(|out| note_commitment(out.asset_id, out.amount, out.owner, out.secret))
        .collect();

    Ok(TransferPlan {
        asset_id,
        amount,
        root,
        inputs,
        nullifiers,
        outputs,
        output_commitments,
        recipient_note,
        change_note,
    })
}

// Zero-owner placeholder filling unused input slots; its nullifier is the
// pinned zero of the zero-owner rule.
fn empty_spend_witness(depth: usize, root: Fr) -> SpendWitness {
    SpendWitness {
        asset_id: Fr::zero(),
        amount: 0,
        owner: Fr::zero(),
        owner_secret: Fr::zero(),
        secret: Fr::zero(),
        leaf_index: 0,
        path: vec![Fr::zero(); depth],
        path_indices: vec![0; depth],
        nullifier: Fr::zero(),
        root,
    }
}

fn zero_output() -> NotePlaintext {
    NotePlaintext {
        secret: Fr::zero(),
        owner: Fr::zero(),
        asset_id: Fr::zero(),
        amount: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decrypt_note, generate_encryption_keypair};
    use rand::rngs::OsRng;

    struct Vault {
        tree: CommitmentTree,
        store: NoteStore,
        key: OwnerKey,
    }

    fn vault() -> Vault {
        Vault {
            tree: CommitmentTree::new(4).unwrap(),
            store: NoteStore::in_memory().unwrap(),
            key: OwnerKey::new(Fr::from(5150)),
        }
    }

    fn confirmed_note(vault: &mut Vault, asset: u64, amount: u64, secret: u64) -> Note {
        let mut note = Note::new(Fr::from(asset), amount, vault.key.address(), Fr::from(secret));
        let index = vault.tree.next_index();
        vault.tree.insert(note.commitment(), index).unwrap();
        note.confirm(index);
        vault.store.add(&note).unwrap();
        note
    }

    #[test]
    fn deposit_witness_carries_the_opening() {
        let note = Note::new(Fr::from(1), 75, Fr::from(2), Fr::from(3));
        let witness = build_deposit_witness(&note);
        assert_eq!(witness.commitment, note.commitment());
        assert_eq!(witness.amount, 75);
        assert_eq!(
            note_commitment(witness.asset_id, witness.amount, witness.owner, witness.secret),
            witness.commitment
        );
    }

    #[test]
    fn spend_witness_requires_confirmed_unspent_note() {
        let mut v = vault();
        let pending = Note::new(Fr::from(1), 10, v.key.address(), Fr::from(1));
        assert!(matches!(
            build_spend_witness(&v.tree, &pending, &v.key),
            Err(Error::NoteNotReady(_))
        ));

        let mut spent = confirmed_note(&mut v, 1, 20, 2);
        spent.mark_used();
        assert!(matches!(
            build_spend_witness(&v.tree, &spent, &v.key),
            Err(Error::NoteAlreadySpent(_))
        ));
    }

    #[test]
    fn spend_witness_rejects_foreign_owner_key() {
        let mut v = vault();
        let note = confirmed_note(&mut v, 1, 20, 2);
        let other = OwnerKey::new(Fr::from(9999));
        assert!(build_spend_witness(&v.tree, &note, &other).is_err());
    }

    #[test]
    fn spend_witness_path_folds_to_the_root() {
        let mut v = vault();
        let note = confirmed_note(&mut v, 1, 20, 2);
        confirmed_note(&mut v, 1, 30, 3);

        let witness = build_spend_witness(&v.tree, &note, &v.key).unwrap();
        assert_eq!(witness.root, v.tree.root());
        assert_eq!(witness.path.len(), v.tree.depth());
        assert_eq!(
            witness.nullifier,
            note_nullifier(
                witness.leaf_index,
                note.owner(),
                note.secret(),
                note.asset_id(),
                note.amount()
            )
        );

        let mut node = note.commitment();
        for (sibling, bit) in witness.path.iter().zip(witness.path_indices.iter()) {
            node = if *bit == 1 {
                crate::hash::merkle_node(node, *sibling)
            } else {
                crate::hash::merkle_node(*sibling, node)
            };
        }
        assert_eq!(node, witness.root);
    }

    #[test]
    fn transfer_selects_until_covered_and_returns_change() {
        let mut v = vault();
        confirmed_note(&mut v, 7, 300, 1);
        confirmed_note(&mut v, 7, 450, 2);
        let recipient = OwnerKey::new(Fr::from(808)).address();

        let plan = plan_transfer(
            &v.tree,
            &v.store,
            &v.key,
            Fr::from(7),
            500,
            recipient,
            &mut OsRng,
        )
        .unwrap();

        assert_eq!(plan.inputs.len(), MAX_TRANSFER_INPUTS);
        assert_eq!(plan.outputs.len(), TRANSFER_OUTPUTS);
        assert_eq!(plan.nullifiers.len(), MAX_TRANSFER_INPUTS);
        // Two real inputs, one placeholder.
        assert_eq!(plan.inputs[0].amount, 300);
        assert_eq!(plan.inputs[1].amount, 450);
        assert_eq!(plan.inputs[2].owner, Fr::zero());
        assert_eq!(plan.nullifiers[2], Fr::zero());

        assert_eq!(plan.recipient_note.amount(), 500);
        assert_eq!(plan.recipient_note.owner(), recipient);
        let change = plan.change_note.as_ref().unwrap();
        assert_eq!(change.amount(), 250);
        assert_eq!(change.owner(), v.key.address());
        assert_eq!(plan.output_commitments[0], plan.recipient_note.commitment());
        assert_eq!(plan.output_commitments[1], change.commitment());
    }

    #[test]
    fn transfer_with_exact_cover_has_no_change() {
        let mut v = vault();
        confirmed_note(&mut v, 7, 500, 1);

        let plan = plan_transfer(
            &v.tree,
            &v.store,
            &v.key,
            Fr::from(7),
            500,
            Fr::from(9),
            &mut OsRng,
        )
        .unwrap();

        assert!(plan.change_note.is_none());
        assert_eq!(plan.outputs[1].amount, 0);
        assert_eq!(plan.outputs[1].owner, Fr::zero());
    }

    #[test]
    fn transfer_fails_when_funds_short_or_capped() {
        let mut v = vault();
        confirmed_note(&mut v, 7, 300, 1);
        confirmed_note(&mut v, 7, 450, 2);

        match plan_transfer(&v.tree, &v.store, &v.key, Fr::from(7), 800, Fr::from(9), &mut OsRng) {
            Err(Error::InsufficientNotes {
                requested: 800,
                available: 750,
            }) => {}
            other => panic!("expected insufficient notes, got {other:?}"),
        }

        // Four notes of 100 cannot cover 400 under the three-input cap.
        let mut capped = vault();
        for secret in 1..=4 {
            confirmed_note(&mut capped, 8, 100, secret);
        }
        assert!(matches!(
            plan_transfer(
                &capped.tree,
                &capped.store,
                &capped.key,
                Fr::from(8),
                400,
                Fr::from(9),
                &mut OsRng
            ),
            Err(Error::InsufficientNotes {
                requested: 400,
                available: 300,
            })
        ));
    }

    #[test]
    fn transfer_skips_spent_pending_and_foreign_notes() {
        let mut v = vault();
        let spendable = confirmed_note(&mut v, 7, 400, 1);

        let mut spent = confirmed_note(&mut v, 7, 900, 2);
        spent.mark_used();
        v.store.mark_used(spent.nullifier().unwrap()).unwrap();

        let pending = Note::new(Fr::from(7), 900, v.key.address(), Fr::from(3));
        v.store.add(&pending).unwrap();

        // Confirmed, but bound to an owner this key does not control.
        let mut foreign = Note::new(
            Fr::from(7),
            900,
            OwnerKey::new(Fr::from(777)).address(),
            Fr::from(4),
        );
        let index = v.tree.next_index();
        v.tree.insert(foreign.commitment(), index).unwrap();
        foreign.confirm(index);
        v.store.add(&foreign).unwrap();

        let plan = plan_transfer(
            &v.tree,
            &v.store,
            &v.key,
            Fr::from(7),
            400,
            Fr::from(9),
            &mut OsRng,
        )
        .unwrap();
        assert_eq!(plan.inputs[0].amount, spendable.amount());
        assert_eq!(plan.inputs[1].owner, Fr::zero());
    }

    #[test]
    fn sealed_outputs_open_for_their_recipients() {
        let mut v = vault();
        confirmed_note(&mut v, 7, 800, 1);
        let (recipient_secret, recipient_public) = generate_encryption_keypair();
        let (sender_secret, sender_public) = generate_encryption_keypair();

        let plan = plan_transfer(
            &v.tree,
            &v.store,
            &v.key,
            Fr::from(7),
            500,
            Fr::from(606),
            &mut OsRng,
        )
        .unwrap();
        let sealed = plan.seal_outputs(&recipient_public, &sender_public).unwrap();
        assert_eq!(sealed.len(), 2);

        let opened = decrypt_note(&sealed[0], &recipient_secret).unwrap();
        assert_eq!(opened, plan.outputs[0]);
        assert_eq!(opened.into_note().commitment(), plan.recipient_note.commitment());

        let change = decrypt_note(&sealed[1], &sender_secret).unwrap();
        assert_eq!(change.amount, 300);
        // The recipient's key cannot open the change payload.
        assert!(decrypt_note(&sealed[1], &recipient_secret).is_err());
    }
}
