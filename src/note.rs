//! Notes, owner keys, and the hash derivations binding them together.
//!
//! A note commits to `(asset_id, amount, owner, secret)`; the owner address
//! is the hash image of a spend secret held in an [`OwnerKey`]. Nullifiers
//! bind the confirmed leaf index, so they exist only for confirmed notes.

use std::fmt;

use halo2curves_axiom::bn256::Fr;
use rand::RngCore;

use crate::error::{Error, Result};
use crate::hash::{fr_to_hex, poseidon_hash, random_fr, reduce_be_bytes_to_fr};

/// Commitment binding a note's fields: `Poseidon(asset_id, amount, owner, secret)`.
pub fn note_commitment(asset_id: Fr, amount: u64, owner: Fr, secret: Fr) -> Fr {
    poseidon_hash(&[asset_id, Fr::from(amount), owner, secret])
}

/// Spend tag for a confirmed note:
/// `Poseidon(leaf_index, owner, secret, asset_id, amount)`.
///
/// A zero owner marks a circuit padding slot; its nullifier is pinned to
/// zero so fixed-arity witnesses can carry empty inputs.
pub fn note_nullifier(leaf_index: u64, owner: Fr, secret: Fr, asset_id: Fr, amount: u64) -> Fr {
    if owner == Fr::zero() {
        return Fr::zero();
    }
    poseidon_hash(&[
        Fr::from(leaf_index),
        owner,
        secret,
        asset_id,
        Fr::from(amount),
    ])
}

/// Spend-side secret scalar. Its hash image is the owner address notes are
/// bound to; one key spends any number of notes.
#[derive(Clone, PartialEq, Eq)]
pub struct OwnerKey {
    secret: Fr,
}

impl OwnerKey {
    pub fn new(secret: Fr) -> Self {
        OwnerKey { secret }
    }

    /// Derives the key from arbitrary 32 seed bytes, reduced into the field.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        OwnerKey {
            secret: reduce_be_bytes_to_fr(seed),
        }
    }

    pub fn random<R: RngCore>(rng: &mut R) -> Self {
        OwnerKey {
            secret: random_fr(rng),
        }
    }

    pub fn secret(&self) -> Fr {
        self.secret
    }

    /// Owner address: `Poseidon(secret)`.
    pub fn address(&self) -> Fr {
        poseidon_hash(&[self.secret])
    }
}

impl fmt::Debug for OwnerKey {
    // Prints the public address only; the spend secret stays out of logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnerKey")
            .field("address", &fr_to_hex(&self.address()))
            .finish()
    }
}

/// Lifecycle of a note as sync events arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteStatus {
    /// Created locally; its commitment has not been seen in the tree yet.
    Pending,
    /// Confirmed at a leaf index and spendable.
    Active,
    /// Its nullifier was published on-chain.
    Spent,
}

/// A privately held value record, analogous to a UTXO.
///
/// Fields are private so the commitment can never drift from the data it
/// binds; constructors recompute it and hydration verifies it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    commitment: Fr,
    asset_id: Fr,
    amount: u64,
    owner: Fr,
    secret: Fr,
    leaf_index: Option<u64>,
    nullifier: Option<Fr>,
    is_used: bool,
}

impl Note {
    /// Creates a pending note, deriving its commitment.
    pub fn new(asset_id: Fr, amount: u64, owner: Fr, secret: Fr) -> Self {
        Note {
            commitment: note_commitment(asset_id, amount, owner, secret),
            asset_id,
            amount,
            owner,
            secret,
            leaf_index: None,
            nullifier: None,
            is_used: false,
        }
    }

    /// Creates a pending note with a freshly sampled secret, the deposit
    /// flow where the client invents the opening before submitting.
    pub fn random<R: RngCore>(asset_id: Fr, amount: u64, owner: Fr, rng: &mut R) -> Self {
        Note::new(asset_id, amount, owner, random_fr(rng))
    }

    /// Rebuilds a note from persisted fields, verifying that the stored
    /// commitment still matches what the fields hash to.
    #[allow(clippy::too_many_arguments)]
    pub fn from_stored(
        commitment: Fr,
        asset_id: Fr,
        amount: u64,
        owner: Fr,
        secret: Fr,
        leaf_index: Option<u64>,
        nullifier: Option<Fr>,
        is_used: bool,
    ) -> Result<Self> {
        let expected = note_commitment(asset_id, amount, owner, secret);
        if expected != commitment {
            return Err(Error::Storage(format!(
                "stored commitment {} does not match note fields",
                fr_to_hex(&commitment)
            )));
        }
        Ok(Note {
            commitment,
            asset_id,
            amount,
            owner,
            secret,
            leaf_index,
            nullifier,
            is_used,
        })
    }

    pub fn commitment(&self) -> Fr {
        self.commitment
    }

    pub fn asset_id(&self) -> Fr {
        self.asset_id
    }

    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn owner(&self) -> Fr {
        self.owner
    }

    pub fn secret(&self) -> Fr {
        self.secret
    }

    /// Leaf index in the commitment tree, once confirmed.
    pub fn leaf_index(&self) -> Option<u64> {
        self.leaf_index
    }

    /// Spend tag, assigned at confirmation together with the leaf index.
    pub fn nullifier(&self) -> Option<Fr> {
        self.nullifier
    }

    pub fn is_used(&self) -> bool {
        self.is_used
    }

    pub fn status(&self) -> NoteStatus {
        if self.is_used {
            NoteStatus::Spent
        } else if self.leaf_index.is_some() {
            NoteStatus::Active
        } else {
            NoteStatus::Pending
        }
    }

    /// Records the confirmed tree position and derives the nullifier.
    ///
    /// Returns true when the note was newly confirmed. A repeat call with
    /// any index is a no-op: the first confirmation wins, matching the
    /// append-only tree where a committed leaf never moves.
    pub fn confirm(&mut self, leaf_index: u64) -> bool {
        if self.leaf_index.is_some() {
            return false;
        }
        self.leaf_index = Some(leaf_index);
        self.nullifier = Some(note_nullifier(
            leaf_index,
            self.owner,
            self.secret,
            self.asset_id,
            self.amount,
        ));
        true
    }

    /// Monotone spent flag; never reversed.
    pub fn mark_used(&mut self) {
        self.is_used = true;
    }
}
