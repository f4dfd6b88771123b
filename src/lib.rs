//! # notevault: a private note vault over a sparse commitment tree
//!
//! This crate keeps the client-side state of a shielded note system. A
//! sparse Merkle tree tracks every published note commitment while a
//! SQLite store holds the wallet's own notes; a polling synchronizer
//! replays the indexer's event streams into both.
//!
//! ## Components
//!
//! - **Commitment tree**: fixed-depth sparse Merkle tree over Poseidon,
//!   with membership proofs and JSON snapshots
//! - **Note store**: durable notes keyed by commitment, spent-state
//!   tracking by nullifier, per-asset balances
//! - **Indexer sync**: paginated stream replay with persisted cursors,
//!   bounded retry, and trial decryption of incoming payloads
//! - **Note codec**: ECIES envelopes binding a note's full opening to a
//!   recipient's secp256k1 key
//! - **Witnesses**: deposit and spend witness assembly, plus greedy
//!   transfer planning over owned notes
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use notevault::{CommitmentTree, Note, NoteStore, OwnerKey, DEFAULT_TREE_DEPTH};
//!
//! let owner = OwnerKey::random();
//! let store = NoteStore::open("vault.db")?;
//! let mut tree = CommitmentTree::new(DEFAULT_TREE_DEPTH)?;
//!
//! // Mint a deposit note; it stays pending until the indexer reports
//! // the matching leaf and sync confirms it.
//! let note = Note::random(asset_id, 1_000, owner.address(), &mut rand::thread_rng());
//! store.add(&note)?;
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod hash;
pub mod note;
pub mod store;
pub mod sync;
pub mod tree;
pub mod witness;

pub use codec::{
    decrypt_note, derivation_signature, encrypt_note, generate_encryption_keypair,
    public_key_from_secret, public_key_from_signature, NotePlaintext, NOTE_PAYLOAD_LEN,
    PUBKEY_DERIVATION_MESSAGE,
};
pub use config::{
    network_for_chain, supported_chain_ids, NetworkConfig, SyncOptions, VaultConfig,
};
pub use error::{Error, Result};
pub use hash::{fr_from_hex, fr_to_hex, merkle_node, MAX_TREE_DEPTH};
pub use note::{note_commitment, note_nullifier, Note, NoteStatus, OwnerKey};
pub use store::{NoteStore, StreamCursor, StreamKind};
pub use sync::{
    bootstrap_tree, HttpIndexerClient, IndexerApi, IndexerSync, LeafEvent, NullifierEvent,
    PayloadEvent, PayloadScanner, SyncOutcome,
};
pub use tree::{CommitmentTree, MerkleProof, TreeSnapshot};
pub use witness::{
    build_deposit_witness, build_spend_witness, plan_transfer, DepositWitness, SpendWitness,
    TransferPlan, MAX_TRANSFER_INPUTS, TRANSFER_OUTPUTS,
};

/// Tree depth used when a deployment does not override it. Capacity is
/// `2^depth` leaves.
pub const DEFAULT_TREE_DEPTH: usize = 12;
