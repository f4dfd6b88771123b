//! Error types for the note vault.

use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the vault core.
#[derive(Debug, Error)]
pub enum Error {
    /// Leaf index is outside the tree's capacity.
    #[error("leaf index {index} out of bounds for depth-{depth} tree")]
    IndexOutOfBounds { index: u64, depth: usize },

    /// The target leaf position already holds a different value.
    #[error("leaf index {index} already holds a different value")]
    ConflictingLeaf { index: u64 },

    /// No value has been committed at the requested leaf index.
    #[error("no leaf committed at index {0}")]
    LeafNotPresent(u64),

    /// A note with the same commitment but divergent fields is already stored.
    #[error("commitment {0} already stored with different fields")]
    DuplicateCommitment(String),

    /// The note has not been confirmed into the commitment tree yet.
    #[error("note {0} has no confirmed leaf index yet")]
    NoteNotReady(String),

    /// The note's nullifier was already published.
    #[error("note {0} is already spent")]
    NoteAlreadySpent(String),

    /// Unused notes of the asset do not cover the requested amount.
    #[error("insufficient unspent notes: requested {requested}, available {available}")]
    InsufficientNotes { requested: u64, available: u64 },

    /// The recipient key failed secp256k1 validation.
    #[error("invalid recipient public key: {0}")]
    InvalidRecipientKey(String),

    /// The ciphertext did not authenticate or decode under the given key.
    #[error("note decryption failed")]
    DecryptionFailure,

    /// Malformed persisted or wire data.
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Missing or inconsistent configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A single indexer request failed; the sync layer retries these.
    #[error("indexer request failed: {0}")]
    Remote(String),

    /// Indexer retries were exhausted without a successful response.
    #[error("indexer unavailable after {attempts} attempts: {reason}")]
    RemoteUnavailable { attempts: u32, reason: String },

    /// Local persistence failure.
    #[error("storage error: {0}")]
    Storage(String),
}

impl Error {
    /// True for failures the sync layer may retry with backoff.
    ///
    /// Conflicts and validation errors indicate bad data, not a flaky
    /// network, and must never be retried automatically.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Remote(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidEncoding(err.to_string())
    }
}
