//! SQLite persistence for vault state.
//!
//! This module provides durable storage for:
//! - Notes keyed by their unique commitment
//! - Confirmed tree leaves (replayable into a `CommitmentTree`)
//! - Per-stream indexer cursors
//! - The encrypted-payload scan ledger
//!
//! Every mutation commits before the call returns; a crash never leaves a
//! half-applied note or cursor.

use std::path::Path;

use halo2curves_axiom::bn256::Fr;
use rusqlite::{params, Connection, Result as SqliteResult};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::hash::{fr_from_be_bytes, fr_to_be_bytes, fr_to_hex};
use crate::note::Note;

/// Remote event streams tracked by persisted cursors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Leaves,
    Nullifiers,
    Payloads,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Leaves => "leaves",
            StreamKind::Nullifiers => "nullifiers",
            StreamKind::Payloads => "payloads",
        }
    }
}

/// Persisted `(offset, limit)` position in one remote stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamCursor {
    /// Offset of the first event not yet applied.
    pub offset: u64,
    /// Page size last used against this stream.
    pub limit: u32,
}

/// SQLite-backed store for notes and sync state.
pub struct NoteStore {
    conn: Connection,
}

impl NoteStore {
    /// Opens or creates the vault database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| Error::Storage(format!("database open failed: {e}")))?;

        let store = Self { conn };
        store.init_schema()?;

        info!("opened vault database at {:?}", path.as_ref());
        Ok(store)
    }

    /// Creates an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Storage(format!("in-memory db failed: {e}")))?;

        let store = Self { conn };
        store.init_schema()?;

        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(
                r#"
            -- Notes, one row per commitment
            CREATE TABLE IF NOT EXISTS notes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                commitment BLOB NOT NULL UNIQUE,
                asset_id BLOB NOT NULL,
                amount INTEGER NOT NULL,
                owner BLOB NOT NULL,
                secret BLOB NOT NULL,
                leaf_index INTEGER,
                nullifier BLOB,
                is_used INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            );

            CREATE INDEX IF NOT EXISTS idx_notes_asset ON notes(asset_id);
            CREATE INDEX IF NOT EXISTS idx_notes_nullifier ON notes(nullifier);

            -- Confirmed tree leaves, replayable into a CommitmentTree
            CREATE TABLE IF NOT EXISTS tree_leaves (
                leaf_index INTEGER PRIMARY KEY,
                leaf_value BLOB NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_leaves_value ON tree_leaves(leaf_value);

            -- Per-stream indexer cursors
            CREATE TABLE IF NOT EXISTS sync_cursors (
                stream TEXT PRIMARY KEY,
                next_offset INTEGER NOT NULL DEFAULT 0,
                page_size INTEGER NOT NULL DEFAULT 0
            );

            -- Encrypted payloads already scanned, so each is tried once
            CREATE TABLE IF NOT EXISTS payloads (
                payload_id TEXT PRIMARY KEY,
                ciphertext BLOB NOT NULL,
                decrypted INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            );
        "#,
            )
            .map_err(|e| Error::Storage(format!("schema init failed: {e}")))?;

        Ok(())
    }

    /// Stores a note. Re-adding a note with identical fields is a no-op;
    /// a different note under the same commitment is a `DuplicateCommitment`.
    pub fn add(&self, note: &Note) -> Result<()> {
        let commitment = fr_blob(note.commitment());
        let existing = self.conn.query_row(
            "SELECT asset_id, amount, owner, secret FROM notes WHERE commitment = ?",
            params![commitment],
            |row| {
                Ok((
                    row.get::<_, Vec<u8>>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                    row.get::<_, Vec<u8>>(3)?,
                ))
            },
        );

        match existing {
            Ok((asset_id, amount, owner, secret)) => {
                let identical = asset_id == fr_blob(note.asset_id())
                    && amount as u64 == note.amount()
                    && owner == fr_blob(note.owner())
                    && secret == fr_blob(note.secret());
                if identical {
                    return Ok(());
                }
                Err(Error::DuplicateCommitment(fr_to_hex(&note.commitment())))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                self.conn
                    .execute(
                        r#"
                    INSERT INTO notes
                        (commitment, asset_id, amount, owner, secret, leaf_index, nullifier, is_used)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                        params![
                            commitment,
                            fr_blob(note.asset_id()),
                            note.amount() as i64,
                            fr_blob(note.owner()),
                            fr_blob(note.secret()),
                            note.leaf_index().map(|i| i as i64),
                            note.nullifier().map(fr_blob),
                            note.is_used() as i64,
                        ],
                    )
                    .map_err(|e| Error::Storage(format!("store note failed: {e}")))?;

                debug!(
                    commitment = %fr_to_hex(&note.commitment()),
                    "stored note"
                );
                Ok(())
            }
            Err(e) => Err(Error::Storage(format!("query note failed: {e}"))),
        }
    }

    /// Fetches a note by its commitment.
    pub fn note_by_commitment(&self, commitment: Fr) -> Result<Option<Note>> {
        let result = self.conn.query_row(
            r#"
            SELECT commitment, asset_id, amount, owner, secret, leaf_index, nullifier, is_used
            FROM notes WHERE commitment = ?
            "#,
            params![fr_blob(commitment)],
            row_to_raw_note,
        );

        match result {
            Ok(raw) => Ok(Some(raw.into_note()?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::Storage(format!("query note failed: {e}"))),
        }
    }

    /// Marks the note carrying `nullifier` as used. Returns whether a note
    /// matched; an unknown nullifier is a benign no-op (it may belong to
    /// another vault) and reports `false`.
    pub fn mark_used(&self, nullifier: Fr) -> Result<bool> {
        let updated = self
            .conn
            .execute(
                "UPDATE notes SET is_used = 1 WHERE nullifier = ?",
                params![fr_blob(nullifier)],
            )
            .map_err(|e| Error::Storage(format!("mark used failed: {e}")))?;

        if updated > 0 {
            debug!(nullifier = %fr_to_hex(&nullifier), "note marked used");
        }
        Ok(updated > 0)
    }

    /// All notes of one asset, oldest first.
    pub fn list_by_asset(&self, asset_id: Fr) -> Result<Vec<Note>> {
        let mut stmt = self
            .conn
            .prepare(
                r#"
            SELECT commitment, asset_id, amount, owner, secret, leaf_index, nullifier, is_used
            FROM notes
            WHERE asset_id = ?
            ORDER BY id ASC
            "#,
            )
            .map_err(|e| Error::Storage(format!("prepare query failed: {e}")))?;

        let rows = stmt
            .query_map(params![fr_blob(asset_id)], row_to_raw_note)
            .map_err(|e| Error::Storage(format!("query notes failed: {e}")))?
            .collect::<SqliteResult<Vec<_>>>()
            .map_err(|e| Error::Storage(format!("collect notes failed: {e}")))?;

        rows.into_iter().map(RawNote::into_note).collect()
    }

    /// Spendable balance: sum of `amount` over unused notes of the asset.
    pub fn total(&self, asset_id: Fr) -> Result<u64> {
        let total: i64 = self
            .conn
            .query_row(
                "SELECT COALESCE(SUM(amount), 0) FROM notes WHERE is_used = 0 AND asset_id = ?",
                params![fr_blob(asset_id)],
                |row| row.get(0),
            )
            .map_err(|e| Error::Storage(format!("query total failed: {e}")))?;

        Ok(total as u64)
    }

    /// Records a note's confirmed tree position and nullifier. Only takes
    /// effect while the note is unconfirmed; the first confirmation wins.
    pub fn set_confirmed(&self, commitment: Fr, leaf_index: u64, nullifier: Fr) -> Result<bool> {
        let updated = self
            .conn
            .execute(
                "UPDATE notes SET leaf_index = ?, nullifier = ? WHERE commitment = ? AND leaf_index IS NULL",
                params![leaf_index as i64, fr_blob(nullifier), fr_blob(commitment)],
            )
            .map_err(|e| Error::Storage(format!("confirm note failed: {e}")))?;

        if updated > 0 {
            debug!(
                commitment = %fr_to_hex(&commitment),
                leaf_index,
                "note confirmed"
            );
        }
        Ok(updated > 0)
    }

    /// Persists a confirmed leaf under the same idempotent/conflict contract
    /// as `CommitmentTree::insert`. Returns whether the leaf was new.
    pub fn put_leaf(&self, leaf_index: u64, leaf_value: Fr) -> Result<bool> {
        let existing = self.conn.query_row(
            "SELECT leaf_value FROM tree_leaves WHERE leaf_index = ?",
            params![leaf_index as i64],
            |row| row.get::<_, Vec<u8>>(0),
        );

        match existing {
            Ok(stored) => {
                if stored == fr_blob(leaf_value) {
                    Ok(false)
                } else {
                    Err(Error::ConflictingLeaf { index: leaf_index })
                }
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                self.conn
                    .execute(
                        "INSERT INTO tree_leaves (leaf_index, leaf_value) VALUES (?, ?)",
                        params![leaf_index as i64, fr_blob(leaf_value)],
                    )
                    .map_err(|e| Error::Storage(format!("store leaf failed: {e}")))?;
                Ok(true)
            }
            Err(e) => Err(Error::Storage(format!("query leaf failed: {e}"))),
        }
    }

    /// All persisted leaves in index order, for tree replay at startup.
    pub fn leaves(&self) -> Result<Vec<(u64, Fr)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT leaf_index, leaf_value FROM tree_leaves ORDER BY leaf_index ASC")
            .map_err(|e| Error::Storage(format!("prepare query failed: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
            })
            .map_err(|e| Error::Storage(format!("query leaves failed: {e}")))?
            .collect::<SqliteResult<Vec<_>>>()
            .map_err(|e| Error::Storage(format!("collect leaves failed: {e}")))?;

        rows.into_iter()
            .map(|(index, blob)| Ok((index as u64, fr_from_blob(&blob)?)))
            .collect()
    }

    /// Earliest leaf index holding `value`, if the value was ever committed.
    pub fn leaf_index_for_value(&self, value: Fr) -> Result<Option<u64>> {
        let result = self.conn.query_row(
            "SELECT leaf_index FROM tree_leaves WHERE leaf_value = ? ORDER BY leaf_index ASC LIMIT 1",
            params![fr_blob(value)],
            |row| row.get::<_, i64>(0),
        );

        match result {
            Ok(index) => Ok(Some(index as u64)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::Storage(format!("query leaf index failed: {e}"))),
        }
    }

    /// Cursor for one stream; a stream never synced starts at zero.
    pub fn cursor(&self, stream: StreamKind) -> Result<StreamCursor> {
        let result = self.conn.query_row(
            "SELECT next_offset, page_size FROM sync_cursors WHERE stream = ?",
            params![stream.as_str()],
            |row| {
                Ok(StreamCursor {
                    offset: row.get::<_, i64>(0)? as u64,
                    limit: row.get::<_, i64>(1)? as u32,
                })
            },
        );

        match result {
            Ok(cursor) => Ok(cursor),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(StreamCursor::default()),
            Err(e) => Err(Error::Storage(format!("query cursor failed: {e}"))),
        }
    }

    /// Persists a stream cursor. The sync layer only ever moves cursors
    /// forward; passing a smaller offset deliberately rewinds the stream
    /// for a re-drain.
    pub fn set_cursor(&self, stream: StreamKind, cursor: StreamCursor) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO sync_cursors (stream, next_offset, page_size) VALUES (?, ?, ?)",
                params![stream.as_str(), cursor.offset as i64, cursor.limit as i64],
            )
            .map_err(|e| Error::Storage(format!("store cursor failed: {e}")))?;

        debug!(stream = stream.as_str(), offset = cursor.offset, "cursor advanced");
        Ok(())
    }

    /// Whether an encrypted payload id was already scanned.
    pub fn payload_seen(&self, payload_id: &str) -> Result<bool> {
        let result = self.conn.query_row(
            "SELECT 1 FROM payloads WHERE payload_id = ?",
            params![payload_id],
            |_| Ok(()),
        );

        match result {
            Ok(()) => Ok(true),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(false),
            Err(e) => Err(Error::Storage(format!("query payload failed: {e}"))),
        }
    }

    /// Records a scanned payload and whether it decrypted for this vault.
    pub fn record_payload(&self, payload_id: &str, ciphertext: &[u8], decrypted: bool) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO payloads (payload_id, ciphertext, decrypted) VALUES (?, ?, ?)",
                params![payload_id, ciphertext, decrypted as i64],
            )
            .map_err(|e| Error::Storage(format!("store payload failed: {e}")))?;

        Ok(())
    }
}

fn fr_blob(fr: Fr) -> Vec<u8> {
    fr_to_be_bytes(&fr).to_vec()
}

fn fr_from_blob(blob: &[u8]) -> Result<Fr> {
    let bytes: [u8; 32] = blob
        .try_into()
        .map_err(|_| Error::Storage(format!("scalar blob has {} bytes, want 32", blob.len())))?;
    fr_from_be_bytes(&bytes)
}

// Raw note columns before field-element decoding.
struct RawNote {
    commitment: Vec<u8>,
    asset_id: Vec<u8>,
    amount: i64,
    owner: Vec<u8>,
    secret: Vec<u8>,
    leaf_index: Option<i64>,
    nullifier: Option<Vec<u8>>,
    is_used: i64,
}

fn row_to_raw_note(row: &rusqlite::Row<'_>) -> SqliteResult<RawNote> {
    Ok(RawNote {
        commitment: row.get(0)?,
        asset_id: row.get(1)?,
        amount: row.get(2)?,
        owner: row.get(3)?,
        secret: row.get(4)?,
        leaf_index: row.get(5)?,
        nullifier: row.get(6)?,
        is_used: row.get(7)?,
    })
}

impl RawNote {
    fn into_note(self) -> Result<Note> {
        let nullifier = match &self.nullifier {
            Some(blob) => Some(fr_from_blob(blob)?),
            None => None,
        };
        Note::from_stored(
            fr_from_blob(&self.commitment)?,
            fr_from_blob(&self.asset_id)?,
            self.amount as u64,
            fr_from_blob(&self.owner)?,
            fr_from_blob(&self.secret)?,
            self.leaf_index.map(|i| i as u64),
            nullifier,
            self.is_used != 0,
        )
    }
}
