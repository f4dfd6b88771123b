//! Reconciles local vault state against the indexer's event streams.
//!
//! Three paginated streams feed the vault. Leaf insertions grow the
//! commitment tree and confirm pending notes. Nullifier usages mark notes
//! spent, and encrypted payloads carry incoming notes to their recipient.
//! Pages apply all-or-nothing with respect to their cursor: the cursor only
//! advances after every entry in a page succeeded, so an interrupted page
//! re-applies idempotently on the next pass. Remote failures retry with
//! bounded exponential backoff; data conflicts never retry.

pub mod client;
pub mod scan;

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

pub use client::{HttpIndexerClient, IndexerApi, LeafEvent, NullifierEvent, PayloadEvent};
pub use scan::PayloadScanner;

use crate::config::SyncOptions;
use crate::error::{Error, Result};
use crate::note::note_nullifier;
use crate::store::{NoteStore, StreamCursor, StreamKind};
use crate::tree::{CommitmentTree, TreeSnapshot};

/// Counters from one full sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub leaves_applied: u64,
    pub notes_spent: u64,
    pub notes_discovered: u64,
}

impl SyncOutcome {
    pub fn is_noop(&self) -> bool {
        self.leaves_applied == 0 && self.notes_spent == 0 && self.notes_discovered == 0
    }
}

/// Rebuilds the in-memory tree at startup: start from a published snapshot
/// when available, then replay locally persisted leaves over it. Overlaps
/// are fine because inserts are idempotent; a disagreement is a conflict,
/// not a merge.
pub fn bootstrap_tree(
    depth: usize,
    snapshot: Option<&TreeSnapshot>,
    store: &NoteStore,
) -> Result<CommitmentTree> {
    let mut tree = match snapshot {
        Some(snapshot) => {
            if snapshot.depth != depth {
                return Err(Error::InvalidConfig(format!(
                    "snapshot depth {} does not match configured depth {depth}",
                    snapshot.depth
                )));
            }
            CommitmentTree::from_snapshot(snapshot)?
        }
        None => CommitmentTree::new(depth)?,
    };
    for (index, value) in store.leaves()? {
        tree.insert(value, index)?;
    }
    Ok(tree)
}

/// Periodic synchronizer for one vault.
pub struct IndexerSync<C> {
    client: C,
    tree: Arc<Mutex<CommitmentTree>>,
    store: Arc<Mutex<NoteStore>>,
    options: SyncOptions,
    scanner: Option<PayloadScanner>,
}

impl<C: IndexerApi> IndexerSync<C> {
    pub fn new(
        client: C,
        tree: Arc<Mutex<CommitmentTree>>,
        store: Arc<Mutex<NoteStore>>,
        options: SyncOptions,
    ) -> Self {
        IndexerSync {
            client,
            tree,
            store,
            options,
            scanner: None,
        }
    }

    /// Enables payload scanning with the vault's decryption key.
    pub fn with_scanner(mut self, scanner: PayloadScanner) -> Self {
        self.scanner = Some(scanner);
        self
    }

    /// Drains the leaf stream from the persisted cursor. Each event grows
    /// the tree, persists the leaf, and confirms a matching pending note.
    /// Returns the number of events applied.
    pub async fn sync_leaves(&self, page_size: u32) -> Result<u64> {
        let mut applied = 0u64;
        loop {
            let offset = { self.store.lock().await.cursor(StreamKind::Leaves)?.offset };
            let page =
                with_backoff(&self.options, || self.client.leaf_page(offset, page_size)).await?;
            if page.is_empty() {
                break;
            }
            let fetched = page.len();

            {
                let mut tree = self.tree.lock().await;
                let store = self.store.lock().await;
                for event in &page {
                    tree.insert(event.leaf_value, event.leaf_index)?;
                    store.put_leaf(event.leaf_index, event.leaf_value)?;
                    if let Some(note) = store.note_by_commitment(event.leaf_value)? {
                        if note.leaf_index().is_none() {
                            let nullifier = note_nullifier(
                                event.leaf_index,
                                note.owner(),
                                note.secret(),
                                note.asset_id(),
                                note.amount(),
                            );
                            store.set_confirmed(note.commitment(), event.leaf_index, nullifier)?;
                            info!(leaf_index = event.leaf_index, "pending note confirmed");
                        }
                    }
                }
                store.set_cursor(
                    StreamKind::Leaves,
                    StreamCursor {
                        offset: offset + fetched as u64,
                        limit: page_size,
                    },
                )?;
            }

            applied += fetched as u64;
            debug!(fetched, offset, "applied leaf page");
            if fetched < page_size as usize {
                break;
            }
        }
        Ok(applied)
    }

    /// Drains the nullifier stream, marking matching notes spent. Unknown
    /// nullifiers belong to other vaults and pass through silently.
    /// Returns the number of local notes newly-or-still marked spent.
    pub async fn sync_nullifiers(&self, page_size: u32) -> Result<u64> {
        let mut spent = 0u64;
        loop {
            let offset = {
                self.store
                    .lock()
                    .await
                    .cursor(StreamKind::Nullifiers)?
                    .offset
            };
            let page = with_backoff(&self.options, || {
                self.client.nullifier_page(offset, page_size)
            })
            .await?;
            if page.is_empty() {
                break;
            }
            let fetched = page.len();

            {
                let store = self.store.lock().await;
                for event in &page {
                    if store.mark_used(event.nullifier)? {
                        spent += 1;
                    }
                }
                store.set_cursor(
                    StreamKind::Nullifiers,
                    StreamCursor {
                        offset: offset + fetched as u64,
                        limit: page_size,
                    },
                )?;
            }

            debug!(fetched, offset, "applied nullifier page");
            if fetched < page_size as usize {
                break;
            }
        }
        Ok(spent)
    }

    /// Drains the payload stream, trial-decrypting unseen payloads and
    /// adopting notes addressed to this vault. Requires a scanner.
    /// Returns the number of notes discovered.
    pub async fn sync_payloads(&self, page_size: u32) -> Result<u64> {
        let scanner = self.scanner.as_ref().ok_or_else(|| {
            Error::InvalidConfig("payload scanning requires a configured scanner".into())
        })?;

        let mut discovered = 0u64;
        loop {
            let offset = { self.store.lock().await.cursor(StreamKind::Payloads)?.offset };
            let page = with_backoff(&self.options, || {
                self.client.payload_page(offset, page_size)
            })
            .await?;
            if page.is_empty() {
                break;
            }
            let fetched = page.len();

            {
                let store = self.store.lock().await;
                for event in &page {
                    if store.payload_seen(&event.id)? {
                        continue;
                    }
                    match scanner.try_open(&event.ciphertext) {
                        Some(plaintext) => {
                            let mut note = plaintext.into_note();
                            if let Some(index) = store.leaf_index_for_value(note.commitment())? {
                                note.confirm(index);
                            }
                            store.add(&note)?;
                            if let (Some(index), Some(nullifier)) =
                                (note.leaf_index(), note.nullifier())
                            {
                                // The note may have existed as pending
                                // before this payload arrived.
                                store.set_confirmed(note.commitment(), index, nullifier)?;
                            }
                            store.record_payload(&event.id, &event.ciphertext, true)?;
                            discovered += 1;
                            info!(payload = %event.id, "discovered incoming note");
                        }
                        None => {
                            store.record_payload(&event.id, &event.ciphertext, false)?;
                        }
                    }
                }
                store.set_cursor(
                    StreamKind::Payloads,
                    StreamCursor {
                        offset: offset + fetched as u64,
                        limit: page_size,
                    },
                )?;
            }

            debug!(fetched, offset, "scanned payload page");
            if fetched < page_size as usize {
                break;
            }
        }
        Ok(discovered)
    }

    /// One full pass over every configured stream.
    pub async fn sync_once(&self) -> Result<SyncOutcome> {
        let leaves_applied = self.sync_leaves(self.options.page_size).await?;
        let notes_spent = self.sync_nullifiers(self.options.page_size).await?;
        let notes_discovered = if self.scanner.is_some() {
            self.sync_payloads(self.options.page_size).await?
        } else {
            0
        };
        Ok(SyncOutcome {
            leaves_applied,
            notes_spent,
            notes_discovered,
        })
    }

    /// Polls all streams at the configured interval until `shutdown` fires.
    ///
    /// Any write to the channel (or dropping its sender) stops the loop.
    /// Remote outages are logged and retried on the next tick; data errors
    /// (conflicts, corrupt values) terminate the task, because retrying
    /// cannot repair a divergent source.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut ticker = tokio::time::interval(self.options.poll_interval);
        info!(interval_secs = self.options.poll_interval.as_secs(), "sync loop started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("sync loop stopping");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    match self.sync_once().await {
                        Ok(outcome) => {
                            if !outcome.is_noop() {
                                info!(
                                    leaves = outcome.leaves_applied,
                                    spent = outcome.notes_spent,
                                    discovered = outcome.notes_discovered,
                                    "sync pass applied updates"
                                );
                            }
                        }
                        Err(err @ (Error::Remote(_) | Error::RemoteUnavailable { .. })) => {
                            warn!("sync pass failed, will retry next tick: {err}");
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
        }
    }
}

/// Retries a transient-failing fetch with doubling delays, bounded by
/// `max_retries` and `max_backoff`. Non-transient errors pass straight
/// through.
async fn with_backoff<T, F, Fut>(options: &SyncOptions, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    let mut delay = options.initial_backoff;
    loop {
        let reason = match op().await {
            Ok(value) => return Ok(value),
            Err(Error::Remote(reason)) => reason,
            Err(other) => return Err(other),
        };
        attempt += 1;
        if attempt > options.max_retries {
            return Err(Error::RemoteUnavailable {
                attempts: attempt,
                reason,
            });
        }
        warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "indexer fetch failed: {}; retrying",
            reason
        );
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(options.max_backoff);
    }
}
