use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use halo2curves_axiom::bn256::Fr;
use notevault::{
    encrypt_note, generate_encryption_keypair, note_nullifier, CommitmentTree, Error, IndexerApi,
    IndexerSync, LeafEvent, NotePlaintext, NoteStatus, NoteStore, NullifierEvent, OwnerKey,
    PayloadEvent, PayloadScanner, Result, StreamKind, SyncOptions,
};
use tokio::sync::Mutex;

// Indexer double whose streams can be rewritten mid-test.
#[derive(Default)]
struct ScriptedIndexer {
    leaves: StdMutex<Vec<LeafEvent>>,
    nullifiers: StdMutex<Vec<NullifierEvent>>,
    payloads: StdMutex<Vec<PayloadEvent>>,
}

fn page_of<T: Clone>(items: &[T], offset: u64, limit: u32) -> Vec<T> {
    items
        .iter()
        .skip(offset as usize)
        .take(limit as usize)
        .cloned()
        .collect()
}

#[async_trait]
impl IndexerApi for ScriptedIndexer {
    async fn leaf_page(&self, offset: u64, limit: u32) -> Result<Vec<LeafEvent>> {
        Ok(page_of(&self.leaves.lock().unwrap(), offset, limit))
    }

    async fn nullifier_page(&self, offset: u64, limit: u32) -> Result<Vec<NullifierEvent>> {
        Ok(page_of(&self.nullifiers.lock().unwrap(), offset, limit))
    }

    async fn payload_page(&self, offset: u64, limit: u32) -> Result<Vec<PayloadEvent>> {
        Ok(page_of(&self.payloads.lock().unwrap(), offset, limit))
    }
}

fn fast_options() -> SyncOptions {
    SyncOptions::default()
        .with_page_size(10)
        .with_poll_interval(Duration::from_millis(10))
        .with_backoff(Duration::from_millis(1), Duration::from_millis(2))
}

struct Harness {
    sync: IndexerSync<Arc<ScriptedIndexer>>,
    indexer: Arc<ScriptedIndexer>,
    tree: Arc<Mutex<CommitmentTree>>,
    store: Arc<Mutex<NoteStore>>,
}

fn harness() -> Harness {
    let indexer = Arc::new(ScriptedIndexer::default());
    let tree = Arc::new(Mutex::new(CommitmentTree::new(4).expect("depth in range")));
    let store = Arc::new(Mutex::new(NoteStore::in_memory().expect("open store")));
    let sync = IndexerSync::new(
        Arc::clone(&indexer),
        Arc::clone(&tree),
        Arc::clone(&store),
        fast_options(),
    );
    Harness {
        sync,
        indexer,
        tree,
        store,
    }
}

fn leaf(index: u64, value: u64) -> LeafEvent {
    LeafEvent {
        leaf_index: index,
        leaf_value: Fr::from(value),
    }
}

#[tokio::test]
async fn interrupted_page_replays_without_skips_or_duplicates() {
    let h = harness();

    // First serve: the second entry contradicts the first at index 0.
    *h.indexer.leaves.lock().unwrap() = vec![leaf(0, 500), leaf(0, 999)];

    match h.sync.sync_leaves(10).await {
        Err(Error::ConflictingLeaf { index: 0 }) => {}
        other => panic!("expected conflict, got {other:?}"),
    }
    assert_eq!(
        h.store
            .lock()
            .await
            .cursor(StreamKind::Leaves)
            .expect("cursor")
            .offset,
        0
    );

    // The indexer recovers and serves the true stream from the start.
    *h.indexer.leaves.lock().unwrap() = vec![leaf(0, 500), leaf(1, 501), leaf(2, 502)];

    let applied = h.sync.sync_leaves(10).await.expect("replay succeeds");
    assert_eq!(applied, 3);
    assert_eq!(
        h.store
            .lock()
            .await
            .cursor(StreamKind::Leaves)
            .expect("cursor")
            .offset,
        3
    );

    let tree = h.tree.lock().await;
    assert_eq!(tree.committed_leaves().len(), 3);

    let mut reference = CommitmentTree::new(4).expect("depth in range");
    for (index, value) in [(0, 500u64), (1, 501), (2, 502)] {
        reference.insert(Fr::from(value), index).expect("insert");
    }
    assert_eq!(tree.root(), reference.root());
    drop(tree);

    assert_eq!(h.store.lock().await.leaves().expect("leaves").len(), 3);
}

#[tokio::test]
async fn payload_stream_delivers_and_confirms_incoming_note() {
    let owner = OwnerKey::from_seed(&[7u8; 32]);
    let (secret_key, public_key) = generate_encryption_keypair();

    let plaintext = NotePlaintext {
        secret: Fr::from(31),
        owner: owner.address(),
        asset_id: Fr::from(1),
        amount: 750,
    };
    let commitment = plaintext.clone().into_note().commitment();
    let ciphertext = encrypt_note(&plaintext, &public_key).expect("seal");

    let h = harness();
    let sync = h.sync.with_scanner(PayloadScanner::new(secret_key, &owner));

    *h.indexer.leaves.lock().unwrap() = vec![LeafEvent {
        leaf_index: 0,
        leaf_value: commitment,
    }];
    *h.indexer.payloads.lock().unwrap() = vec![
        PayloadEvent {
            id: "p-1".into(),
            ciphertext,
        },
        PayloadEvent {
            id: "p-2".into(),
            ciphertext: b"not an envelope".to_vec(),
        },
    ];

    let outcome = sync.sync_once().await.expect("first pass");
    assert_eq!(outcome.leaves_applied, 1);
    assert_eq!(outcome.notes_discovered, 1);
    assert_eq!(outcome.notes_spent, 0);

    let expected_nullifier = note_nullifier(0, owner.address(), Fr::from(31), Fr::from(1), 750);
    {
        let store = h.store.lock().await;
        let note = store
            .note_by_commitment(commitment)
            .expect("lookup")
            .expect("note adopted");
        assert_eq!(note.leaf_index(), Some(0));
        assert_eq!(note.nullifier(), Some(expected_nullifier));
        assert_eq!(note.status(), NoteStatus::Active);
        assert_eq!(store.total(Fr::from(1)).expect("total"), 750);
    }

    // Nothing new on the second pass: cursors advanced, payloads remembered.
    let outcome = sync.sync_once().await.expect("second pass");
    assert!(outcome.is_noop());

    // The note's nullifier lands on chain; the note flips to spent.
    *h.indexer.nullifiers.lock().unwrap() = vec![NullifierEvent {
        nullifier: expected_nullifier,
    }];
    let outcome = sync.sync_once().await.expect("third pass");
    assert_eq!(outcome.notes_spent, 1);

    let store = h.store.lock().await;
    let note = store
        .note_by_commitment(commitment)
        .expect("lookup")
        .expect("note present");
    assert_eq!(note.status(), NoteStatus::Spent);
    assert_eq!(store.total(Fr::from(1)).expect("total"), 0);
}

#[tokio::test]
async fn poll_loop_applies_updates_until_shutdown() {
    let h = harness();
    *h.indexer.leaves.lock().unwrap() = vec![leaf(0, 42), leaf(1, 43)];

    let sync = Arc::new(h.sync);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let task = tokio::spawn({
        let sync = Arc::clone(&sync);
        async move { sync.run(shutdown_rx).await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send(true).expect("loop still listening");
    task.await.expect("join").expect("loop exits cleanly");

    assert_eq!(h.tree.lock().await.next_index(), 2);
    assert_eq!(
        h.store
            .lock()
            .await
            .cursor(StreamKind::Leaves)
            .expect("cursor")
            .offset,
        2
    );
}
