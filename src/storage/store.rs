//! sled-backed implementation of the node store.

use super::{Keyspace, KeyspaceProvider, KeyValueStore, SYNC_STATUS_KEYSPACE, StoreError};
use parking_lot::Mutex;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Batch, Db, Transactional, Tree};
use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

type Overlay = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

/// Handle to the node database. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    db: Db,
    trees: Arc<Vec<Tree>>,
    /// Memory-only database for process-lifetime flags.
    _ephemeral: Db,
    status: Tree,
    writer: Arc<tokio::sync::Mutex<()>>,
}

impl Store {
    /// Open (or create) the store under `<data_dir>/db`.
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let path = data_dir.join("db");
        let db = sled::open(&path)?;
        info!("Opened store at {:?}", path);
        Self::from_db(db)
    }

    /// Open a store that lives only in memory.
    pub fn open_temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self, StoreError> {
        let trees = Keyspace::ALL
            .iter()
            .map(|ks| db.open_tree(ks.as_str()))
            .collect::<Result<Vec<_>, _>>()?;

        // the status flag must not survive restarts, so it never touches disk
        let ephemeral = sled::Config::new().temporary(true).open()?;
        let status = ephemeral.open_tree(SYNC_STATUS_KEYSPACE)?;

        Ok(Self {
            db,
            trees: Arc::new(trees),
            _ephemeral: ephemeral,
            status,
            writer: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    /// Committed view of a keyspace. Writes through it bypass transactions.
    pub fn keyspace(&self, keyspace: Keyspace) -> KeyspaceStore {
        KeyspaceStore {
            tree: self.trees[keyspace.index()].clone(),
        }
    }

    /// The memory-only sync status keyspace.
    pub fn sync_status_keyspace(&self) -> KeyspaceStore {
        KeyspaceStore {
            tree: self.status.clone(),
        }
    }

    /// Begin a transaction, waiting for any other open transaction to finish.
    ///
    /// The returned transaction must be finished with exactly one of
    /// [`Transaction::commit`] or [`Transaction::discard`]; dropping it
    /// discards. Opening a second transaction from a task that still holds one
    /// deadlocks.
    pub async fn open_transaction(&self) -> Transaction {
        let guard = self.writer.clone().lock_owned().await;
        debug!("Opened store transaction");
        Transaction {
            db: self.db.clone(),
            trees: self.trees.clone(),
            inner: Mutex::new(TransactionInner {
                staged: vec![Overlay::new(); Keyspace::ALL.len()],
                guard: Some(guard),
                state: TransactionState::Open,
            }),
        }
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

impl KeyspaceProvider for Store {
    type Store<'a> = KeyspaceStore;

    fn keyspace(&self, keyspace: Keyspace) -> Self::Store<'_> {
        Store::keyspace(self, keyspace)
    }
}

/// A keyspace read and written directly against committed state.
#[derive(Clone)]
pub struct KeyspaceStore {
    tree: Tree,
}

impl KeyValueStore for KeyspaceStore {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, StoreError> {
        self.tree
            .get(key)?
            .map(|value| value.to_vec())
            .ok_or(StoreError::NotFound)
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.tree.insert(key, value)?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.tree.remove(key)?;
        Ok(())
    }

    fn iterate(
        &self,
        f: &mut dyn FnMut(&[u8], &[u8]) -> Result<ControlFlow<()>, StoreError>,
    ) -> Result<(), StoreError> {
        for entry in self.tree.iter() {
            let (key, value) = entry?;
            if f(&key, &value)?.is_break() {
                break;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransactionState {
    Open,
    Committed,
    Discarded,
}

struct TransactionInner {
    /// Staged writes per keyspace; `None` marks a delete.
    staged: Vec<Overlay>,
    guard: Option<OwnedMutexGuard<()>>,
    state: TransactionState,
}

/// An exclusive, all-or-nothing unit of writes across every keyspace.
pub struct Transaction {
    db: Db,
    trees: Arc<Vec<Tree>>,
    inner: Mutex<TransactionInner>,
}

impl Transaction {
    /// Keyspace view with read-your-writes semantics.
    pub fn keyspace(&self, keyspace: Keyspace) -> TransactionalKeyspace<'_> {
        TransactionalKeyspace {
            transaction: self,
            keyspace,
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().state == TransactionState::Open
    }

    /// Number of keys written or deleted so far.
    pub fn staged_writes(&self) -> usize {
        self.inner.lock().staged.iter().map(BTreeMap::len).sum()
    }

    /// Apply every staged write atomically and flush to disk.
    ///
    /// The transaction is closed afterwards whether or not the commit
    /// succeeded, so a following [`discard`](Self::discard) is a no-op.
    pub fn commit(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.state != TransactionState::Open {
            return Err(StoreError::TransactionClosed);
        }
        inner.state = TransactionState::Committed;
        let staged = std::mem::take(&mut inner.staged);
        let result = self.apply(&staged);
        inner.guard.take();

        match &result {
            Ok(()) => debug!("Committed store transaction"),
            Err(e) => warn!("Store transaction commit failed: {}", e),
        }
        result
    }

    /// Drop staged writes and release the writer lock. Idempotent.
    pub fn discard(&self) {
        let mut inner = self.inner.lock();
        if inner.state != TransactionState::Open {
            return;
        }
        inner.state = TransactionState::Discarded;
        inner.staged.clear();
        inner.guard.take();
        debug!("Discarded store transaction");
    }

    fn apply(&self, staged: &[Overlay]) -> Result<(), StoreError> {
        if staged.iter().all(BTreeMap::is_empty) {
            return Ok(());
        }

        let batches: Vec<Batch> = staged
            .iter()
            .map(|overlay| {
                let mut batch = Batch::default();
                for (key, value) in overlay {
                    match value {
                        Some(value) => batch.insert(key.as_slice(), value.as_slice()),
                        None => batch.remove(key.as_slice()),
                    }
                }
                batch
            })
            .collect();

        self.trees
            .as_slice()
            .transaction(|views| {
                for (view, batch) in views.iter().zip(&batches) {
                    view.apply_batch(batch)?;
                }
                Ok::<(), ConflictableTransactionError<StoreError>>(())
            })
            .map_err(|e| match e {
                TransactionError::Abort(e) => e,
                TransactionError::Storage(e) => StoreError::Engine(e),
            })?;

        self.db.flush()?;
        Ok(())
    }

    fn staged_value(&self, keyspace: Keyspace, key: &[u8]) -> Option<Option<Vec<u8>>> {
        self.inner
            .lock()
            .staged
            .get(keyspace.index())
            .and_then(|overlay| overlay.get(key).cloned())
    }

    fn stage(
        &self,
        keyspace: Keyspace,
        key: &[u8],
        value: Option<&[u8]>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.state != TransactionState::Open {
            return Err(StoreError::TransactionClosed);
        }
        inner.staged[keyspace.index()].insert(key.to_vec(), value.map(<[u8]>::to_vec));
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.discard();
    }
}

impl KeyspaceProvider for Transaction {
    type Store<'a> = TransactionalKeyspace<'a>;

    fn keyspace(&self, keyspace: Keyspace) -> Self::Store<'_> {
        Transaction::keyspace(self, keyspace)
    }
}

/// A keyspace viewed through an open transaction.
pub struct TransactionalKeyspace<'t> {
    transaction: &'t Transaction,
    keyspace: Keyspace,
}

impl TransactionalKeyspace<'_> {
    fn tree(&self) -> &Tree {
        &self.transaction.trees[self.keyspace.index()]
    }
}

impl KeyValueStore for TransactionalKeyspace<'_> {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, StoreError> {
        match self.transaction.staged_value(self.keyspace, key) {
            Some(Some(value)) => Ok(value),
            Some(None) => Err(StoreError::NotFound),
            None => self
                .tree()
                .get(key)?
                .map(|value| value.to_vec())
                .ok_or(StoreError::NotFound),
        }
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.transaction.stage(self.keyspace, key, Some(value))
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.transaction.stage(self.keyspace, key, None)
    }

    fn iterate(
        &self,
        f: &mut dyn FnMut(&[u8], &[u8]) -> Result<ControlFlow<()>, StoreError>,
    ) -> Result<(), StoreError> {
        // snapshot the overlay so the callback may write through this keyspace
        let overlay = self
            .transaction
            .inner
            .lock()
            .staged
            .get(self.keyspace.index())
            .cloned()
            .unwrap_or_default();

        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        for entry in self.tree().iter() {
            let (key, value) = entry?;
            merged.insert(key.to_vec(), value.to_vec());
        }
        for (key, value) in overlay {
            match value {
                Some(value) => merged.insert(key, value),
                None => merged.remove(&key),
            };
        }

        for (key, value) in &merged {
            if f(key, value)?.is_break() {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(store: &impl KeyValueStore) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut entries = Vec::new();
        store
            .iterate(&mut |k, v| {
                entries.push((k.to_vec(), v.to_vec()));
                Ok(ControlFlow::Continue(()))
            })
            .unwrap();
        entries
    }

    #[tokio::test]
    async fn reads_see_own_writes_before_commit() {
        let store = Store::open_temporary().unwrap();
        let tx = store.open_transaction().await;
        let ks = tx.keyspace(Keyspace::Account);

        ks.set(b"a", b"1").unwrap();
        assert_eq!(ks.get(b"a").unwrap(), b"1");
        assert!(matches!(
            store.keyspace(Keyspace::Account).get(b"a"),
            Err(StoreError::NotFound)
        ));

        tx.commit().unwrap();
        assert_eq!(store.keyspace(Keyspace::Account).get(b"a").unwrap(), b"1");
    }

    #[tokio::test]
    async fn discard_drops_writes_and_is_idempotent() {
        let store = Store::open_temporary().unwrap();
        store.keyspace(Keyspace::Token).set(b"t", b"old").unwrap();

        let tx = store.open_transaction().await;
        tx.keyspace(Keyspace::Token).set(b"t", b"new").unwrap();
        tx.keyspace(Keyspace::Token).delete(b"t").unwrap();
        tx.discard();
        tx.discard();
        assert!(!tx.is_open());

        assert_eq!(store.keyspace(Keyspace::Token).get(b"t").unwrap(), b"old");
        assert!(matches!(
            tx.keyspace(Keyspace::Token).set(b"t", b"x"),
            Err(StoreError::TransactionClosed)
        ));
    }

    #[tokio::test]
    async fn discard_after_commit_is_noop() {
        let store = Store::open_temporary().unwrap();
        let tx = store.open_transaction().await;
        tx.keyspace(Keyspace::Wallet).set(b"w", b"1").unwrap();
        tx.commit().unwrap();
        tx.discard();
        assert_eq!(store.keyspace(Keyspace::Wallet).get(b"w").unwrap(), b"1");
        assert!(matches!(tx.commit(), Err(StoreError::TransactionClosed)));
    }

    #[tokio::test]
    async fn commit_spans_keyspaces() {
        let store = Store::open_temporary().unwrap();
        let tx = store.open_transaction().await;
        tx.keyspace(Keyspace::Account).set(b"a", b"1").unwrap();
        tx.keyspace(Keyspace::BlockData).set(b"b", b"2").unwrap();
        tx.keyspace(Keyspace::BlockchainState).set(b"c", b"3").unwrap();
        assert_eq!(tx.staged_writes(), 3);
        tx.commit().unwrap();

        assert_eq!(store.keyspace(Keyspace::Account).get(b"a").unwrap(), b"1");
        assert_eq!(store.keyspace(Keyspace::BlockData).get(b"b").unwrap(), b"2");
        assert_eq!(
            store.keyspace(Keyspace::BlockchainState).get(b"c").unwrap(),
            b"3"
        );
    }

    #[tokio::test]
    async fn iterate_merges_overlay_in_key_order() {
        let store = Store::open_temporary().unwrap();
        let committed = store.keyspace(Keyspace::Account);
        committed.set(b"a", b"1").unwrap();
        committed.set(b"c", b"3").unwrap();

        let tx = store.open_transaction().await;
        let ks = tx.keyspace(Keyspace::Account);
        ks.set(b"b", b"2").unwrap();
        ks.delete(b"c").unwrap();
        ks.set(b"a", b"9").unwrap();

        assert_eq!(
            collect(&ks),
            vec![(b"a".to_vec(), b"9".to_vec()), (b"b".to_vec(), b"2".to_vec())]
        );
    }

    #[tokio::test]
    async fn iterate_stops_on_break() {
        let store = Store::open_temporary().unwrap();
        let ks = store.keyspace(Keyspace::Token);
        for key in [b"1", b"2", b"3"] {
            ks.set(key, b"x").unwrap();
        }
        let mut seen = 0;
        ks.iterate(&mut |_, _| {
            seen += 1;
            Ok(if seen == 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            })
        })
        .unwrap();
        assert_eq!(seen, 2);
    }

    #[tokio::test]
    async fn writer_lock_serializes_transactions() {
        let store = Store::open_temporary().unwrap();
        let first = store.open_transaction().await;

        let contender = store.clone();
        let handle = tokio::spawn(async move {
            let tx = contender.open_transaction().await;
            tx.keyspace(Keyspace::Account).set(b"k", b"second").unwrap();
            tx.commit().unwrap();
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        first.keyspace(Keyspace::Account).set(b"k", b"first").unwrap();
        first.commit().unwrap();
        handle.await.unwrap();

        assert_eq!(
            store.keyspace(Keyspace::Account).get(b"k").unwrap(),
            b"second"
        );
    }

    #[test]
    fn status_keyspace_is_separate() {
        let store = Store::open_temporary().unwrap();
        store.sync_status_keyspace().set(b"s", b"1").unwrap();
        for ks in Keyspace::ALL {
            assert!(collect(&store.keyspace(ks)).is_empty());
        }
    }

    #[test]
    fn reopen_keeps_committed_data() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = Store::open(dir.path()).unwrap();
            store.keyspace(Keyspace::Wallet).set(b"w", b"1").unwrap();
            store.flush().unwrap();
        }
        let store = Store::open(dir.path()).unwrap();
        assert_eq!(store.keyspace(Keyspace::Wallet).get(b"w").unwrap(), b"1");
        assert!(collect(&store.sync_status_keyspace()).is_empty());
    }
}
