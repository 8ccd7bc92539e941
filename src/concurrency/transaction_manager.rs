//! Transaction lifecycle: begin, commit, and abort with undo replay.

use crate::access::tuple::TupleMeta;
use crate::catalog::Catalog;
use crate::concurrency::lock_manager::LockManager;
use crate::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionState, TxnId, WriteType,
};
use anyhow::Result;
use dashmap::DashMap;
use log::debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Registry of live transactions, shared with the lock manager's deadlock
/// detector.
pub type TxnRegistry = Arc<DashMap<TxnId, Arc<Transaction>>>;

pub fn new_txn_registry() -> TxnRegistry {
    Arc::new(DashMap::new())
}

pub struct TransactionManager {
    registry: TxnRegistry,
    lock_manager: Arc<LockManager>,
    catalog: Arc<Catalog>,
    next_txn_id: AtomicU64,
}

impl TransactionManager {
    pub fn new(
        registry: TxnRegistry,
        lock_manager: Arc<LockManager>,
        catalog: Arc<Catalog>,
    ) -> Self {
        Self {
            registry,
            lock_manager,
            catalog,
            next_txn_id: AtomicU64::new(1),
        }
    }

    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(id, isolation_level));
        self.registry.insert(id, Arc::clone(&txn));
        txn
    }

    pub fn get(&self, id: TxnId) -> Option<Arc<Transaction>> {
        self.registry.get(&id).map(|e| Arc::clone(&e))
    }

    /// Commit: discard the undo logs and release every lock.
    pub fn commit(&self, txn: &Transaction) -> Result<()> {
        txn.set_state(TransactionState::Committed);
        let _ = txn.take_write_sets();
        self.lock_manager.release_all(txn);
        debug!("txn {} committed", txn.id());
        Ok(())
    }

    /// Abort: replay both undo logs in LIFO order, then release every lock.
    pub fn abort(&self, txn: &Transaction) -> Result<()> {
        let (table_writes, index_writes) = txn.take_write_sets();

        for record in table_writes.into_iter().rev() {
            let table = self.catalog.table(record.oid)?;
            match record.write_type {
                WriteType::Insert => {
                    // Tombstone the inserted tuple.
                    let mut meta = table.heap.get_tuple_meta(record.rid)?;
                    meta.is_deleted = true;
                    meta.delete_txn = txn.id();
                    table.heap.update_tuple_meta(record.rid, &meta)?;
                }
                WriteType::Delete => {
                    // Clear the tombstone.
                    let old = table.heap.get_tuple_meta(record.rid)?;
                    let meta = TupleMeta {
                        insert_txn: old.insert_txn,
                        delete_txn: 0,
                        is_deleted: false,
                    };
                    table.heap.update_tuple_meta(record.rid, &meta)?;
                }
                WriteType::Update => {
                    let old_tuple = record
                        .old_tuple
                        .as_ref()
                        .expect("update undo record carries the pre-image");
                    table.heap.update_tuple_in_place(record.rid, old_tuple)?;
                }
            }
        }

        for record in index_writes.into_iter().rev() {
            let index = self.catalog.index(record.index_oid)?;
            match record.write_type {
                WriteType::Insert => {
                    index.index.remove(&record.key)?;
                }
                WriteType::Delete => {
                    index.index.insert(&record.key, record.rid)?;
                }
                WriteType::Update => {
                    let old_key = record
                        .old_key
                        .expect("index update undo record carries the old key");
                    index.index.remove(&record.key)?;
                    index.index.insert(&old_key, record.rid)?;
                }
            }
        }

        txn.set_state(TransactionState::Aborted);
        self.lock_manager.release_all(txn);
        debug!("txn {} aborted and rolled back", txn.id());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::btree::key::IndexKey;
    use crate::access::tuple::Tuple;
    use crate::access::value::{DataType, Value};
    use crate::catalog::{Column, Schema};
    use crate::concurrency::transaction::{IndexWriteRecord, TableWriteRecord};
    use crate::storage::buffer::lru_k::LruKReplacer;
    use crate::storage::buffer::BufferPoolManager;
    use crate::storage::disk::DiskManager;
    use tempfile::tempdir;

    fn setup() -> Result<(Arc<Catalog>, TransactionManager)> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.db");
        let disk = DiskManager::create(&file_path)?;
        std::mem::forget(dir);
        let pool = BufferPoolManager::new(disk, Box::new(LruKReplacer::new(64, 2)), 64);
        let catalog = Arc::new(Catalog::new(pool));
        let registry = new_txn_registry();
        let lock_manager = Arc::new(LockManager::new(Arc::clone(&registry)));
        let txn_manager = TransactionManager::new(registry, lock_manager, Arc::clone(&catalog));
        Ok((catalog, txn_manager))
    }

    fn users_schema() -> Schema {
        Schema::new(vec![
            Column::new("id", DataType::Int32),
            Column::new("name", DataType::Varchar),
        ])
    }

    #[test]
    fn test_begin_assigns_increasing_ids() -> Result<()> {
        let (_, txn_manager) = setup()?;
        let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);
        let t2 = txn_manager.begin(IsolationLevel::ReadCommitted);
        assert!(t2.id() > t1.id());
        assert_eq!(txn_manager.get(t1.id()).unwrap().id(), t1.id());
        Ok(())
    }

    #[test]
    fn test_abort_rolls_back_insert() -> Result<()> {
        let (catalog, txn_manager) = setup()?;
        let table = catalog.create_table("users", users_schema())?;
        let txn = txn_manager.begin(IsolationLevel::RepeatableRead);

        let tuple = Tuple::from_values(&[Value::Int32(1), Value::String("a".into())]);
        let rid = table
            .heap
            .insert_tuple(&TupleMeta::new(txn.id()), &tuple)?;
        txn.append_table_write(TableWriteRecord {
            oid: table.oid,
            rid,
            write_type: WriteType::Insert,
            old_tuple: None,
        });

        txn_manager.abort(&txn)?;
        assert!(table.heap.get_tuple_meta(rid)?.is_deleted);
        assert!(txn.is_aborted());
        Ok(())
    }

    #[test]
    fn test_abort_rolls_back_delete_and_update() -> Result<()> {
        let (catalog, txn_manager) = setup()?;
        let table = catalog.create_table("users", users_schema())?;

        let before = Tuple::from_values(&[Value::Int32(1), Value::String("before".into())]);
        let rid = table.heap.insert_tuple(&TupleMeta::new(0), &before)?;

        let txn = txn_manager.begin(IsolationLevel::RepeatableRead);

        // Update in place, then tombstone, recording undo for both.
        let after = Tuple::from_values(&[Value::Int32(1), Value::String("after!".into())]);
        table.heap.update_tuple_in_place(rid, &after)?;
        txn.append_table_write(TableWriteRecord {
            oid: table.oid,
            rid,
            write_type: WriteType::Update,
            old_tuple: Some(before.clone()),
        });

        let mut meta = table.heap.get_tuple_meta(rid)?;
        meta.is_deleted = true;
        meta.delete_txn = txn.id();
        table.heap.update_tuple_meta(rid, &meta)?;
        txn.append_table_write(TableWriteRecord {
            oid: table.oid,
            rid,
            write_type: WriteType::Delete,
            old_tuple: None,
        });

        txn_manager.abort(&txn)?;

        let (meta, tuple) = table.heap.get_tuple(rid)?;
        assert!(!meta.is_deleted);
        assert_eq!(tuple.values()?, before.values()?);
        Ok(())
    }

    #[test]
    fn test_abort_rolls_back_index_writes() -> Result<()> {
        let (catalog, txn_manager) = setup()?;
        let table = catalog.create_table("users", users_schema())?;
        let index = catalog.create_index("users_by_id", "users", vec![0], 8, 8)?;

        let txn = txn_manager.begin(IsolationLevel::RepeatableRead);
        let rid = crate::access::tuple::Rid::new(crate::storage::page::PageId(0), 0);

        // Simulate an index maintenance pair: delete old key, insert new.
        let old_key = IndexKey::from_values(&[Value::Int32(1)])?;
        let new_key = IndexKey::from_values(&[Value::Int32(2)])?;
        index.index.insert(&old_key, rid)?;

        index.index.remove(&old_key)?;
        index.index.insert(&new_key, rid)?;
        txn.append_index_write(IndexWriteRecord {
            index_oid: index.oid,
            table_oid: table.oid,
            rid,
            write_type: WriteType::Update,
            key: new_key,
            old_key: Some(old_key),
        });

        txn_manager.abort(&txn)?;
        assert!(index.index.get(&old_key)?.is_some());
        assert!(index.index.get(&new_key)?.is_none());
        Ok(())
    }

    #[test]
    fn test_commit_discards_undo() -> Result<()> {
        let (catalog, txn_manager) = setup()?;
        let table = catalog.create_table("users", users_schema())?;
        let txn = txn_manager.begin(IsolationLevel::RepeatableRead);

        let tuple = Tuple::from_values(&[Value::Int32(1), Value::String("a".into())]);
        let rid = table
            .heap
            .insert_tuple(&TupleMeta::new(txn.id()), &tuple)?;
        txn.append_table_write(TableWriteRecord {
            oid: table.oid,
            rid,
            write_type: WriteType::Insert,
            old_tuple: None,
        });

        txn_manager.commit(&txn)?;
        assert!(!table.heap.get_tuple_meta(rid)?.is_deleted);
        assert_eq!(txn.state(), TransactionState::Committed);
        Ok(())
    }
}
