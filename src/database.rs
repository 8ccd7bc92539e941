//! Database facade: wires the disk manager, buffer pool, catalog, lock
//! manager, and transaction manager together and owns the deadlock
//! detector's lifecycle.

use crate::catalog::Catalog;
use crate::concurrency::lock_manager::LockManager;
use crate::concurrency::transaction::{IsolationLevel, Transaction};
use crate::concurrency::transaction_manager::{new_txn_registry, TransactionManager};
use crate::execution::ExecutorContext;
use crate::storage::buffer::lru_k::LruKReplacer;
use crate::storage::buffer::BufferPoolManager;
use crate::storage::disk::DiskManager;
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Recognized configuration options.
#[derive(Debug, Clone)]
pub struct Options {
    /// Number of frames in the buffer pool.
    pub buffer_pool_size: usize,
    /// K parameter of the LRU-K replacer.
    pub lru_k: usize,
    /// Per-tree page fanout for indexes created through the catalog.
    pub leaf_max_size: u16,
    pub internal_max_size: u16,
    /// Deadlock detection interval; `None` disables the detector.
    pub cycle_detection_interval: Option<Duration>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            buffer_pool_size: 64,
            lru_k: 2,
            leaf_max_size: 32,
            internal_max_size: 32,
            cycle_detection_interval: Some(Duration::from_millis(50)),
        }
    }
}

pub struct Database {
    buffer_pool: BufferPoolManager,
    catalog: Arc<Catalog>,
    lock_manager: Arc<LockManager>,
    transaction_manager: Arc<TransactionManager>,
    options: Options,
}

impl Database {
    pub fn create(path: &Path, options: Options) -> Result<Self> {
        let disk = DiskManager::create(path)?;
        let replacer = Box::new(LruKReplacer::new(options.buffer_pool_size, options.lru_k));
        let buffer_pool = BufferPoolManager::new(disk, replacer, options.buffer_pool_size);
        let catalog = Arc::new(Catalog::new(buffer_pool.clone()));

        let registry = new_txn_registry();
        let lock_manager = Arc::new(LockManager::new(Arc::clone(&registry)));
        if let Some(interval) = options.cycle_detection_interval {
            lock_manager.start_deadlock_detection(interval);
        }
        let transaction_manager = Arc::new(TransactionManager::new(
            registry,
            Arc::clone(&lock_manager),
            Arc::clone(&catalog),
        ));

        Ok(Self {
            buffer_pool,
            catalog,
            lock_manager,
            transaction_manager,
            options,
        })
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn buffer_pool(&self) -> &BufferPoolManager {
        &self.buffer_pool
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    pub fn transaction_manager(&self) -> &Arc<TransactionManager> {
        &self.transaction_manager
    }

    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        self.transaction_manager.begin(isolation_level)
    }

    pub fn commit(&self, txn: &Transaction) -> Result<()> {
        self.transaction_manager.commit(txn)
    }

    pub fn abort(&self, txn: &Transaction) -> Result<()> {
        self.transaction_manager.abort(txn)
    }

    /// Context for running an executor tree under `txn`.
    pub fn executor_context(&self, txn: Arc<Transaction>) -> ExecutorContext {
        ExecutorContext::new(
            Arc::clone(&self.catalog),
            self.buffer_pool.clone(),
            Arc::clone(&self.lock_manager),
            Arc::clone(&self.transaction_manager),
            txn,
        )
    }

    pub fn flush(&self) -> Result<()> {
        self.buffer_pool.flush_all()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.lock_manager.stop_deadlock_detection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_and_begin() -> Result<()> {
        let dir = tempdir()?;
        let db = Database::create(&dir.path().join("test.db"), Options::default())?;

        let txn = db.begin(IsolationLevel::RepeatableRead);
        assert_eq!(txn.isolation_level(), IsolationLevel::RepeatableRead);
        db.commit(&txn)?;
        Ok(())
    }

    #[test]
    fn test_detector_disabled() -> Result<()> {
        let dir = tempdir()?;
        let options = Options {
            cycle_detection_interval: None,
            ..Options::default()
        };
        let db = Database::create(&dir.path().join("test.db"), options)?;
        drop(db);
        Ok(())
    }
}
