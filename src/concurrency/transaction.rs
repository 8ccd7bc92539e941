//! Transaction context: isolation level, lifecycle state, held locks, and
//! the undo logs replayed on abort.

use crate::access::btree::key::IndexKey;
use crate::access::tuple::{Rid, Tuple};
use crate::catalog::{IndexOid, TableOid};
use crate::concurrency::lock_manager::LockMode;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

pub type TxnId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionState {
    #[default]
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Protocol violations that abort the offending transaction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("txn {0} attempted a lock in the shrinking phase")]
    LockOnShrinking(TxnId),

    #[error("txn {0} attempted a shared lock under READ UNCOMMITTED")]
    LockSharedOnReadUncommitted(TxnId),

    #[error("txn {0} attempted an upgrade while another upgrade is in progress")]
    UpgradeConflict(TxnId),

    #[error("txn {0} attempted an upgrade outside the upgrade lattice")]
    IncompatibleUpgrade(TxnId),

    #[error("txn {0} attempted to unlock a lock it does not hold")]
    AttemptedUnlockButNoLockHeld(TxnId),

    #[error("txn {0} attempted to unlock a table while still holding row locks on it")]
    TableUnlockedBeforeUnlockingRows(TxnId),

    #[error("txn {0} attempted an intention lock on a row")]
    AttemptedIntentionLockOnRow(TxnId),

    #[error("txn {0} attempted a row lock without the matching table lock")]
    TableLockNotPresent(TxnId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteType {
    Insert,
    Delete,
    Update,
}

/// Undo record for a table heap mutation. UPDATE carries the pre-image so
/// rollback can restore the tuple in place.
#[derive(Debug, Clone)]
pub struct TableWriteRecord {
    pub oid: TableOid,
    pub rid: Rid,
    pub write_type: WriteType,
    pub old_tuple: Option<Tuple>,
}

/// Undo record for a secondary-index mutation.
#[derive(Debug, Clone)]
pub struct IndexWriteRecord {
    pub index_oid: IndexOid,
    pub table_oid: TableOid,
    pub rid: Rid,
    pub write_type: WriteType,
    pub key: IndexKey,
    /// For UPDATE: the key the rollback must reinsert.
    pub old_key: Option<IndexKey>,
}

#[derive(Debug, Default)]
struct TransactionInner {
    state: TransactionState,

    is_table_lock_set: HashSet<TableOid>,
    ix_table_lock_set: HashSet<TableOid>,
    s_table_lock_set: HashSet<TableOid>,
    six_table_lock_set: HashSet<TableOid>,
    x_table_lock_set: HashSet<TableOid>,

    s_row_lock_set: HashMap<TableOid, HashSet<Rid>>,
    x_row_lock_set: HashMap<TableOid, HashSet<Rid>>,

    table_write_set: Vec<TableWriteRecord>,
    index_write_set: Vec<IndexWriteRecord>,
}

pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    inner: Mutex<TransactionInner>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            inner: Mutex::new(TransactionInner::default()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        self.inner.lock().state
    }

    pub fn set_state(&self, state: TransactionState) {
        self.inner.lock().state = state;
    }

    pub fn is_aborted(&self) -> bool {
        self.state() == TransactionState::Aborted
    }

    pub fn holds_table_lock(&self, mode: LockMode, oid: TableOid) -> bool {
        let inner = self.inner.lock();
        table_set(&inner, mode).contains(&oid)
    }

    /// Any table lock held on `oid`, strongest first.
    pub fn table_lock_mode(&self, oid: TableOid) -> Option<LockMode> {
        let inner = self.inner.lock();
        for mode in [
            LockMode::Exclusive,
            LockMode::SharedIntentionExclusive,
            LockMode::IntentionExclusive,
            LockMode::Shared,
            LockMode::IntentionShared,
        ] {
            if table_set(&inner, mode).contains(&oid) {
                return Some(mode);
            }
        }
        None
    }

    pub fn insert_table_lock(&self, mode: LockMode, oid: TableOid) {
        let mut inner = self.inner.lock();
        table_set_mut(&mut inner, mode).insert(oid);
    }

    pub fn remove_table_lock(&self, mode: LockMode, oid: TableOid) {
        let mut inner = self.inner.lock();
        table_set_mut(&mut inner, mode).remove(&oid);
    }

    pub fn holds_row_lock(&self, mode: LockMode, oid: TableOid, rid: Rid) -> bool {
        let inner = self.inner.lock();
        let set = match mode {
            LockMode::Shared => &inner.s_row_lock_set,
            LockMode::Exclusive => &inner.x_row_lock_set,
            _ => return false,
        };
        set.get(&oid).is_some_and(|rids| rids.contains(&rid))
    }

    pub fn insert_row_lock(&self, mode: LockMode, oid: TableOid, rid: Rid) {
        let mut inner = self.inner.lock();
        let set = match mode {
            LockMode::Shared => &mut inner.s_row_lock_set,
            LockMode::Exclusive => &mut inner.x_row_lock_set,
            _ => unreachable!("intention locks are table-only"),
        };
        set.entry(oid).or_default().insert(rid);
    }

    pub fn remove_row_lock(&self, mode: LockMode, oid: TableOid, rid: Rid) {
        let mut inner = self.inner.lock();
        let set = match mode {
            LockMode::Shared => &mut inner.s_row_lock_set,
            LockMode::Exclusive => &mut inner.x_row_lock_set,
            _ => return,
        };
        if let Some(rids) = set.get_mut(&oid) {
            rids.remove(&rid);
            if rids.is_empty() {
                set.remove(&oid);
            }
        }
    }

    /// True if any row lock on `oid` is still held (blocks table unlock).
    pub fn holds_any_row_lock_on(&self, oid: TableOid) -> bool {
        let inner = self.inner.lock();
        inner
            .s_row_lock_set
            .get(&oid)
            .is_some_and(|s| !s.is_empty())
            || inner
                .x_row_lock_set
                .get(&oid)
                .is_some_and(|s| !s.is_empty())
    }

    pub fn append_table_write(&self, record: TableWriteRecord) {
        self.inner.lock().table_write_set.push(record);
    }

    pub fn append_index_write(&self, record: IndexWriteRecord) {
        self.inner.lock().index_write_set.push(record);
    }

    /// Drain the undo logs for replay (abort) or discard (commit).
    pub fn take_write_sets(&self) -> (Vec<TableWriteRecord>, Vec<IndexWriteRecord>) {
        let mut inner = self.inner.lock();
        (
            std::mem::take(&mut inner.table_write_set),
            std::mem::take(&mut inner.index_write_set),
        )
    }

    /// Drain every held lock, rows first, for bulk release at commit/abort.
    #[allow(clippy::type_complexity)]
    pub fn take_all_locks(
        &self,
    ) -> (
        Vec<(LockMode, TableOid, Rid)>,
        Vec<(LockMode, TableOid)>,
    ) {
        let mut inner = self.inner.lock();
        let mut rows = Vec::new();
        for (oid, rids) in std::mem::take(&mut inner.s_row_lock_set) {
            rows.extend(rids.into_iter().map(|rid| (LockMode::Shared, oid, rid)));
        }
        for (oid, rids) in std::mem::take(&mut inner.x_row_lock_set) {
            rows.extend(rids.into_iter().map(|rid| (LockMode::Exclusive, oid, rid)));
        }

        let mut tables = Vec::new();
        for mode in [
            LockMode::IntentionShared,
            LockMode::IntentionExclusive,
            LockMode::Shared,
            LockMode::SharedIntentionExclusive,
            LockMode::Exclusive,
        ] {
            for oid in std::mem::take(table_set_mut(&mut inner, mode)) {
                tables.push((mode, oid));
            }
        }
        (rows, tables)
    }
}

fn table_set(inner: &TransactionInner, mode: LockMode) -> &HashSet<TableOid> {
    match mode {
        LockMode::IntentionShared => &inner.is_table_lock_set,
        LockMode::IntentionExclusive => &inner.ix_table_lock_set,
        LockMode::Shared => &inner.s_table_lock_set,
        LockMode::SharedIntentionExclusive => &inner.six_table_lock_set,
        LockMode::Exclusive => &inner.x_table_lock_set,
    }
}

fn table_set_mut(inner: &mut TransactionInner, mode: LockMode) -> &mut HashSet<TableOid> {
    match mode {
        LockMode::IntentionShared => &mut inner.is_table_lock_set,
        LockMode::IntentionExclusive => &mut inner.ix_table_lock_set,
        LockMode::Shared => &mut inner.s_table_lock_set,
        LockMode::SharedIntentionExclusive => &mut inner.six_table_lock_set,
        LockMode::Exclusive => &mut inner.x_table_lock_set,
    }
}
