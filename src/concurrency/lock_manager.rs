//! Hierarchical strict two-phase lock manager.
//!
//! Tables take any of the five multi-granularity modes; rows take only S
//! or X and require the matching table intention lock. Every resource has
//! a FIFO request queue with its own mutex and condition variable. Waiters
//! re-check both grantability and their own abort flag on every wakeup.
//!
//! A background detector rebuilds the wait-for graph on a fixed interval
//! and aborts the youngest member of any cycle it finds.

use crate::access::tuple::Rid;
use crate::catalog::TableOid;
use crate::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionError, TransactionState, TxnId,
};
use crate::concurrency::transaction_manager::TxnRegistry;
use dashmap::DashMap;
use log::{debug, trace};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Lock modes, table-level unless noted. Rows take only `Shared` and
/// `Exclusive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    IntentionShared,
    IntentionExclusive,
    Shared,
    SharedIntentionExclusive,
    Exclusive,
}

impl LockMode {
    /// Multi-granularity compatibility matrix.
    pub fn compatible_with(self, other: LockMode) -> bool {
        use LockMode::*;
        match (self, other) {
            (IntentionShared, Exclusive) | (Exclusive, IntentionShared) => false,
            (IntentionShared, _) | (_, IntentionShared) => true,
            (IntentionExclusive, IntentionExclusive) => true,
            (Shared, Shared) => true,
            _ => false,
        }
    }

    /// Upgrade lattice: IS -> {IX, S, SIX, X}; S -> {SIX, X};
    /// IX -> {SIX, X}; SIX -> {X}.
    pub fn can_upgrade_to(self, other: LockMode) -> bool {
        use LockMode::*;
        match (self, other) {
            (IntentionShared, IntentionExclusive)
            | (IntentionShared, Shared)
            | (IntentionShared, SharedIntentionExclusive)
            | (IntentionShared, Exclusive)
            | (Shared, SharedIntentionExclusive)
            | (Shared, Exclusive)
            | (IntentionExclusive, SharedIntentionExclusive)
            | (IntentionExclusive, Exclusive)
            | (SharedIntentionExclusive, Exclusive) => true,
            _ => false,
        }
    }

    pub fn is_intention(self) -> bool {
        matches!(
            self,
            LockMode::IntentionShared
                | LockMode::IntentionExclusive
                | LockMode::SharedIntentionExclusive
        )
    }
}

#[derive(Debug, Clone, Copy)]
struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

#[derive(Debug, Default)]
struct QueueInner {
    requests: VecDeque<LockRequest>,
    /// At most one transaction may be mid-upgrade on a resource.
    upgrading: Option<TxnId>,
}

#[derive(Debug, Default)]
struct LockRequestQueue {
    inner: Mutex<QueueInner>,
    cv: Condvar,
}

pub struct LockManager {
    table_lock_map: DashMap<TableOid, Arc<LockRequestQueue>>,
    row_lock_map: DashMap<(TableOid, Rid), Arc<LockRequestQueue>>,
    registry: TxnRegistry,
    enable_cycle_detection: Arc<AtomicBool>,
    detector: Mutex<Option<JoinHandle<()>>>,
}

impl LockManager {
    pub fn new(registry: TxnRegistry) -> Self {
        Self {
            table_lock_map: DashMap::new(),
            row_lock_map: DashMap::new(),
            registry,
            enable_cycle_detection: Arc::new(AtomicBool::new(false)),
            detector: Mutex::new(None),
        }
    }

    /// Acquire a table lock. `Ok(false)` means the transaction was aborted
    /// while waiting; an `Err` is a protocol violation that has already
    /// marked the transaction aborted.
    pub fn lock_table(
        &self,
        txn: &Transaction,
        mode: LockMode,
        oid: TableOid,
    ) -> Result<bool, TransactionError> {
        self.check_isolation_preconditions(txn, mode)?;
        let queue = self.table_queue(oid);
        self.acquire(txn, mode, &queue, |txn| txn.insert_table_lock(mode, oid), |txn, old| {
            txn.remove_table_lock(old, oid)
        })
    }

    pub fn unlock_table(&self, txn: &Transaction, oid: TableOid) -> Result<bool, TransactionError> {
        let queue = self.table_queue(oid);
        let mode = {
            let q = queue.inner.lock().unwrap();
            let Some(request) = q
                .requests
                .iter()
                .find(|r| r.txn_id == txn.id() && r.granted)
            else {
                return Err(self.abort_with(txn, TransactionError::AttemptedUnlockButNoLockHeld(txn.id())));
            };
            request.mode
        };
        if txn.holds_any_row_lock_on(oid) {
            return Err(self.abort_with(
                txn,
                TransactionError::TableUnlockedBeforeUnlockingRows(txn.id()),
            ));
        }

        {
            let mut q = queue.inner.lock().unwrap();
            q.requests.retain(|r| !(r.txn_id == txn.id() && r.granted));
        }
        queue.cv.notify_all();

        self.transition_on_unlock(txn, mode);
        txn.remove_table_lock(mode, oid);
        trace!("txn {} released table {:?} lock on {}", txn.id(), mode, oid);
        Ok(true)
    }

    /// Acquire a row lock. Rows take only S or X and require the matching
    /// table-level lock to be held already.
    pub fn lock_row(
        &self,
        txn: &Transaction,
        mode: LockMode,
        oid: TableOid,
        rid: Rid,
    ) -> Result<bool, TransactionError> {
        if mode.is_intention() {
            return Err(self.abort_with(txn, TransactionError::AttemptedIntentionLockOnRow(txn.id())));
        }
        self.check_isolation_preconditions(txn, mode)?;
        self.check_row_table_precondition(txn, mode, oid)?;

        let queue = self.row_queue(oid, rid);
        self.acquire(
            txn,
            mode,
            &queue,
            |txn| txn.insert_row_lock(mode, oid, rid),
            |txn, old| txn.remove_row_lock(old, oid, rid),
        )
    }

    /// Release a row lock. `force` skips the S2PL state transition; the
    /// executors use it to drop visibility locks on filtered-out tuples.
    pub fn unlock_row(
        &self,
        txn: &Transaction,
        oid: TableOid,
        rid: Rid,
        force: bool,
    ) -> Result<bool, TransactionError> {
        let queue = self.row_queue(oid, rid);
        let mode = {
            let mut q = queue.inner.lock().unwrap();
            let Some(pos) = q
                .requests
                .iter()
                .position(|r| r.txn_id == txn.id() && r.granted)
            else {
                return Err(self.abort_with(txn, TransactionError::AttemptedUnlockButNoLockHeld(txn.id())));
            };
            let mode = q.requests[pos].mode;
            q.requests.remove(pos);
            mode
        };
        queue.cv.notify_all();

        if !force {
            self.transition_on_unlock(txn, mode);
        }
        txn.remove_row_lock(mode, oid, rid);
        Ok(true)
    }

    /// Drop every lock a finished transaction still holds. Used by the
    /// transaction manager after the state is already Committed/Aborted, so
    /// no phase transition applies.
    pub fn release_all(&self, txn: &Transaction) {
        let (rows, tables) = txn.take_all_locks();
        for (_, oid, rid) in rows {
            if let Some(queue) = self.row_lock_map.get(&(oid, rid)).map(|e| Arc::clone(&e)) {
                let mut q = queue.inner.lock().unwrap();
                q.requests.retain(|r| r.txn_id != txn.id());
                if q.upgrading == Some(txn.id()) {
                    q.upgrading = None;
                }
                drop(q);
                queue.cv.notify_all();
            }
        }
        for (_, oid) in tables {
            if let Some(queue) = self.table_lock_map.get(&oid).map(|e| Arc::clone(&e)) {
                let mut q = queue.inner.lock().unwrap();
                q.requests.retain(|r| r.txn_id != txn.id());
                if q.upgrading == Some(txn.id()) {
                    q.upgrading = None;
                }
                drop(q);
                queue.cv.notify_all();
            }
        }
    }

    /// Start the background deadlock detector.
    pub fn start_deadlock_detection(self: &Arc<Self>, interval: Duration) {
        self.enable_cycle_detection.store(true, Ordering::SeqCst);
        let manager = Arc::clone(self);
        let enabled = Arc::clone(&self.enable_cycle_detection);
        let handle = std::thread::spawn(move || {
            while enabled.load(Ordering::SeqCst) {
                std::thread::sleep(interval);
                if !enabled.load(Ordering::SeqCst) {
                    break;
                }
                manager.run_cycle_detection();
            }
        });
        *self.detector.lock().unwrap() = Some(handle);
    }

    /// Stop and join the detector thread.
    pub fn stop_deadlock_detection(&self) {
        self.enable_cycle_detection.store(false, Ordering::SeqCst);
        if let Some(handle) = self.detector.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// One detection round: abort the youngest member of every cycle until
    /// the wait-for graph is acyclic.
    pub fn run_cycle_detection(&self) {
        loop {
            let edges = self.build_wait_for_graph();
            let Some(cycle) = find_cycle(&edges) else {
                return;
            };
            let victim = *cycle.iter().max().expect("cycle is non-empty");
            debug!("deadlock cycle {:?}, aborting txn {}", cycle, victim);
            if let Some(txn) = self.registry.get(&victim) {
                txn.set_state(TransactionState::Aborted);
            }
            self.notify_all_queues();
        }
    }

    fn build_wait_for_graph(&self) -> BTreeMap<TxnId, BTreeSet<TxnId>> {
        let mut edges: BTreeMap<TxnId, BTreeSet<TxnId>> = BTreeMap::new();
        let mut queues: Vec<Arc<LockRequestQueue>> = Vec::new();
        for entry in self.table_lock_map.iter() {
            queues.push(Arc::clone(entry.value()));
        }
        for entry in self.row_lock_map.iter() {
            queues.push(Arc::clone(entry.value()));
        }

        for queue in queues {
            let q = queue.inner.lock().unwrap();
            for waiter in q.requests.iter().filter(|r| !r.granted) {
                if self.txn_state(waiter.txn_id) == Some(TransactionState::Aborted) {
                    continue;
                }
                for holder in q.requests.iter().filter(|r| r.granted) {
                    if holder.txn_id == waiter.txn_id {
                        continue;
                    }
                    if self.txn_state(holder.txn_id) == Some(TransactionState::Aborted) {
                        continue;
                    }
                    edges
                        .entry(waiter.txn_id)
                        .or_default()
                        .insert(holder.txn_id);
                }
            }
        }
        edges
    }

    fn txn_state(&self, txn_id: TxnId) -> Option<TransactionState> {
        self.registry.get(&txn_id).map(|t| t.state())
    }

    fn notify_all_queues(&self) {
        for entry in self.table_lock_map.iter() {
            entry.value().cv.notify_all();
        }
        for entry in self.row_lock_map.iter() {
            entry.value().cv.notify_all();
        }
    }

    fn table_queue(&self, oid: TableOid) -> Arc<LockRequestQueue> {
        Arc::clone(
            &self
                .table_lock_map
                .entry(oid)
                .or_insert_with(|| Arc::new(LockRequestQueue::default())),
        )
    }

    fn row_queue(&self, oid: TableOid, rid: Rid) -> Arc<LockRequestQueue> {
        Arc::clone(
            &self
                .row_lock_map
                .entry((oid, rid))
                .or_insert_with(|| Arc::new(LockRequestQueue::default())),
        )
    }

    /// Shared acquisition path for tables and rows. `insert_lock` and
    /// `remove_lock` update the transaction's bookkeeping sets.
    fn acquire(
        &self,
        txn: &Transaction,
        mode: LockMode,
        queue: &Arc<LockRequestQueue>,
        insert_lock: impl Fn(&Transaction),
        remove_lock: impl Fn(&Transaction, LockMode),
    ) -> Result<bool, TransactionError> {
        let mut q = queue.inner.lock().unwrap();

        if let Some(pos) = q.requests.iter().position(|r| r.txn_id == txn.id()) {
            let existing = q.requests[pos];
            if existing.mode == mode {
                return Ok(true);
            }
            if q.upgrading.is_some() {
                drop(q);
                return Err(self.abort_with(txn, TransactionError::UpgradeConflict(txn.id())));
            }
            if !existing.mode.can_upgrade_to(mode) {
                drop(q);
                return Err(self.abort_with(txn, TransactionError::IncompatibleUpgrade(txn.id())));
            }
            q.requests.remove(pos);
            remove_lock(txn, existing.mode);
            q.upgrading = Some(txn.id());
            trace!(
                "txn {} upgrading {:?} -> {:?}",
                txn.id(),
                existing.mode,
                mode
            );
        }

        q.requests.push_back(LockRequest {
            txn_id: txn.id(),
            mode,
            granted: false,
        });

        loop {
            if txn.is_aborted() {
                q.requests
                    .retain(|r| !(r.txn_id == txn.id() && !r.granted));
                if q.upgrading == Some(txn.id()) {
                    q.upgrading = None;
                }
                drop(q);
                queue.cv.notify_all();
                return Ok(false);
            }

            if grant_allowed(&q, txn.id(), mode) {
                let request = q
                    .requests
                    .iter_mut()
                    .find(|r| r.txn_id == txn.id())
                    .expect("request enqueued above");
                request.granted = true;
                if q.upgrading == Some(txn.id()) {
                    q.upgrading = None;
                }
                insert_lock(txn);
                drop(q);
                // Compatible peers may be grantable now as well.
                queue.cv.notify_all();
                return Ok(true);
            }

            q = queue.cv.wait(q).unwrap();
        }
    }

    fn check_isolation_preconditions(
        &self,
        txn: &Transaction,
        mode: LockMode,
    ) -> Result<(), TransactionError> {
        let state = txn.state();
        match txn.isolation_level() {
            IsolationLevel::RepeatableRead => {
                if state == TransactionState::Shrinking {
                    return Err(self.abort_with(txn, TransactionError::LockOnShrinking(txn.id())));
                }
            }
            IsolationLevel::ReadCommitted => {
                if state == TransactionState::Shrinking
                    && !matches!(mode, LockMode::Shared | LockMode::IntentionShared)
                {
                    return Err(self.abort_with(txn, TransactionError::LockOnShrinking(txn.id())));
                }
            }
            IsolationLevel::ReadUncommitted => {
                if matches!(
                    mode,
                    LockMode::Shared
                        | LockMode::IntentionShared
                        | LockMode::SharedIntentionExclusive
                ) {
                    return Err(self.abort_with(
                        txn,
                        TransactionError::LockSharedOnReadUncommitted(txn.id()),
                    ));
                }
                if state == TransactionState::Shrinking {
                    return Err(self.abort_with(txn, TransactionError::LockOnShrinking(txn.id())));
                }
            }
        }
        Ok(())
    }

    /// An X row needs IX/SIX/X on the table; an S row accepts any table
    /// lock.
    fn check_row_table_precondition(
        &self,
        txn: &Transaction,
        mode: LockMode,
        oid: TableOid,
    ) -> Result<(), TransactionError> {
        let ok = match mode {
            LockMode::Exclusive => {
                txn.holds_table_lock(LockMode::IntentionExclusive, oid)
                    || txn.holds_table_lock(LockMode::SharedIntentionExclusive, oid)
                    || txn.holds_table_lock(LockMode::Exclusive, oid)
            }
            LockMode::Shared => txn.table_lock_mode(oid).is_some(),
            _ => unreachable!("intention modes rejected earlier"),
        };
        if ok {
            Ok(())
        } else {
            Err(self.abort_with(txn, TransactionError::TableLockNotPresent(txn.id())))
        }
    }

    /// S2PL: releasing X (any level), or S under REPEATABLE READ, moves a
    /// growing transaction into its shrinking phase.
    fn transition_on_unlock(&self, txn: &Transaction, mode: LockMode) {
        if txn.state() != TransactionState::Growing {
            return;
        }
        let shrink = match mode {
            LockMode::Exclusive => true,
            LockMode::Shared => txn.isolation_level() == IsolationLevel::RepeatableRead,
            _ => false,
        };
        if shrink {
            txn.set_state(TransactionState::Shrinking);
        }
    }

    fn abort_with(&self, txn: &Transaction, err: TransactionError) -> TransactionError {
        txn.set_state(TransactionState::Aborted);
        err
    }
}

/// FIFO grant policy. A request is grantable when it is compatible with
/// every granted request, the upgrade slot is free or its own, and no
/// earlier waiter that is itself grantable would be overtaken by an
/// incompatible mode. Waiters blocked by current holders do not bar a
/// compatible latecomer from co-granting.
fn grant_allowed(q: &QueueInner, txn_id: TxnId, mode: LockMode) -> bool {
    let compatible_with_granted = |candidate_txn: TxnId, candidate_mode: LockMode| {
        q.requests.iter().all(|g| {
            !g.granted || g.txn_id == candidate_txn || g.mode.compatible_with(candidate_mode)
        })
    };

    if !compatible_with_granted(txn_id, mode) {
        return false;
    }

    if let Some(upgrading) = q.upgrading {
        return upgrading == txn_id;
    }

    for r in q.requests.iter() {
        if r.txn_id == txn_id {
            break;
        }
        if r.granted {
            continue;
        }
        if compatible_with_granted(r.txn_id, r.mode) && !r.mode.compatible_with(mode) {
            return false;
        }
    }
    true
}

/// Deterministic cycle search: DFS from every node in ascending txn id
/// order over sorted adjacency sets. Returns the members of the first
/// cycle found.
fn find_cycle(edges: &BTreeMap<TxnId, BTreeSet<TxnId>>) -> Option<Vec<TxnId>> {
    fn dfs(
        node: TxnId,
        edges: &BTreeMap<TxnId, BTreeSet<TxnId>>,
        on_stack: &mut Vec<TxnId>,
        done: &mut BTreeSet<TxnId>,
    ) -> Option<Vec<TxnId>> {
        on_stack.push(node);
        if let Some(nexts) = edges.get(&node) {
            for &next in nexts {
                if let Some(at) = on_stack.iter().position(|&n| n == next) {
                    return Some(on_stack[at..].to_vec());
                }
                if done.contains(&next) {
                    continue;
                }
                if let Some(cycle) = dfs(next, edges, on_stack, done) {
                    return Some(cycle);
                }
            }
        }
        on_stack.pop();
        done.insert(node);
        None
    }

    let mut done = BTreeSet::new();
    for &start in edges.keys() {
        if done.contains(&start) {
            continue;
        }
        let mut on_stack = Vec::new();
        if let Some(cycle) = dfs(start, edges, &mut on_stack, &mut done) {
            return Some(cycle);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::transaction_manager::new_txn_registry;
    use std::thread;

    fn setup() -> (Arc<LockManager>, TxnRegistry) {
        // Run with RUST_LOG=trace to see grant/wait/victim decisions.
        let _ = env_logger::builder().is_test(true).try_init();
        let registry = new_txn_registry();
        (Arc::new(LockManager::new(Arc::clone(&registry))), registry)
    }

    fn make_txn(registry: &TxnRegistry, id: TxnId, level: IsolationLevel) -> Arc<Transaction> {
        let txn = Arc::new(Transaction::new(id, level));
        registry.insert(id, Arc::clone(&txn));
        txn
    }

    #[test]
    fn test_compatibility_matrix() {
        use LockMode::*;
        let modes = [
            IntentionShared,
            IntentionExclusive,
            Shared,
            SharedIntentionExclusive,
            Exclusive,
        ];
        let expected = [
            [true, true, true, true, false],
            [true, true, false, false, false],
            [true, false, true, false, false],
            [true, false, false, false, false],
            [false, false, false, false, false],
        ];
        for (i, held) in modes.iter().enumerate() {
            for (j, requested) in modes.iter().enumerate() {
                assert_eq!(
                    held.compatible_with(*requested),
                    expected[i][j],
                    "{:?} vs {:?}",
                    held,
                    requested
                );
            }
        }
    }

    #[test]
    fn test_basic_table_lock_unlock() {
        let (lm, registry) = setup();
        let txn = make_txn(&registry, 1, IsolationLevel::RepeatableRead);

        assert!(lm.lock_table(&txn, LockMode::Shared, 1).unwrap());
        assert!(txn.holds_table_lock(LockMode::Shared, 1));

        assert!(lm.unlock_table(&txn, 1).unwrap());
        assert!(!txn.holds_table_lock(LockMode::Shared, 1));
        // Unlocking S under RR enters the shrinking phase.
        assert_eq!(txn.state(), TransactionState::Shrinking);
    }

    #[test]
    fn test_shared_co_grant_with_waiting_exclusive() {
        let (lm, registry) = setup();
        let txn_a = make_txn(&registry, 1, IsolationLevel::RepeatableRead);
        let txn_b = make_txn(&registry, 2, IsolationLevel::RepeatableRead);
        let txn_c = make_txn(&registry, 3, IsolationLevel::RepeatableRead);

        // A holds S; B's X waits; C's S is granted alongside A.
        assert!(lm.lock_table(&txn_a, LockMode::Shared, 1).unwrap());

        let lm_b = Arc::clone(&lm);
        let txn_b2 = Arc::clone(&txn_b);
        let b_handle = thread::spawn(move || lm_b.lock_table(&txn_b2, LockMode::Exclusive, 1));

        // Give B time to enqueue.
        thread::sleep(Duration::from_millis(50));
        assert!(lm.lock_table(&txn_c, LockMode::Shared, 1).unwrap());
        assert!(txn_c.holds_table_lock(LockMode::Shared, 1));

        // C finishes, then A unlocks; B is granted alone.
        assert!(lm.unlock_table(&txn_c, 1).unwrap());
        assert!(lm.unlock_table(&txn_a, 1).unwrap());
        assert!(b_handle.join().unwrap().unwrap());
        assert!(txn_b.holds_table_lock(LockMode::Exclusive, 1));
    }

    #[test]
    fn test_fifo_between_grantable_waiters() {
        let (lm, registry) = setup();
        let txn_a = make_txn(&registry, 1, IsolationLevel::RepeatableRead);
        let txn_b = make_txn(&registry, 2, IsolationLevel::RepeatableRead);
        let txn_c = make_txn(&registry, 3, IsolationLevel::RepeatableRead);

        assert!(lm.lock_table(&txn_a, LockMode::Exclusive, 1).unwrap());

        let lm_b = Arc::clone(&lm);
        let txn_b2 = Arc::clone(&txn_b);
        let b_handle = thread::spawn(move || {
            let ok = lm_b.lock_table(&txn_b2, LockMode::Exclusive, 1).unwrap();
            (ok, std::time::Instant::now())
        });
        thread::sleep(Duration::from_millis(50));
        let lm_c = Arc::clone(&lm);
        let txn_c2 = Arc::clone(&txn_c);
        let c_handle = thread::spawn(move || {
            let ok = lm_c.lock_table(&txn_c2, LockMode::Exclusive, 1).unwrap();
            (ok, std::time::Instant::now())
        });
        thread::sleep(Duration::from_millis(50));

        lm.unlock_table(&txn_a, 1).unwrap();
        thread::sleep(Duration::from_millis(50));
        // B went first; C is still waiting behind it.
        assert!(txn_b.holds_table_lock(LockMode::Exclusive, 1));
        assert!(!txn_c.holds_table_lock(LockMode::Exclusive, 1));

        lm.unlock_table(&txn_b, 1).unwrap();
        let (b_ok, b_at) = b_handle.join().unwrap();
        let (c_ok, c_at) = c_handle.join().unwrap();
        assert!(b_ok && c_ok);
        assert!(b_at <= c_at);
    }

    #[test]
    fn test_upgrade_is_to_ix_then_x() {
        let (lm, registry) = setup();
        let txn = make_txn(&registry, 1, IsolationLevel::RepeatableRead);

        assert!(lm.lock_table(&txn, LockMode::IntentionShared, 1).unwrap());
        assert!(lm.lock_table(&txn, LockMode::IntentionExclusive, 1).unwrap());
        assert!(!txn.holds_table_lock(LockMode::IntentionShared, 1));
        assert!(txn.holds_table_lock(LockMode::IntentionExclusive, 1));

        assert!(lm.lock_table(&txn, LockMode::Exclusive, 1).unwrap());
        assert!(txn.holds_table_lock(LockMode::Exclusive, 1));
    }

    #[test]
    fn test_incompatible_upgrade_aborts() {
        let (lm, registry) = setup();
        let txn = make_txn(&registry, 1, IsolationLevel::RepeatableRead);

        assert!(lm.lock_table(&txn, LockMode::Exclusive, 1).unwrap());
        let err = lm.lock_table(&txn, LockMode::Shared, 1).unwrap_err();
        assert_eq!(err, TransactionError::IncompatibleUpgrade(1));
        assert!(txn.is_aborted());
    }

    #[test]
    fn test_same_mode_relock_is_noop() {
        let (lm, registry) = setup();
        let txn = make_txn(&registry, 1, IsolationLevel::RepeatableRead);

        assert!(lm.lock_table(&txn, LockMode::Shared, 1).unwrap());
        assert!(lm.lock_table(&txn, LockMode::Shared, 1).unwrap());
        assert!(lm.unlock_table(&txn, 1).unwrap());
    }

    #[test]
    fn test_row_lock_requires_table_lock() {
        let (lm, registry) = setup();
        let txn = make_txn(&registry, 1, IsolationLevel::RepeatableRead);
        let rid = Rid::new(crate::storage::page::PageId(0), 0);

        let err = lm
            .lock_row(&txn, LockMode::Exclusive, 1, rid)
            .unwrap_err();
        assert_eq!(err, TransactionError::TableLockNotPresent(1));
        assert!(txn.is_aborted());
    }

    #[test]
    fn test_row_rejects_intention_modes() {
        let (lm, registry) = setup();
        let txn = make_txn(&registry, 1, IsolationLevel::RepeatableRead);
        let rid = Rid::new(crate::storage::page::PageId(0), 0);

        let err = lm
            .lock_row(&txn, LockMode::IntentionShared, 1, rid)
            .unwrap_err();
        assert_eq!(err, TransactionError::AttemptedIntentionLockOnRow(1));
    }

    #[test]
    fn test_table_unlock_blocked_by_row_locks() {
        let (lm, registry) = setup();
        let txn = make_txn(&registry, 1, IsolationLevel::RepeatableRead);
        let rid = Rid::new(crate::storage::page::PageId(0), 0);

        assert!(lm.lock_table(&txn, LockMode::IntentionExclusive, 1).unwrap());
        assert!(lm.lock_row(&txn, LockMode::Exclusive, 1, rid).unwrap());

        let err = lm.unlock_table(&txn, 1).unwrap_err();
        assert_eq!(err, TransactionError::TableUnlockedBeforeUnlockingRows(1));
    }

    #[test]
    fn test_lock_on_shrinking_aborts() {
        let (lm, registry) = setup();
        let txn = make_txn(&registry, 1, IsolationLevel::RepeatableRead);

        assert!(lm.lock_table(&txn, LockMode::Shared, 1).unwrap());
        assert!(lm.unlock_table(&txn, 1).unwrap());
        assert_eq!(txn.state(), TransactionState::Shrinking);

        let err = lm.lock_table(&txn, LockMode::Shared, 2).unwrap_err();
        assert_eq!(err, TransactionError::LockOnShrinking(1));
    }

    #[test]
    fn test_read_uncommitted_rejects_shared() {
        let (lm, registry) = setup();
        let txn = make_txn(&registry, 1, IsolationLevel::ReadUncommitted);

        let err = lm.lock_table(&txn, LockMode::Shared, 1).unwrap_err();
        assert_eq!(err, TransactionError::LockSharedOnReadUncommitted(1));
    }

    #[test]
    fn test_read_committed_allows_shared_while_shrinking() {
        let (lm, registry) = setup();
        let txn = make_txn(&registry, 1, IsolationLevel::ReadCommitted);

        assert!(lm.lock_table(&txn, LockMode::Exclusive, 1).unwrap());
        assert!(lm.unlock_table(&txn, 1).unwrap());
        assert_eq!(txn.state(), TransactionState::Shrinking);

        assert!(lm.lock_table(&txn, LockMode::IntentionShared, 2).unwrap());
        assert!(lm.lock_table(&txn, LockMode::Shared, 3).unwrap());
    }

    #[test]
    fn test_exclusive_is_exclusive() {
        let (lm, registry) = setup();
        let txn_a = make_txn(&registry, 1, IsolationLevel::RepeatableRead);
        let txn_b = make_txn(&registry, 2, IsolationLevel::RepeatableRead);

        assert!(lm.lock_table(&txn_a, LockMode::Exclusive, 1).unwrap());

        let lm_b = Arc::clone(&lm);
        let txn_b2 = Arc::clone(&txn_b);
        let handle = thread::spawn(move || lm_b.lock_table(&txn_b2, LockMode::Exclusive, 1));
        thread::sleep(Duration::from_millis(50));
        // B must still be waiting.
        assert!(!txn_b.holds_table_lock(LockMode::Exclusive, 1));

        lm.unlock_table(&txn_a, 1).unwrap();
        assert!(handle.join().unwrap().unwrap());
    }

    #[test]
    fn test_deadlock_detection_aborts_youngest() {
        let (lm, registry) = setup();
        let txn1 = make_txn(&registry, 1, IsolationLevel::RepeatableRead);
        let txn2 = make_txn(&registry, 2, IsolationLevel::RepeatableRead);
        let r1 = Rid::new(crate::storage::page::PageId(0), 1);
        let r2 = Rid::new(crate::storage::page::PageId(0), 2);

        assert!(lm.lock_table(&txn1, LockMode::IntentionExclusive, 1).unwrap());
        assert!(lm.lock_table(&txn2, LockMode::IntentionExclusive, 1).unwrap());
        assert!(lm.lock_row(&txn1, LockMode::Exclusive, 1, r1).unwrap());
        assert!(lm.lock_row(&txn2, LockMode::Exclusive, 1, r2).unwrap());

        lm.start_deadlock_detection(Duration::from_millis(30));

        let lm_1 = Arc::clone(&lm);
        let txn1_2 = Arc::clone(&txn1);
        let h1 = thread::spawn(move || lm_1.lock_row(&txn1_2, LockMode::Exclusive, 1, r2));
        let lm_2 = Arc::clone(&lm);
        let txn2_2 = Arc::clone(&txn2);
        let h2 = thread::spawn(move || lm_2.lock_row(&txn2_2, LockMode::Exclusive, 1, r1));

        // The youngest (largest id) cycle member aborts and unblocks with
        // failure; its cleanup releases the locks the survivor needs.
        let got2 = h2.join().unwrap().unwrap();
        assert!(!got2);
        assert!(txn2.is_aborted());
        lm.release_all(&txn2);

        let got1 = h1.join().unwrap().unwrap();
        lm.stop_deadlock_detection();
        assert!(got1);
        assert!(!txn1.is_aborted());
    }

    #[test]
    fn test_find_cycle() {
        let mut edges: BTreeMap<TxnId, BTreeSet<TxnId>> = BTreeMap::new();
        edges.entry(1).or_default().insert(2);
        edges.entry(2).or_default().insert(3);
        assert!(find_cycle(&edges).is_none());

        edges.entry(3).or_default().insert(1);
        let cycle = find_cycle(&edges).unwrap();
        let mut members = cycle.clone();
        members.sort_unstable();
        assert_eq!(members, vec![1, 2, 3]);
    }

    #[test]
    fn test_release_all_unblocks_waiters() {
        let (lm, registry) = setup();
        let txn_a = make_txn(&registry, 1, IsolationLevel::RepeatableRead);
        let txn_b = make_txn(&registry, 2, IsolationLevel::RepeatableRead);

        assert!(lm.lock_table(&txn_a, LockMode::Exclusive, 1).unwrap());

        let lm_b = Arc::clone(&lm);
        let txn_b2 = Arc::clone(&txn_b);
        let handle = thread::spawn(move || lm_b.lock_table(&txn_b2, LockMode::Exclusive, 1));
        thread::sleep(Duration::from_millis(50));

        txn_a.set_state(TransactionState::Committed);
        lm.release_all(&txn_a);
        assert!(handle.join().unwrap().unwrap());
    }
}
