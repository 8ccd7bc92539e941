//! Volcano-style execution engine.
//!
//! Each executor exposes `init()` to reset state and `next()` to pull one
//! `(tuple, rid)` at a time. Scans cooperate with the lock manager per the
//! transaction's isolation level; write executors record undo information
//! on the transaction and maintain every secondary index.

pub mod aggregate;
pub mod delete;
pub mod filter;
pub mod hash_join;
pub mod index_scan;
pub mod insert;
pub mod limit;
pub mod nested_loop_join;
pub mod plan;
pub mod projection;
pub mod seq_scan;
pub mod sort;
pub mod topn;
pub mod update;
pub mod values;

use crate::access::tuple::{Rid, Tuple};
use crate::catalog::{Catalog, Schema, TableOid};
use crate::concurrency::lock_manager::{LockManager, LockMode};
use crate::concurrency::transaction::{IsolationLevel, Transaction};
use crate::concurrency::transaction_manager::TransactionManager;
use crate::storage::buffer::BufferPoolManager;
use anyhow::{bail, Result};
use plan::PlanNode;
use std::sync::Arc;

/// Trait for all query executors.
pub trait Executor: Send {
    /// Initialize the executor. Must be called before `next()`.
    fn init(&mut self) -> Result<()>;

    /// Produce the next tuple, or `None` when drained.
    fn next(&mut self) -> Result<Option<(Tuple, Rid)>>;

    /// Output schema of this executor.
    fn output_schema(&self) -> &Schema;
}

/// Shared resources for one executor tree.
#[derive(Clone)]
pub struct ExecutorContext {
    pub catalog: Arc<Catalog>,
    pub buffer_pool: BufferPoolManager,
    pub lock_manager: Arc<LockManager>,
    pub transaction_manager: Arc<TransactionManager>,
    pub txn: Arc<Transaction>,
    /// Scans under a delete/update executor escalate their locks: IX on
    /// the table and X on each produced row.
    pub is_delete: bool,
}

impl ExecutorContext {
    pub fn new(
        catalog: Arc<Catalog>,
        buffer_pool: BufferPoolManager,
        lock_manager: Arc<LockManager>,
        transaction_manager: Arc<TransactionManager>,
        txn: Arc<Transaction>,
    ) -> Self {
        Self {
            catalog,
            buffer_pool,
            lock_manager,
            transaction_manager,
            txn,
            is_delete: false,
        }
    }

    fn with_delete_intent(&self) -> Self {
        let mut ctx = self.clone();
        ctx.is_delete = true;
        ctx
    }
}

/// Build the executor tree for a plan.
pub fn create_executor(ctx: &ExecutorContext, plan: &PlanNode) -> Result<Box<dyn Executor>> {
    Ok(match plan {
        PlanNode::SeqScan { .. } => Box::new(seq_scan::SeqScanExecutor::new(ctx.clone(), plan.clone())?),
        PlanNode::IndexScan { .. } => {
            Box::new(index_scan::IndexScanExecutor::new(ctx.clone(), plan.clone())?)
        }
        PlanNode::Insert { child, .. } => {
            let child_exec = create_executor(ctx, child)?;
            Box::new(insert::InsertExecutor::new(ctx.clone(), plan.clone(), child_exec)?)
        }
        PlanNode::Delete { child, .. } => {
            let delete_ctx = ctx.with_delete_intent();
            let child_exec = create_executor(&delete_ctx, child)?;
            Box::new(delete::DeleteExecutor::new(ctx.clone(), plan.clone(), child_exec)?)
        }
        PlanNode::Update { child, .. } => {
            let update_ctx = ctx.with_delete_intent();
            let child_exec = create_executor(&update_ctx, child)?;
            Box::new(update::UpdateExecutor::new(ctx.clone(), plan.clone(), child_exec)?)
        }
        PlanNode::NestedLoopJoin { left, right, .. } => {
            let left_exec = create_executor(ctx, left)?;
            let right_exec = create_executor(ctx, right)?;
            Box::new(nested_loop_join::NestedLoopJoinExecutor::new(
                plan.clone(),
                left_exec,
                right_exec,
            ))
        }
        PlanNode::HashJoin { left, right, .. } => {
            let left_exec = create_executor(ctx, left)?;
            let right_exec = create_executor(ctx, right)?;
            Box::new(hash_join::HashJoinExecutor::new(plan.clone(), left_exec, right_exec))
        }
        PlanNode::Aggregation { child, .. } => {
            let child_exec = create_executor(ctx, child)?;
            Box::new(aggregate::AggregationExecutor::new(plan.clone(), child_exec))
        }
        PlanNode::Filter { child, .. } => {
            let child_exec = create_executor(ctx, child)?;
            Box::new(filter::FilterExecutor::new(plan.clone(), child_exec))
        }
        PlanNode::Sort { child, .. } => {
            let child_exec = create_executor(ctx, child)?;
            Box::new(sort::SortExecutor::new(plan.clone(), child_exec))
        }
        PlanNode::Limit { child, .. } => {
            let child_exec = create_executor(ctx, child)?;
            Box::new(limit::LimitExecutor::new(plan.clone(), child_exec))
        }
        PlanNode::TopN { child, .. } => {
            let child_exec = create_executor(ctx, child)?;
            Box::new(topn::TopNExecutor::new(plan.clone(), child_exec))
        }
        PlanNode::Projection { child, .. } => {
            let child_exec = create_executor(ctx, child)?;
            Box::new(projection::ProjectionExecutor::new(plan.clone(), child_exec))
        }
        PlanNode::Values { .. } => Box::new(values::ValuesExecutor::new(plan.clone())),
    })
}

/// Run an executor tree to completion and collect its output.
pub fn execute_to_vec(ctx: &ExecutorContext, plan: &PlanNode) -> Result<Vec<Tuple>> {
    let mut executor = create_executor(ctx, plan)?;
    executor.init()?;
    let mut out = Vec::new();
    while let Some((tuple, _)) = executor.next()? {
        out.push(tuple);
    }
    Ok(out)
}

/// Table-level lock acquisition for scans: IS for plain reads (skipped if
/// any table lock is already held, and skipped entirely under READ
/// UNCOMMITTED), IX when the scan feeds a delete or update.
pub(crate) fn lock_table_for_scan(ctx: &ExecutorContext, oid: TableOid) -> Result<()> {
    let txn = &ctx.txn;
    if ctx.is_delete {
        return lock_table_intention_exclusive(ctx, oid);
    }

    if txn.isolation_level() == IsolationLevel::ReadUncommitted {
        return Ok(());
    }
    if txn.table_lock_mode(oid).is_none()
        && !ctx
            .lock_manager
            .lock_table(txn, LockMode::IntentionShared, oid)?
    {
        bail!("transaction {} aborted while locking table {}", txn.id(), oid);
    }
    Ok(())
}

/// IX acquisition for write executors (and for scans feeding them).
/// Skipped when an equal or stronger table lock is already held.
pub(crate) fn lock_table_intention_exclusive(ctx: &ExecutorContext, oid: TableOid) -> Result<()> {
    let txn = &ctx.txn;
    let sufficient = matches!(
        txn.table_lock_mode(oid),
        Some(LockMode::IntentionExclusive)
            | Some(LockMode::SharedIntentionExclusive)
            | Some(LockMode::Exclusive)
    );
    if !sufficient
        && !ctx
            .lock_manager
            .lock_table(txn, LockMode::IntentionExclusive, oid)?
    {
        bail!("transaction {} aborted while locking table {}", txn.id(), oid);
    }
    Ok(())
}

/// Row-level lock acquisition for scans. Returns whether a lock was taken
/// by this call (so a filtered-out tuple can be force-unlocked).
pub(crate) fn lock_row_for_scan(ctx: &ExecutorContext, oid: TableOid, rid: Rid) -> Result<bool> {
    let txn = &ctx.txn;
    if ctx.is_delete {
        if txn.holds_row_lock(LockMode::Exclusive, oid, rid) {
            return Ok(false);
        }
        if !ctx.lock_manager.lock_row(txn, LockMode::Exclusive, oid, rid)? {
            bail!("transaction {} aborted while locking row {}", txn.id(), rid);
        }
        return Ok(true);
    }

    if txn.isolation_level() == IsolationLevel::ReadUncommitted {
        return Ok(false);
    }
    // A held X lock (row or table) already covers the read.
    if txn.holds_row_lock(LockMode::Exclusive, oid, rid)
        || txn.holds_table_lock(LockMode::Exclusive, oid)
        || txn.holds_row_lock(LockMode::Shared, oid, rid)
    {
        return Ok(false);
    }
    if !ctx.lock_manager.lock_row(txn, LockMode::Shared, oid, rid)? {
        bail!("transaction {} aborted while locking row {}", txn.id(), rid);
    }
    Ok(true)
}

/// Release the visibility lock on a row the scan is not going to emit.
pub(crate) fn force_unlock_row(ctx: &ExecutorContext, oid: TableOid, rid: Rid) -> Result<()> {
    ctx.lock_manager.unlock_row(&ctx.txn, oid, rid, true)?;
    Ok(())
}

/// Under READ COMMITTED a plain scan drops its S row lock as soon as the
/// tuple has been emitted upward.
pub(crate) fn release_after_emit(ctx: &ExecutorContext, oid: TableOid, rid: Rid) -> Result<()> {
    if !ctx.is_delete && ctx.txn.isolation_level() == IsolationLevel::ReadCommitted {
        ctx.lock_manager.unlock_row(&ctx.txn, oid, rid, false)?;
    }
    Ok(())
}

/// Concatenate two tuples into one joined row.
pub(crate) fn concat_tuples(left: &Tuple, right: &Tuple) -> Result<Tuple> {
    let mut values = left.values()?;
    values.extend(right.values()?);
    Ok(Tuple::from_values(&values))
}

/// Left tuple padded with NULLs on the right (LEFT join miss).
pub(crate) fn concat_with_nulls(left: &Tuple, right_width: usize) -> Result<Tuple> {
    let mut values = left.values()?;
    values.extend(std::iter::repeat(crate::access::value::Value::Null).take(right_width));
    Ok(Tuple::from_values(&values))
}
