//! Index scan executor.
//!
//! Two modes. A point lookup ("single strike") resolves one RID through
//! the index and emits at most one live tuple. A range scan positions the
//! index iterator at the lower bound and streams forward, applying the
//! residual predicate. Row locking follows the same rules as the
//! sequential scan.

use crate::access::btree::iterator::BPlusTreeIterator;
use crate::access::btree::key::IndexKey;
use crate::access::tuple::{Rid, Tuple, TupleMeta};
use crate::catalog::{IndexInfo, Schema, TableInfo};
use crate::execution::plan::PlanNode;
use crate::execution::{
    force_unlock_row, lock_row_for_scan, lock_table_for_scan, release_after_emit, Executor,
    ExecutorContext,
};
use crate::expression::Expression;
use anyhow::{bail, Result};
use std::sync::Arc;

pub struct IndexScanExecutor {
    ctx: ExecutorContext,
    table: Arc<TableInfo>,
    index: Arc<IndexInfo>,
    point_key: Option<IndexKey>,
    begin_key: Option<IndexKey>,
    filter_predicate: Option<Expression>,
    output_schema: Schema,
    iter: Option<BPlusTreeIterator>,
    point_done: bool,
}

impl IndexScanExecutor {
    pub fn new(ctx: ExecutorContext, plan: PlanNode) -> Result<Self> {
        let PlanNode::IndexScan {
            index_oid,
            table_oid,
            point_key,
            begin_key,
            filter_predicate,
            output_schema,
        } = plan
        else {
            bail!("IndexScanExecutor requires an IndexScan plan node");
        };
        let table = ctx.catalog.table(table_oid)?;
        let index = ctx.catalog.index(index_oid)?;
        if index.table_oid != table_oid {
            bail!("index {} does not belong to table {}", index_oid, table_oid);
        }
        let point_key = point_key.map(|values| IndexKey::from_values(&values)).transpose()?;
        let begin_key = begin_key.map(|values| IndexKey::from_values(&values)).transpose()?;
        Ok(Self {
            ctx,
            table,
            index,
            point_key,
            begin_key,
            filter_predicate,
            output_schema,
            iter: None,
            point_done: false,
        })
    }

    /// Lock, fetch, and filter one candidate row. `Ok(None)` means the row
    /// is not visible or fails the predicate.
    fn probe(&self, rid: Rid) -> Result<Option<(Tuple, Rid)>> {
        let locked = lock_row_for_scan(&self.ctx, self.table.oid, rid)?;
        let (meta, tuple): (TupleMeta, Tuple) = self.table.heap.get_tuple(rid)?;

        if meta.is_deleted {
            if locked {
                force_unlock_row(&self.ctx, self.table.oid, rid)?;
            }
            return Ok(None);
        }
        if let Some(predicate) = &self.filter_predicate {
            if !predicate.evaluate(&tuple)?.is_true() {
                if locked {
                    force_unlock_row(&self.ctx, self.table.oid, rid)?;
                }
                return Ok(None);
            }
        }
        if locked {
            release_after_emit(&self.ctx, self.table.oid, rid)?;
        }
        Ok(Some((tuple, rid)))
    }
}

impl Executor for IndexScanExecutor {
    fn init(&mut self) -> Result<()> {
        lock_table_for_scan(&self.ctx, self.table.oid)?;
        self.point_done = false;
        if self.point_key.is_none() {
            self.iter = Some(match &self.begin_key {
                Some(key) => self.index.index.iter_from(key)?,
                None => self.index.index.iter()?,
            });
        }
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        if let Some(key) = self.point_key {
            if self.point_done {
                return Ok(None);
            }
            self.point_done = true;
            let Some(rid) = self.index.index.get(&key)? else {
                return Ok(None);
            };
            return self.probe(rid);
        }

        loop {
            let iter = self
                .iter
                .as_mut()
                .ok_or_else(|| anyhow::anyhow!("executor not initialized"))?;
            let Some(entry) = iter.next() else {
                return Ok(None);
            };
            let (_, rid) = entry?;
            if let Some(out) = self.probe(rid)? {
                return Ok(Some(out));
            }
        }
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
