//! Sequential scan executor.

use crate::access::heap::TableIterator;
use crate::access::tuple::{Rid, Tuple};
use crate::catalog::{Schema, TableInfo};
use crate::execution::plan::PlanNode;
use crate::execution::{
    force_unlock_row, lock_row_for_scan, lock_table_for_scan, release_after_emit, Executor,
    ExecutorContext,
};
use crate::expression::Expression;
use anyhow::{bail, Result};
use std::sync::Arc;

/// Walks the table heap in RID order, skipping tombstones, applying the
/// pushed-down predicate, and taking row locks per the transaction's
/// isolation level. Under delete-intent the S row lock is replaced by X.
pub struct SeqScanExecutor {
    ctx: ExecutorContext,
    table: Arc<TableInfo>,
    filter_predicate: Option<Expression>,
    output_schema: Schema,
    iter: Option<TableIterator>,
}

impl SeqScanExecutor {
    pub fn new(ctx: ExecutorContext, plan: PlanNode) -> Result<Self> {
        let PlanNode::SeqScan {
            table_oid,
            filter_predicate,
            output_schema,
        } = plan
        else {
            bail!("SeqScanExecutor requires a SeqScan plan node");
        };
        let table = ctx.catalog.table(table_oid)?;
        Ok(Self {
            ctx,
            table,
            filter_predicate,
            output_schema,
            iter: None,
        })
    }
}

impl Executor for SeqScanExecutor {
    fn init(&mut self) -> Result<()> {
        lock_table_for_scan(&self.ctx, self.table.oid)?;
        self.iter = Some(self.table.heap.iter());
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        let iter = self
            .iter
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("executor not initialized"))?;

        loop {
            let Some(entry) = iter.next() else {
                return Ok(None);
            };
            let (rid, mut meta, mut tuple) = entry?;

            let locked = lock_row_for_scan(&self.ctx, self.table.oid, rid)?;
            if locked {
                // Re-read under the lock; the pre-lock copy may be stale.
                let (fresh_meta, fresh_tuple) = self.table.heap.get_tuple(rid)?;
                meta = fresh_meta;
                tuple = fresh_tuple;
            }

            if meta.is_deleted {
                if locked {
                    force_unlock_row(&self.ctx, self.table.oid, rid)?;
                }
                continue;
            }

            if let Some(predicate) = &self.filter_predicate {
                if !predicate.evaluate(&tuple)?.is_true() {
                    if locked {
                        force_unlock_row(&self.ctx, self.table.oid, rid)?;
                    }
                    continue;
                }
            }

            if locked {
                release_after_emit(&self.ctx, self.table.oid, rid)?;
            }
            return Ok(Some((tuple, rid)));
        }
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
