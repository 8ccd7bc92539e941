//! Insert executor.

use crate::access::tuple::{Rid, Tuple, TupleMeta};
use crate::catalog::{Schema, TableInfo};
use crate::concurrency::lock_manager::LockMode;
use crate::concurrency::transaction::{IndexWriteRecord, TableWriteRecord, WriteType};
use crate::execution::plan::PlanNode;
use crate::execution::{lock_table_intention_exclusive, Executor, ExecutorContext};
use anyhow::{bail, Result};
use crate::storage::page::INVALID_PAGE_ID;
use std::sync::Arc;

/// Drains the child, appends each tuple to the table heap under an X row
/// lock, records undo information, and maintains every secondary index.
/// Emits a single count tuple when done.
pub struct InsertExecutor {
    ctx: ExecutorContext,
    table: Arc<TableInfo>,
    child: Box<dyn Executor>,
    output_schema: Schema,
    done: bool,
}

impl InsertExecutor {
    pub fn new(ctx: ExecutorContext, plan: PlanNode, child: Box<dyn Executor>) -> Result<Self> {
        let PlanNode::Insert {
            table_oid,
            output_schema,
            ..
        } = plan
        else {
            bail!("InsertExecutor requires an Insert plan node");
        };
        let table = ctx.catalog.table(table_oid)?;
        Ok(Self {
            ctx,
            table,
            child,
            output_schema,
            done: false,
        })
    }
}

impl Executor for InsertExecutor {
    fn init(&mut self) -> Result<()> {
        self.child.init()?;
        lock_table_intention_exclusive(&self.ctx, self.table.oid)?;
        self.done = false;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        if self.done {
            return Ok(None);
        }
        let txn = &self.ctx.txn;
        let mut count = 0;

        while let Some((tuple, _)) = self.child.next()? {
            let meta = TupleMeta::new(txn.id());
            let rid = self.table.heap.insert_tuple(&meta, &tuple)?;
            if !self
                .ctx
                .lock_manager
                .lock_row(txn, LockMode::Exclusive, self.table.oid, rid)?
            {
                bail!("transaction {} aborted while locking row {}", txn.id(), rid);
            }
            txn.append_table_write(TableWriteRecord {
                oid: self.table.oid,
                rid,
                write_type: WriteType::Insert,
                old_tuple: None,
            });

            for index in self.ctx.catalog.table_indexes(self.table.oid) {
                let key = index.key_from_tuple(&tuple)?;
                index.index.insert(&key, rid)?;
                txn.append_index_write(IndexWriteRecord {
                    index_oid: index.oid,
                    table_oid: self.table.oid,
                    rid,
                    write_type: WriteType::Insert,
                    key,
                    old_key: None,
                });
            }
            count += 1;
        }

        self.done = true;
        Ok(Some((
            Tuple::from_values(&[crate::access::value::Value::Int32(count)]),
            Rid::new(INVALID_PAGE_ID, 0),
        )))
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
