//! Delete executor.

use crate::access::tuple::{Rid, Tuple};
use crate::catalog::{Schema, TableInfo};
use crate::concurrency::transaction::{IndexWriteRecord, TableWriteRecord, WriteType};
use crate::execution::plan::PlanNode;
use crate::execution::{lock_table_intention_exclusive, Executor, ExecutorContext};
use crate::storage::page::INVALID_PAGE_ID;
use anyhow::{bail, Result};
use std::sync::Arc;

/// Drives a delete-intent child (which produces X-locked live rows), sets
/// the tombstone on each, records undo information, and removes the index
/// entries. Emits a single count tuple when drained.
pub struct DeleteExecutor {
    ctx: ExecutorContext,
    table: Arc<TableInfo>,
    child: Box<dyn Executor>,
    output_schema: Schema,
    done: bool,
}

impl DeleteExecutor {
    pub fn new(ctx: ExecutorContext, plan: PlanNode, child: Box<dyn Executor>) -> Result<Self> {
        let PlanNode::Delete {
            table_oid,
            output_schema,
            ..
        } = plan
        else {
            bail!("DeleteExecutor requires a Delete plan node");
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

impl Executor for DeleteExecutor {
    fn init(&mut self) -> Result<()> {
        lock_table_intention_exclusive(&self.ctx, self.table.oid)?;
        self.child.init()?;
        self.done = false;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        if self.done {
            return Ok(None);
        }
        let txn = &self.ctx.txn;
        let mut count = 0;

        while let Some((tuple, rid)) = self.child.next()? {
            let mut meta = self.table.heap.get_tuple_meta(rid)?;
            meta.is_deleted = true;
            meta.delete_txn = txn.id();
            self.table.heap.update_tuple_meta(rid, &meta)?;
            txn.append_table_write(TableWriteRecord {
                oid: self.table.oid,
                rid,
                write_type: WriteType::Delete,
                old_tuple: None,
            });

            for index in self.ctx.catalog.table_indexes(self.table.oid) {
                let key = index.key_from_tuple(&tuple)?;
                index.index.remove(&key)?;
                txn.append_index_write(IndexWriteRecord {
                    index_oid: index.oid,
                    table_oid: self.table.oid,
                    rid,
                    write_type: WriteType::Delete,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::tuple::TupleMeta;
    use crate::access::value::{DataType, Value};
    use crate::catalog::{Column, Schema};
    use crate::concurrency::lock_manager::LockMode;
    use crate::concurrency::transaction::IsolationLevel;
    use crate::database::{Database, Options};
    use crate::execution::create_executor;
    use crate::expression::{ComparisonOp, Expression};
    use tempfile::tempdir;

    fn users_schema() -> Schema {
        Schema::new(vec![
            Column::new("id", DataType::Int32),
            Column::new("name", DataType::Varchar),
        ])
    }

    fn setup() -> Result<Database> {
        let dir = tempdir()?;
        let db = Database::create(&dir.path().join("test.db"), Options::default())?;
        std::mem::forget(dir);
        let table = db.catalog().create_table("users", users_schema())?;
        let meta = TupleMeta::new(0);
        for i in 0..10 {
            let tuple = Tuple::from_values(&[
                Value::Int32(i),
                Value::String(format!("user-{}", i)),
            ]);
            table.heap.insert_tuple(&meta, &tuple)?;
        }
        db.catalog().create_index("users_by_id", "users", vec![0], 8, 8)?;
        Ok(db)
    }

    fn delete_plan(db: &Database, predicate: Option<Expression>) -> Result<PlanNode> {
        let table = db.catalog().table_by_name("users")?;
        Ok(PlanNode::Delete {
            table_oid: table.oid,
            child: Box::new(PlanNode::SeqScan {
                table_oid: table.oid,
                filter_predicate: predicate,
                output_schema: users_schema(),
            }),
            output_schema: PlanNode::count_schema(),
        })
    }

    #[test]
    fn test_delete_with_predicate() -> Result<()> {
        let db = setup()?;
        let txn = db.begin(IsolationLevel::RepeatableRead);
        let ctx = db.executor_context(Arc::clone(&txn));
        let table_oid = db.catalog().table_by_name("users")?.oid;

        let predicate = Expression::comparison(
            ComparisonOp::Lt,
            Expression::column(0),
            Expression::literal(Value::Int32(4)),
        );
        let mut executor = create_executor(&ctx, &delete_plan(&db, Some(predicate))?)?;
        executor.init()?;

        // The delete-intent scan escalates to IX + X row locks.
        let (count_tuple, _) = executor.next()?.expect("count tuple");
        assert_eq!(count_tuple.value_at(0)?, Value::Int32(4));
        assert!(txn.holds_table_lock(LockMode::IntentionExclusive, table_oid));
        db.commit(&txn)?;

        // Survivors: 4..10, and the index dropped the deleted keys.
        let table = db.catalog().table_by_name("users")?;
        let live = table
            .heap
            .iter()
            .filter(|e| matches!(e, Ok((_, meta, _)) if !meta.is_deleted))
            .count();
        assert_eq!(live, 6);

        let index = db.catalog().index_by_name("users_by_id")?;
        for id in 0..10 {
            let key = crate::access::btree::key::IndexKey::from_values(&[Value::Int32(id)])?;
            assert_eq!(index.index.get(&key)?.is_some(), id >= 4, "key {}", id);
        }
        Ok(())
    }

    #[test]
    fn test_aborted_delete_restores_rows() -> Result<()> {
        let db = setup()?;
        let txn = db.begin(IsolationLevel::RepeatableRead);
        let ctx = db.executor_context(Arc::clone(&txn));

        let mut executor = create_executor(&ctx, &delete_plan(&db, None)?)?;
        executor.init()?;
        let (count_tuple, _) = executor.next()?.expect("count tuple");
        assert_eq!(count_tuple.value_at(0)?, Value::Int32(10));
        db.abort(&txn)?;

        let table = db.catalog().table_by_name("users")?;
        let live = table
            .heap
            .iter()
            .filter(|e| matches!(e, Ok((_, meta, _)) if !meta.is_deleted))
            .count();
        assert_eq!(live, 10);

        let index = db.catalog().index_by_name("users_by_id")?;
        for id in 0..10 {
            let key = crate::access::btree::key::IndexKey::from_values(&[Value::Int32(id)])?;
            assert!(index.index.get(&key)?.is_some(), "key {}", id);
        }
        Ok(())
    }
}
