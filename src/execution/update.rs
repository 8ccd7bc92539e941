//! Update executor.

use crate::access::tuple::{Rid, Tuple};
use crate::access::value::Value;
use crate::catalog::{Schema, TableInfo};
use crate::concurrency::transaction::{IndexWriteRecord, TableWriteRecord, WriteType};
use crate::execution::plan::PlanNode;
use crate::execution::{lock_table_intention_exclusive, Executor, ExecutorContext};
use crate::expression::Expression;
use crate::storage::page::INVALID_PAGE_ID;
use anyhow::{bail, Result};
use std::sync::Arc;

/// Overwrites each produced row in place (RIDs stay stable), capturing the
/// pre-image in the undo log and refreshing every secondary index with a
/// delete-then-insert pair.
pub struct UpdateExecutor {
    ctx: ExecutorContext,
    table: Arc<TableInfo>,
    child: Box<dyn Executor>,
    target_expressions: Vec<Expression>,
    output_schema: Schema,
    done: bool,
}

impl UpdateExecutor {
    pub fn new(ctx: ExecutorContext, plan: PlanNode, child: Box<dyn Executor>) -> Result<Self> {
        let PlanNode::Update {
            table_oid,
            target_expressions,
            output_schema,
            ..
        } = plan
        else {
            bail!("UpdateExecutor requires an Update plan node");
        };
        let table = ctx.catalog.table(table_oid)?;
        if target_expressions.len() != table.schema.len() {
            bail!(
                "update needs one expression per column ({} != {})",
                target_expressions.len(),
                table.schema.len()
            );
        }
        Ok(Self {
            ctx,
            table,
            child,
            target_expressions,
            output_schema,
            done: false,
        })
    }
}

impl Executor for UpdateExecutor {
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

        while let Some((old_tuple, rid)) = self.child.next()? {
            let new_values = self
                .target_expressions
                .iter()
                .map(|expr| expr.evaluate(&old_tuple))
                .collect::<Result<Vec<Value>>>()?;
            let new_tuple = Tuple::from_values(&new_values);

            self.table.heap.update_tuple_in_place(rid, &new_tuple)?;
            txn.append_table_write(TableWriteRecord {
                oid: self.table.oid,
                rid,
                write_type: WriteType::Update,
                old_tuple: Some(old_tuple.clone()),
            });

            for index in self.ctx.catalog.table_indexes(self.table.oid) {
                let old_key = index.key_from_tuple(&old_tuple)?;
                let new_key = index.key_from_tuple(&new_tuple)?;
                index.index.remove(&old_key)?;
                index.index.insert(&new_key, rid)?;
                txn.append_index_write(IndexWriteRecord {
                    index_oid: index.oid,
                    table_oid: self.table.oid,
                    rid,
                    write_type: WriteType::Update,
                    key: new_key,
                    old_key: Some(old_key),
                });
            }
            count += 1;
        }

        self.done = true;
        Ok(Some((
            Tuple::from_values(&[Value::Int32(count)]),
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
    use crate::access::value::DataType;
    use crate::catalog::{Column, Schema};
    use crate::concurrency::transaction::IsolationLevel;
    use crate::database::{Database, Options};
    use crate::execution::create_executor;
    use crate::expression::{ArithmeticOp, ComparisonOp};
    use tempfile::tempdir;

    fn counters_schema() -> Schema {
        Schema::new(vec![
            Column::new("id", DataType::Int32),
            Column::new("value", DataType::Int32),
        ])
    }

    fn setup() -> Result<Database> {
        let dir = tempdir()?;
        let db = Database::create(&dir.path().join("test.db"), Options::default())?;
        std::mem::forget(dir);
        let table = db.catalog().create_table("counters", counters_schema())?;
        let meta = TupleMeta::new(0);
        for i in 0..5 {
            let tuple = Tuple::from_values(&[Value::Int32(i), Value::Int32(i * 10)]);
            table.heap.insert_tuple(&meta, &tuple)?;
        }
        db.catalog()
            .create_index("counters_by_value", "counters", vec![1], 8, 8)?;
        Ok(db)
    }

    fn bump_plan(db: &Database, predicate: Option<Expression>) -> Result<PlanNode> {
        let table = db.catalog().table_by_name("counters")?;
        Ok(PlanNode::Update {
            table_oid: table.oid,
            child: Box::new(PlanNode::SeqScan {
                table_oid: table.oid,
                filter_predicate: predicate,
                output_schema: counters_schema(),
            }),
            // SET value = value + 1
            target_expressions: vec![
                Expression::column(0),
                Expression::arithmetic(
                    ArithmeticOp::Add,
                    Expression::column(1),
                    Expression::literal(Value::Int32(1)),
                ),
            ],
            output_schema: PlanNode::count_schema(),
        })
    }

    #[test]
    fn test_update_in_place_and_index_maintenance() -> Result<()> {
        let db = setup()?;
        let txn = db.begin(IsolationLevel::RepeatableRead);
        let ctx = db.executor_context(Arc::clone(&txn));

        let predicate = Expression::comparison(
            ComparisonOp::Eq,
            Expression::column(0),
            Expression::literal(Value::Int32(2)),
        );
        let mut executor = create_executor(&ctx, &bump_plan(&db, Some(predicate))?)?;
        executor.init()?;
        let (count_tuple, _) = executor.next()?.expect("count tuple");
        assert_eq!(count_tuple.value_at(0)?, Value::Int32(1));
        db.commit(&txn)?;

        // The RID is stable and the row now reads 21.
        let table = db.catalog().table_by_name("counters")?;
        let mut found = false;
        for entry in table.heap.iter() {
            let (_, meta, tuple) = entry?;
            if !meta.is_deleted && tuple.value_at(0)? == Value::Int32(2) {
                assert_eq!(tuple.value_at(1)?, Value::Int32(21));
                found = true;
            }
        }
        assert!(found);

        // Index: delete-then-insert moved 20 -> 21.
        let index = db.catalog().index_by_name("counters_by_value")?;
        let old_key = crate::access::btree::key::IndexKey::from_values(&[Value::Int32(20)])?;
        let new_key = crate::access::btree::key::IndexKey::from_values(&[Value::Int32(21)])?;
        assert!(index.index.get(&old_key)?.is_none());
        assert!(index.index.get(&new_key)?.is_some());
        Ok(())
    }

    #[test]
    fn test_aborted_update_restores_pre_image() -> Result<()> {
        let db = setup()?;
        let txn = db.begin(IsolationLevel::RepeatableRead);
        let ctx = db.executor_context(Arc::clone(&txn));

        let mut executor = create_executor(&ctx, &bump_plan(&db, None)?)?;
        executor.init()?;
        let (count_tuple, _) = executor.next()?.expect("count tuple");
        assert_eq!(count_tuple.value_at(0)?, Value::Int32(5));
        db.abort(&txn)?;

        let table = db.catalog().table_by_name("counters")?;
        for entry in table.heap.iter() {
            let (_, _, tuple) = entry?;
            let Value::Int32(id) = tuple.value_at(0)? else {
                panic!("id must be an int")
            };
            assert_eq!(tuple.value_at(1)?, Value::Int32(id * 10));
        }

        let index = db.catalog().index_by_name("counters_by_value")?;
        for i in 0..5 {
            let key = crate::access::btree::key::IndexKey::from_values(&[Value::Int32(i * 10)])?;
            assert!(index.index.get(&key)?.is_some(), "value {}", i * 10);
        }
        Ok(())
    }
}
