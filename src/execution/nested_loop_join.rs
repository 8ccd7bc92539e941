//! Nested loop join executor (INNER and LEFT).

use crate::access::tuple::{Rid, Tuple};
use crate::catalog::Schema;
use crate::execution::plan::{JoinType, PlanNode};
use crate::execution::{concat_tuples, concat_with_nulls, Executor};
use crate::expression::Expression;
use crate::storage::page::INVALID_PAGE_ID;
use anyhow::Result;

/// For each left tuple, re-initializes and drains the right child, emitting
/// predicate matches; a LEFT join emits a null-padded row when no right
/// tuple matched.
pub struct NestedLoopJoinExecutor {
    join_type: JoinType,
    predicate: Option<Expression>,
    output_schema: Schema,
    left: Box<dyn Executor>,
    right: Box<dyn Executor>,
    left_tuple: Option<Tuple>,
    left_matched: bool,
}

impl NestedLoopJoinExecutor {
    pub fn new(plan: PlanNode, left: Box<dyn Executor>, right: Box<dyn Executor>) -> Self {
        let (join_type, predicate, output_schema) = match plan {
            PlanNode::NestedLoopJoin {
                join_type,
                predicate,
                output_schema,
                ..
            } => (join_type, predicate, output_schema),
            _ => unreachable!("factory hands NestedLoopJoin nodes here"),
        };
        Self {
            join_type,
            predicate,
            output_schema,
            left,
            right,
            left_tuple: None,
            left_matched: false,
        }
    }
}

impl Executor for NestedLoopJoinExecutor {
    fn init(&mut self) -> Result<()> {
        self.left.init()?;
        self.right.init()?;
        self.left_tuple = None;
        self.left_matched = false;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        loop {
            if self.left_tuple.is_none() {
                match self.left.next()? {
                    None => return Ok(None),
                    Some((tuple, _)) => {
                        self.left_tuple = Some(tuple);
                        self.left_matched = false;
                        self.right.init()?;
                    }
                }
            }
            let left_tuple = self
                .left_tuple
                .clone()
                .expect("left tuple present in this arm");

            match self.right.next()? {
                Some((right_tuple, _)) => {
                    let matches = match &self.predicate {
                        None => true,
                        Some(predicate) => predicate
                            .evaluate_join(&left_tuple, &right_tuple)?
                            .is_true(),
                    };
                    if matches {
                        self.left_matched = true;
                        let joined = concat_tuples(&left_tuple, &right_tuple)?;
                        return Ok(Some((joined, Rid::new(INVALID_PAGE_ID, 0))));
                    }
                }
                None => {
                    let emit_miss = self.join_type == JoinType::Left && !self.left_matched;
                    self.left_tuple = None;
                    if emit_miss {
                        let right_width = self.right.output_schema().len();
                        let padded = concat_with_nulls(&left_tuple, right_width)?;
                        return Ok(Some((padded, Rid::new(INVALID_PAGE_ID, 0))));
                    }
                }
            }
        }
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
    use crate::catalog::Column;
    use crate::concurrency::transaction::IsolationLevel;
    use crate::database::{Database, Options};
    use crate::execution::create_executor;
    use crate::expression::Expression;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn setup() -> Result<Database> {
        let dir = tempdir()?;
        let db = Database::create(&dir.path().join("test.db"), Options::default())?;
        std::mem::forget(dir);

        let users = db.catalog().create_table(
            "users",
            Schema::new(vec![
                Column::new("id", DataType::Int32),
                Column::new("dept", DataType::Int32),
            ]),
        )?;
        let depts = db.catalog().create_table(
            "depts",
            Schema::new(vec![
                Column::new("id", DataType::Int32),
                Column::new("name", DataType::Varchar),
            ]),
        )?;

        let meta = TupleMeta::new(0);
        for (id, dept) in [(1, 10), (2, 10), (3, 20), (4, 99)] {
            users.heap.insert_tuple(
                &meta,
                &Tuple::from_values(&[Value::Int32(id), Value::Int32(dept)]),
            )?;
        }
        for (id, name) in [(10, "eng"), (20, "ops")] {
            depts.heap.insert_tuple(
                &meta,
                &Tuple::from_values(&[Value::Int32(id), Value::String(name.to_string())]),
            )?;
        }
        Ok(db)
    }

    fn join_plan(db: &Database, join_type: JoinType) -> Result<PlanNode> {
        let users = db.catalog().table_by_name("users")?;
        let depts = db.catalog().table_by_name("depts")?;
        let joined_schema = Schema::new(vec![
            Column::new("id", DataType::Int32),
            Column::new("dept", DataType::Int32),
            Column::new("dept_id", DataType::Int32),
            Column::new("dept_name", DataType::Varchar),
        ]);
        Ok(PlanNode::NestedLoopJoin {
            left: Box::new(PlanNode::SeqScan {
                table_oid: users.oid,
                filter_predicate: None,
                output_schema: users.schema.clone(),
            }),
            right: Box::new(PlanNode::SeqScan {
                table_oid: depts.oid,
                filter_predicate: None,
                output_schema: depts.schema.clone(),
            }),
            join_type,
            predicate: Some(Expression::eq(
                Expression::join_column(0, 1),
                Expression::join_column(1, 0),
            )),
            output_schema: joined_schema,
        })
    }

    #[test]
    fn test_inner_join() -> Result<()> {
        let db = setup()?;
        let txn = db.begin(IsolationLevel::RepeatableRead);
        let ctx = db.executor_context(Arc::clone(&txn));

        let mut executor = create_executor(&ctx, &join_plan(&db, JoinType::Inner)?)?;
        executor.init()?;

        let mut rows = vec![];
        while let Some((tuple, _)) = executor.next()? {
            rows.push((tuple.value_at(0)?, tuple.value_at(3)?));
        }
        // User 4 has no department and is dropped.
        assert_eq!(rows.len(), 3);
        assert!(rows.contains(&(Value::Int32(1), Value::String("eng".into()))));
        assert!(rows.contains(&(Value::Int32(3), Value::String("ops".into()))));
        db.commit(&txn)?;
        Ok(())
    }

    #[test]
    fn test_left_join_pads_misses() -> Result<()> {
        let db = setup()?;
        let txn = db.begin(IsolationLevel::RepeatableRead);
        let ctx = db.executor_context(Arc::clone(&txn));

        let mut executor = create_executor(&ctx, &join_plan(&db, JoinType::Left)?)?;
        executor.init()?;

        let mut rows = vec![];
        while let Some((tuple, _)) = executor.next()? {
            rows.push((tuple.value_at(0)?, tuple.value_at(3)?));
        }
        assert_eq!(rows.len(), 4);
        assert!(rows.contains(&(Value::Int32(4), Value::Null)));
        db.commit(&txn)?;
        Ok(())
    }
}
