//! Hash join executor (INNER and LEFT).

use crate::access::tuple::{Rid, Tuple};
use crate::access::value::Value;
use crate::catalog::Schema;
use crate::execution::plan::{JoinType, PlanNode};
use crate::execution::{concat_tuples, concat_with_nulls, Executor};
use crate::expression::Expression;
use crate::storage::page::INVALID_PAGE_ID;
use anyhow::Result;
use std::collections::{HashMap, VecDeque};

/// Builds an in-memory multimap over the right child keyed by the join
/// key, then streams the left child and emits the cartesian concatenation
/// of each probe hit. A LEFT join emits a null-padded row on a miss.
pub struct HashJoinExecutor {
    join_type: JoinType,
    left_key_expressions: Vec<Expression>,
    right_key_expressions: Vec<Expression>,
    output_schema: Schema,
    left: Box<dyn Executor>,
    right: Box<dyn Executor>,
    build_table: HashMap<Vec<Value>, Vec<Tuple>>,
    pending: VecDeque<Tuple>,
}

impl HashJoinExecutor {
    pub fn new(plan: PlanNode, left: Box<dyn Executor>, right: Box<dyn Executor>) -> Self {
        let (join_type, left_keys, right_keys, output_schema) = match plan {
            PlanNode::HashJoin {
                join_type,
                left_key_expressions,
                right_key_expressions,
                output_schema,
                ..
            } => (
                join_type,
                left_key_expressions,
                right_key_expressions,
                output_schema,
            ),
            _ => unreachable!("factory hands HashJoin nodes here"),
        };
        Self {
            join_type,
            left_key_expressions: left_keys,
            right_key_expressions: right_keys,
            output_schema,
            left,
            right,
            build_table: HashMap::new(),
            pending: VecDeque::new(),
        }
    }

    fn eval_keys(expressions: &[Expression], tuple: &Tuple) -> Result<Vec<Value>> {
        expressions.iter().map(|e| e.evaluate(tuple)).collect()
    }
}

impl Executor for HashJoinExecutor {
    fn init(&mut self) -> Result<()> {
        self.left.init()?;
        self.right.init()?;
        self.build_table.clear();
        self.pending.clear();

        // Build phase over the right child.
        while let Some((tuple, _)) = self.right.next()? {
            let key = Self::eval_keys(&self.right_key_expressions, &tuple)?;
            // NULL keys never match anything.
            if key.iter().any(Value::is_null) {
                continue;
            }
            self.build_table.entry(key).or_default().push(tuple);
        }
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        loop {
            if let Some(tuple) = self.pending.pop_front() {
                return Ok(Some((tuple, Rid::new(INVALID_PAGE_ID, 0))));
            }

            let Some((left_tuple, _)) = self.left.next()? else {
                return Ok(None);
            };
            let key = Self::eval_keys(&self.left_key_expressions, &left_tuple)?;
            let matches = if key.iter().any(Value::is_null) {
                None
            } else {
                self.build_table.get(&key)
            };

            match matches {
                Some(rights) => {
                    for right_tuple in rights {
                        self.pending.push_back(concat_tuples(&left_tuple, right_tuple)?);
                    }
                }
                None => {
                    if self.join_type == JoinType::Left {
                        let right_width = self.right.output_schema().len();
                        self.pending
                            .push_back(concat_with_nulls(&left_tuple, right_width)?);
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
    use crate::access::value::DataType;
    use crate::catalog::Column;
    use crate::concurrency::transaction::IsolationLevel;
    use crate::database::{Database, Options};
    use crate::execution::create_executor;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn setup() -> Result<Database> {
        let dir = tempdir()?;
        let db = Database::create(&dir.path().join("test.db"), Options::default())?;
        std::mem::forget(dir);

        let orders = db.catalog().create_table(
            "orders",
            Schema::new(vec![
                Column::new("id", DataType::Int32),
                Column::new("user_id", DataType::Int32),
            ]),
        )?;
        let users = db.catalog().create_table(
            "users",
            Schema::new(vec![
                Column::new("id", DataType::Int32),
                Column::new("name", DataType::Varchar),
            ]),
        )?;

        let meta = TupleMeta::new(0);
        for (id, user_id) in [(100, 1), (101, 1), (102, 2), (103, 7)] {
            orders.heap.insert_tuple(
                &meta,
                &Tuple::from_values(&[Value::Int32(id), Value::Int32(user_id)]),
            )?;
        }
        for (id, name) in [(1, "alice"), (2, "bob"), (3, "carol")] {
            users.heap.insert_tuple(
                &meta,
                &Tuple::from_values(&[Value::Int32(id), Value::String(name.to_string())]),
            )?;
        }
        Ok(db)
    }

    fn join_plan(db: &Database, join_type: JoinType) -> Result<PlanNode> {
        let orders = db.catalog().table_by_name("orders")?;
        let users = db.catalog().table_by_name("users")?;
        Ok(PlanNode::HashJoin {
            left: Box::new(PlanNode::SeqScan {
                table_oid: orders.oid,
                filter_predicate: None,
                output_schema: orders.schema.clone(),
            }),
            right: Box::new(PlanNode::SeqScan {
                table_oid: users.oid,
                filter_predicate: None,
                output_schema: users.schema.clone(),
            }),
            join_type,
            left_key_expressions: vec![Expression::column(1)],
            right_key_expressions: vec![Expression::column(0)],
            output_schema: Schema::new(vec![
                Column::new("order_id", DataType::Int32),
                Column::new("user_id", DataType::Int32),
                Column::new("uid", DataType::Int32),
                Column::new("name", DataType::Varchar),
            ]),
        })
    }

    #[test]
    fn test_inner_hash_join() -> Result<()> {
        let db = setup()?;
        let txn = db.begin(IsolationLevel::RepeatableRead);
        let ctx = db.executor_context(Arc::clone(&txn));

        let mut executor = create_executor(&ctx, &join_plan(&db, JoinType::Inner)?)?;
        executor.init()?;

        let mut rows = vec![];
        while let Some((tuple, _)) = executor.next()? {
            rows.push((tuple.value_at(0)?, tuple.value_at(3)?));
        }
        // Order 103 references a missing user and is dropped.
        assert_eq!(rows.len(), 3);
        assert!(rows.contains(&(Value::Int32(100), Value::String("alice".into()))));
        assert!(rows.contains(&(Value::Int32(101), Value::String("alice".into()))));
        assert!(rows.contains(&(Value::Int32(102), Value::String("bob".into()))));
        db.commit(&txn)?;
        Ok(())
    }

    #[test]
    fn test_left_hash_join_pads_misses() -> Result<()> {
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
        assert!(rows.contains(&(Value::Int32(103), Value::Null)));
        db.commit(&txn)?;
        Ok(())
    }
}
