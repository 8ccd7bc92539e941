//! Top-N executor.
//!
//! Keeps a bounded max-heap of N rows ordered by the sort keys: the heap's
//! top is the worst row currently retained, so exceeding N pops it.
//! Emission restores ascending sort order.

use crate::access::tuple::{Rid, Tuple};
use crate::access::value::Value;
use crate::catalog::Schema;
use crate::execution::plan::{OrderDirection, PlanNode};
use crate::execution::sort::{compare_rows, eval_sort_keys};
use crate::execution::Executor;
use crate::expression::Expression;
use anyhow::Result;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;

struct HeapRow {
    keys: Vec<Value>,
    /// Insertion sequence breaks key ties so the heap order is total.
    seq: usize,
    tuple: Tuple,
    rid: Rid,
    order_bys: Arc<Vec<(OrderDirection, Expression)>>,
}

impl PartialEq for HeapRow {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapRow {}

impl PartialOrd for HeapRow {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapRow {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_rows(&self.keys, &other.keys, &self.order_bys).then(self.seq.cmp(&other.seq))
    }
}

pub struct TopNExecutor {
    order_bys: Arc<Vec<(OrderDirection, Expression)>>,
    n: usize,
    output_schema: Schema,
    child: Box<dyn Executor>,
    results: VecDeque<(Tuple, Rid)>,
}

impl TopNExecutor {
    pub fn new(plan: PlanNode, child: Box<dyn Executor>) -> Self {
        let (order_bys, n, output_schema) = match plan {
            PlanNode::TopN {
                order_bys,
                n,
                output_schema,
                ..
            } => (order_bys, n, output_schema),
            _ => unreachable!("factory hands TopN nodes here"),
        };
        Self {
            order_bys: Arc::new(order_bys),
            n,
            output_schema,
            child,
            results: VecDeque::new(),
        }
    }
}

impl Executor for TopNExecutor {
    fn init(&mut self) -> Result<()> {
        self.child.init()?;
        self.results.clear();
        if self.n == 0 {
            return Ok(());
        }

        let mut heap: BinaryHeap<HeapRow> = BinaryHeap::with_capacity(self.n + 1);
        let mut seq = 0;
        while let Some((tuple, rid)) = self.child.next()? {
            let keys = eval_sort_keys(&self.order_bys, &tuple)?;
            heap.push(HeapRow {
                keys,
                seq,
                tuple,
                rid,
                order_bys: Arc::clone(&self.order_bys),
            });
            seq += 1;
            if heap.len() > self.n {
                heap.pop();
            }
        }

        self.results = heap
            .into_sorted_vec()
            .into_iter()
            .map(|row| (row.tuple, row.rid))
            .collect();
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        Ok(self.results.pop_front())
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
    use tempfile::tempdir;

    fn schema() -> Schema {
        Schema::new(vec![Column::new("v", DataType::Int32)])
    }

    fn setup(values: &[i32]) -> Result<Database> {
        let dir = tempdir()?;
        let db = Database::create(&dir.path().join("test.db"), Options::default())?;
        std::mem::forget(dir);
        let table = db.catalog().create_table("t", schema())?;
        let meta = TupleMeta::new(0);
        for v in values {
            table
                .heap
                .insert_tuple(&meta, &Tuple::from_values(&[Value::Int32(*v)]))?;
        }
        Ok(db)
    }

    fn topn_plan(db: &Database, n: usize, direction: OrderDirection) -> Result<PlanNode> {
        let table = db.catalog().table_by_name("t")?;
        Ok(PlanNode::TopN {
            child: Box::new(PlanNode::SeqScan {
                table_oid: table.oid,
                filter_predicate: None,
                output_schema: schema(),
            }),
            order_bys: vec![(direction, Expression::column(0))],
            n,
            output_schema: schema(),
        })
    }

    fn run(db: &Database, plan: &PlanNode) -> Result<Vec<Value>> {
        let txn = db.begin(IsolationLevel::RepeatableRead);
        let ctx = db.executor_context(Arc::clone(&txn));
        let mut executor = create_executor(&ctx, plan)?;
        executor.init()?;
        let mut out = vec![];
        while let Some((tuple, _)) = executor.next()? {
            out.push(tuple.value_at(0)?);
        }
        db.commit(&txn)?;
        Ok(out)
    }

    #[test]
    fn test_topn_ascending() -> Result<()> {
        let db = setup(&[9, 3, 7, 1, 8, 2, 6])?;
        let plan = topn_plan(&db, 3, OrderDirection::Asc)?;
        assert_eq!(
            run(&db, &plan)?,
            vec![Value::Int32(1), Value::Int32(2), Value::Int32(3)]
        );
        Ok(())
    }

    #[test]
    fn test_topn_descending() -> Result<()> {
        let db = setup(&[9, 3, 7, 1, 8, 2, 6])?;
        let plan = topn_plan(&db, 2, OrderDirection::Desc)?;
        assert_eq!(run(&db, &plan)?, vec![Value::Int32(9), Value::Int32(8)]);
        Ok(())
    }

    #[test]
    fn test_topn_larger_than_input() -> Result<()> {
        let db = setup(&[2, 1])?;
        let plan = topn_plan(&db, 10, OrderDirection::Asc)?;
        assert_eq!(run(&db, &plan)?, vec![Value::Int32(1), Value::Int32(2)]);
        Ok(())
    }

    #[test]
    fn test_topn_zero() -> Result<()> {
        let db = setup(&[2, 1])?;
        let plan = topn_plan(&db, 0, OrderDirection::Asc)?;
        assert!(run(&db, &plan)?.is_empty());
        Ok(())
    }
}
