//! Sort executor: materializes the child, then stable-sorts.

use crate::access::tuple::{Rid, Tuple};
use crate::access::value::Value;
use crate::catalog::Schema;
use crate::execution::plan::{OrderDirection, PlanNode};
use crate::execution::Executor;
use crate::expression::Expression;
use anyhow::Result;
use std::cmp::Ordering;
use std::collections::VecDeque;

/// Lexicographic comparison of precomputed sort keys, honoring per-key
/// direction. Stable sorting supplies the final tie-break.
pub(crate) fn compare_rows(a: &[Value], b: &[Value], order_bys: &[(OrderDirection, Expression)]) -> Ordering {
    for (i, (direction, _)) in order_bys.iter().enumerate() {
        let ordering = a[i].compare(&b[i]).unwrap_or(Ordering::Equal);
        let ordering = match direction {
            OrderDirection::Asc => ordering,
            OrderDirection::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

pub(crate) fn eval_sort_keys(
    order_bys: &[(OrderDirection, Expression)],
    tuple: &Tuple,
) -> Result<Vec<Value>> {
    order_bys
        .iter()
        .map(|(_, expr)| expr.evaluate(tuple))
        .collect()
}

pub struct SortExecutor {
    order_bys: Vec<(OrderDirection, Expression)>,
    output_schema: Schema,
    child: Box<dyn Executor>,
    sorted: VecDeque<(Tuple, Rid)>,
}

impl SortExecutor {
    pub fn new(plan: PlanNode, child: Box<dyn Executor>) -> Self {
        let (order_bys, output_schema) = match plan {
            PlanNode::Sort {
                order_bys,
                output_schema,
                ..
            } => (order_bys, output_schema),
            _ => unreachable!("factory hands Sort nodes here"),
        };
        Self {
            order_bys,
            output_schema,
            child,
            sorted: VecDeque::new(),
        }
    }
}

impl Executor for SortExecutor {
    fn init(&mut self) -> Result<()> {
        self.child.init()?;
        self.sorted.clear();

        let mut rows: Vec<(Vec<Value>, Tuple, Rid)> = Vec::new();
        while let Some((tuple, rid)) = self.child.next()? {
            let keys = eval_sort_keys(&self.order_bys, &tuple)?;
            rows.push((keys, tuple, rid));
        }
        rows.sort_by(|(a, _, _), (b, _, _)| compare_rows(a, b, &self.order_bys));
        self.sorted = rows.into_iter().map(|(_, tuple, rid)| (tuple, rid)).collect();
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        Ok(self.sorted.pop_front())
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
