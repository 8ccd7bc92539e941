//! Values executor: a constant row source.

use crate::access::tuple::{Rid, Tuple};
use crate::access::value::Value;
use crate::catalog::Schema;
use crate::execution::plan::PlanNode;
use crate::execution::Executor;
use crate::expression::Expression;
use crate::storage::page::INVALID_PAGE_ID;
use anyhow::Result;

pub struct ValuesExecutor {
    rows: Vec<Vec<Expression>>,
    output_schema: Schema,
    cursor: usize,
}

impl ValuesExecutor {
    pub fn new(plan: PlanNode) -> Self {
        let (rows, output_schema) = match plan {
            PlanNode::Values {
                rows,
                output_schema,
            } => (rows, output_schema),
            _ => unreachable!("factory hands Values nodes here"),
        };
        Self {
            rows,
            output_schema,
            cursor: 0,
        }
    }
}

impl Executor for ValuesExecutor {
    fn init(&mut self) -> Result<()> {
        self.cursor = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        let Some(row) = self.rows.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;
        let values = row
            .iter()
            .map(|expr| expr.evaluate_constant())
            .collect::<Result<Vec<Value>>>()?;
        Ok(Some((
            Tuple::from_values(&values),
            Rid::new(INVALID_PAGE_ID, 0),
        )))
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
