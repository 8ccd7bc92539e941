//! Projection executor.

use crate::access::tuple::{Rid, Tuple};
use crate::access::value::Value;
use crate::catalog::Schema;
use crate::execution::plan::PlanNode;
use crate::execution::Executor;
use crate::expression::Expression;
use anyhow::Result;

pub struct ProjectionExecutor {
    expressions: Vec<Expression>,
    output_schema: Schema,
    child: Box<dyn Executor>,
}

impl ProjectionExecutor {
    pub fn new(plan: PlanNode, child: Box<dyn Executor>) -> Self {
        let (expressions, output_schema) = match plan {
            PlanNode::Projection {
                expressions,
                output_schema,
                ..
            } => (expressions, output_schema),
            _ => unreachable!("factory hands Projection nodes here"),
        };
        Self {
            expressions,
            output_schema,
            child,
        }
    }
}

impl Executor for ProjectionExecutor {
    fn init(&mut self) -> Result<()> {
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        let Some((tuple, rid)) = self.child.next()? else {
            return Ok(None);
        };
        let values = self
            .expressions
            .iter()
            .map(|expr| expr.evaluate(&tuple))
            .collect::<Result<Vec<Value>>>()?;
        Ok(Some((Tuple::from_values(&values), rid)))
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
