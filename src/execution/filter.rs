//! Filter executor.

use crate::access::tuple::{Rid, Tuple};
use crate::catalog::Schema;
use crate::execution::plan::PlanNode;
use crate::execution::Executor;
use crate::expression::Expression;
use anyhow::Result;

pub struct FilterExecutor {
    predicate: Expression,
    output_schema: Schema,
    child: Box<dyn Executor>,
}

impl FilterExecutor {
    pub fn new(plan: PlanNode, child: Box<dyn Executor>) -> Self {
        let (predicate, output_schema) = match plan {
            PlanNode::Filter {
                predicate,
                output_schema,
                ..
            } => (predicate, output_schema),
            _ => unreachable!("factory hands Filter nodes here"),
        };
        Self {
            predicate,
            output_schema,
            child,
        }
    }
}

impl Executor for FilterExecutor {
    fn init(&mut self) -> Result<()> {
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        while let Some((tuple, rid)) = self.child.next()? {
            if self.predicate.evaluate(&tuple)?.is_true() {
                return Ok(Some((tuple, rid)));
            }
        }
        Ok(None)
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
