//! Limit executor.

use crate::access::tuple::{Rid, Tuple};
use crate::catalog::Schema;
use crate::execution::plan::PlanNode;
use crate::execution::Executor;
use anyhow::Result;

pub struct LimitExecutor {
    limit: usize,
    output_schema: Schema,
    child: Box<dyn Executor>,
    emitted: usize,
}

impl LimitExecutor {
    pub fn new(plan: PlanNode, child: Box<dyn Executor>) -> Self {
        let (limit, output_schema) = match plan {
            PlanNode::Limit {
                limit,
                output_schema,
                ..
            } => (limit, output_schema),
            _ => unreachable!("factory hands Limit nodes here"),
        };
        Self {
            limit,
            output_schema,
            child,
            emitted: 0,
        }
    }
}

impl Executor for LimitExecutor {
    fn init(&mut self) -> Result<()> {
        self.emitted = 0;
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        if self.emitted >= self.limit {
            return Ok(None);
        }
        match self.child.next()? {
            Some(out) => {
                self.emitted += 1;
                Ok(Some(out))
            }
            None => Ok(None),
        }
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
