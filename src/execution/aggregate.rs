//! Hash aggregation executor.
//!
//! Groups the child's output by the group-by expressions and folds each
//! aggregate accumulator in one pass. With no group-bys and an empty
//! input, a single row of initial values is emitted (0 for COUNT(*), NULL
//! elsewhere); with group-bys and an empty input, nothing is.

use crate::access::tuple::{Rid, Tuple};
use crate::access::value::Value;
use crate::catalog::Schema;
use crate::execution::plan::{AggregationType, PlanNode};
use crate::execution::Executor;
use crate::expression::Expression;
use crate::storage::page::INVALID_PAGE_ID;
use anyhow::{bail, Result};
use std::collections::{HashMap, VecDeque};

pub struct AggregationExecutor {
    group_bys: Vec<Expression>,
    aggregates: Vec<(AggregationType, Option<Expression>)>,
    output_schema: Schema,
    child: Box<dyn Executor>,
    results: VecDeque<Tuple>,
}

impl AggregationExecutor {
    pub fn new(plan: PlanNode, child: Box<dyn Executor>) -> Self {
        let (group_bys, aggregates, output_schema) = match plan {
            PlanNode::Aggregation {
                group_bys,
                aggregates,
                output_schema,
                ..
            } => (group_bys, aggregates, output_schema),
            _ => unreachable!("factory hands Aggregation nodes here"),
        };
        Self {
            group_bys,
            aggregates,
            output_schema,
            child,
            results: VecDeque::new(),
        }
    }

    fn initial_accumulators(&self) -> Vec<Value> {
        self.aggregates
            .iter()
            .map(|(agg_type, _)| match agg_type {
                AggregationType::CountStar => Value::Int32(0),
                _ => Value::Null,
            })
            .collect()
    }

    fn fold(agg_type: AggregationType, accumulator: &mut Value, input: &Value) -> Result<()> {
        match agg_type {
            AggregationType::CountStar => {
                let Value::Int32(n) = accumulator else {
                    bail!("COUNT(*) accumulator must be an integer");
                };
                *n += 1;
            }
            AggregationType::Count => {
                if !input.is_null() {
                    match accumulator {
                        Value::Null => *accumulator = Value::Int32(1),
                        Value::Int32(n) => *n += 1,
                        _ => bail!("COUNT accumulator must be an integer"),
                    }
                }
            }
            AggregationType::Sum => {
                if let Value::Int32(v) = input {
                    match accumulator {
                        Value::Null => *accumulator = Value::Int32(*v),
                        Value::Int32(sum) => *sum += v,
                        _ => bail!("SUM accumulator must be an integer"),
                    }
                }
            }
            AggregationType::Min => {
                if !input.is_null() {
                    let replace = match accumulator.compare(input) {
                        None => accumulator.is_null(),
                        Some(ordering) => ordering == std::cmp::Ordering::Greater,
                    };
                    if accumulator.is_null() || replace {
                        *accumulator = input.clone();
                    }
                }
            }
            AggregationType::Max => {
                if !input.is_null() {
                    let replace = match accumulator.compare(input) {
                        None => accumulator.is_null(),
                        Some(ordering) => ordering == std::cmp::Ordering::Less,
                    };
                    if accumulator.is_null() || replace {
                        *accumulator = input.clone();
                    }
                }
            }
        }
        Ok(())
    }
}

impl Executor for AggregationExecutor {
    fn init(&mut self) -> Result<()> {
        self.child.init()?;
        self.results.clear();

        let mut groups: HashMap<Vec<Value>, Vec<Value>> = HashMap::new();
        let mut saw_input = false;

        while let Some((tuple, _)) = self.child.next()? {
            saw_input = true;
            let key = self
                .group_bys
                .iter()
                .map(|e| e.evaluate(&tuple))
                .collect::<Result<Vec<Value>>>()?;
            let accumulators = groups
                .entry(key)
                .or_insert_with(|| self.initial_accumulators());

            for ((agg_type, expr), accumulator) in
                self.aggregates.iter().zip(accumulators.iter_mut())
            {
                let input = match expr {
                    Some(expr) => expr.evaluate(&tuple)?,
                    None => Value::Null,
                };
                Self::fold(*agg_type, accumulator, &input)?;
            }
        }

        if !saw_input && self.group_bys.is_empty() {
            self.results
                .push_back(Tuple::from_values(&self.initial_accumulators()));
            return Ok(());
        }

        for (key, accumulators) in groups {
            let mut values = key;
            values.extend(accumulators);
            self.results.push_back(Tuple::from_values(&values));
        }
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        Ok(self
            .results
            .pop_front()
            .map(|tuple| (tuple, Rid::new(INVALID_PAGE_ID, 0))))
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
