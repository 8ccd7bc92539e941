//! Physical plan nodes.
//!
//! One tagged variant per executor; the optimizer rewrites these trees and
//! the executor factory maps each node to its implementation.

use crate::access::value::{DataType, Value};
use crate::catalog::{Column, IndexOid, Schema, TableOid};
use crate::expression::Expression;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregationType {
    CountStar,
    Count,
    Sum,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub enum PlanNode {
    SeqScan {
        table_oid: TableOid,
        /// Predicate merged into the scan by the optimizer.
        filter_predicate: Option<Expression>,
        output_schema: Schema,
    },
    IndexScan {
        index_oid: IndexOid,
        table_oid: TableOid,
        /// Single-strike point lookup key values.
        point_key: Option<Vec<Value>>,
        /// Lower bound for a range scan.
        begin_key: Option<Vec<Value>>,
        /// Residual predicate applied to fetched tuples.
        filter_predicate: Option<Expression>,
        output_schema: Schema,
    },
    Insert {
        table_oid: TableOid,
        child: Box<PlanNode>,
        output_schema: Schema,
    },
    Delete {
        table_oid: TableOid,
        child: Box<PlanNode>,
        output_schema: Schema,
    },
    Update {
        table_oid: TableOid,
        child: Box<PlanNode>,
        /// One expression per target column, evaluated against the old
        /// tuple.
        target_expressions: Vec<Expression>,
        output_schema: Schema,
    },
    NestedLoopJoin {
        left: Box<PlanNode>,
        right: Box<PlanNode>,
        join_type: JoinType,
        predicate: Option<Expression>,
        output_schema: Schema,
    },
    HashJoin {
        left: Box<PlanNode>,
        right: Box<PlanNode>,
        join_type: JoinType,
        left_key_expressions: Vec<Expression>,
        right_key_expressions: Vec<Expression>,
        output_schema: Schema,
    },
    Aggregation {
        child: Box<PlanNode>,
        group_bys: Vec<Expression>,
        aggregates: Vec<(AggregationType, Option<Expression>)>,
        output_schema: Schema,
    },
    Filter {
        child: Box<PlanNode>,
        predicate: Expression,
        output_schema: Schema,
    },
    Sort {
        child: Box<PlanNode>,
        order_bys: Vec<(OrderDirection, Expression)>,
        output_schema: Schema,
    },
    Limit {
        child: Box<PlanNode>,
        limit: usize,
        output_schema: Schema,
    },
    TopN {
        child: Box<PlanNode>,
        order_bys: Vec<(OrderDirection, Expression)>,
        n: usize,
        output_schema: Schema,
    },
    Projection {
        child: Box<PlanNode>,
        expressions: Vec<Expression>,
        output_schema: Schema,
    },
    Values {
        rows: Vec<Vec<Expression>>,
        output_schema: Schema,
    },
}

impl PlanNode {
    pub fn output_schema(&self) -> &Schema {
        match self {
            PlanNode::SeqScan { output_schema, .. }
            | PlanNode::IndexScan { output_schema, .. }
            | PlanNode::Insert { output_schema, .. }
            | PlanNode::Delete { output_schema, .. }
            | PlanNode::Update { output_schema, .. }
            | PlanNode::NestedLoopJoin { output_schema, .. }
            | PlanNode::HashJoin { output_schema, .. }
            | PlanNode::Aggregation { output_schema, .. }
            | PlanNode::Filter { output_schema, .. }
            | PlanNode::Sort { output_schema, .. }
            | PlanNode::Limit { output_schema, .. }
            | PlanNode::TopN { output_schema, .. }
            | PlanNode::Projection { output_schema, .. }
            | PlanNode::Values { output_schema, .. } => output_schema,
        }
    }

    /// Schema of the single "count" tuple the write executors emit.
    pub fn count_schema() -> Schema {
        Schema::new(vec![Column::new("count", DataType::Int32)])
    }

    /// One-line node label for plan explanations.
    fn label(&self) -> String {
        match self {
            PlanNode::SeqScan {
                table_oid,
                filter_predicate,
                ..
            } => {
                if filter_predicate.is_some() {
                    format!("SeqScan(table={}, filtered)", table_oid)
                } else {
                    format!("SeqScan(table={})", table_oid)
                }
            }
            PlanNode::IndexScan {
                index_oid,
                point_key,
                ..
            } => {
                if point_key.is_some() {
                    format!("IndexScan(index={}, point)", index_oid)
                } else {
                    format!("IndexScan(index={}, range)", index_oid)
                }
            }
            PlanNode::Insert { table_oid, .. } => format!("Insert(table={})", table_oid),
            PlanNode::Delete { table_oid, .. } => format!("Delete(table={})", table_oid),
            PlanNode::Update { table_oid, .. } => format!("Update(table={})", table_oid),
            PlanNode::NestedLoopJoin { join_type, .. } => {
                format!("NestedLoopJoin({:?})", join_type)
            }
            PlanNode::HashJoin { join_type, .. } => format!("HashJoin({:?})", join_type),
            PlanNode::Aggregation {
                group_bys,
                aggregates,
                ..
            } => format!(
                "Aggregation(groups={}, aggs={})",
                group_bys.len(),
                aggregates.len()
            ),
            PlanNode::Filter { .. } => "Filter".to_string(),
            PlanNode::Sort { order_bys, .. } => format!("Sort(keys={})", order_bys.len()),
            PlanNode::Limit { limit, .. } => format!("Limit({})", limit),
            PlanNode::TopN { n, .. } => format!("TopN({})", n),
            PlanNode::Projection { expressions, .. } => {
                format!("Projection(exprs={})", expressions.len())
            }
            PlanNode::Values { rows, .. } => format!("Values(rows={})", rows.len()),
        }
    }

    pub fn children(&self) -> Vec<&PlanNode> {
        match self {
            PlanNode::SeqScan { .. } | PlanNode::IndexScan { .. } | PlanNode::Values { .. } => {
                vec![]
            }
            PlanNode::Insert { child, .. }
            | PlanNode::Delete { child, .. }
            | PlanNode::Update { child, .. }
            | PlanNode::Aggregation { child, .. }
            | PlanNode::Filter { child, .. }
            | PlanNode::Sort { child, .. }
            | PlanNode::Limit { child, .. }
            | PlanNode::TopN { child, .. }
            | PlanNode::Projection { child, .. } => vec![child],
            PlanNode::NestedLoopJoin { left, right, .. }
            | PlanNode::HashJoin { left, right, .. } => vec![left, right],
        }
    }

    /// Indented tree rendering.
    pub fn explain(&self) -> String {
        fn walk(node: &PlanNode, depth: usize, out: &mut String) {
            out.push_str(&"  ".repeat(depth));
            out.push_str(&node.label());
            out.push('\n');
            for child in node.children() {
                walk(child, depth + 1, out);
            }
        }
        let mut out = String::new();
        walk(self, 0, &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(oid: TableOid) -> PlanNode {
        PlanNode::SeqScan {
            table_oid: oid,
            filter_predicate: None,
            output_schema: Schema::new(vec![Column::new("id", DataType::Int32)]),
        }
    }

    #[test]
    fn test_explain_renders_tree() {
        let plan = PlanNode::Limit {
            child: Box::new(PlanNode::Sort {
                child: Box::new(scan(1)),
                order_bys: vec![(OrderDirection::Asc, Expression::column(0))],
                output_schema: Schema::new(vec![Column::new("id", DataType::Int32)]),
            }),
            limit: 10,
            output_schema: Schema::new(vec![Column::new("id", DataType::Int32)]),
        };

        let rendered = plan.explain();
        assert!(rendered.contains("Limit(10)"));
        assert!(rendered.contains("  Sort(keys=1)"));
        assert!(rendered.contains("    SeqScan(table=1)"));
    }

    #[test]
    fn test_children() {
        let join = PlanNode::NestedLoopJoin {
            left: Box::new(scan(1)),
            right: Box::new(scan(2)),
            join_type: JoinType::Inner,
            predicate: None,
            output_schema: Schema::default(),
        };
        assert_eq!(join.children().len(), 2);
        assert!(scan(1).children().is_empty());
    }
}
