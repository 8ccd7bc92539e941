//! Rule-based plan optimizer.
//!
//! A fixed pipeline of rewrites, each one a bottom-up match-on-variant
//! transformation of the plan tree. Rules assume expressions are pure,
//! which the expression variant guarantees.

use crate::access::value::Value;
use crate::catalog::Catalog;
use crate::execution::plan::{OrderDirection, PlanNode};
use crate::expression::{ComparisonOp, Expression, LogicOp};
use std::sync::Arc;

pub struct Optimizer {
    catalog: Arc<Catalog>,
}

impl Optimizer {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    /// Apply the rewrite pipeline in order.
    pub fn optimize(&self, plan: PlanNode) -> PlanNode {
        let plan = rewrite(plan, &merge_projections);
        let plan = rewrite(plan, &fold_plan_constants);
        let plan = rewrite(plan, &fold_false_join_sides);
        let plan = rewrite(plan, &dedup_aggregates);
        let plan = rewrite(plan, &cut_columns);
        let plan = rewrite(plan, &merge_filter_into_join);
        let plan = rewrite(plan, &push_down_join_predicate);
        let plan = rewrite(plan, &false_filter_to_values);
        let plan = rewrite(plan, &nlj_to_hash_join);
        let plan = rewrite(plan, &|node| self.order_by_to_index_scan(node));
        let plan = rewrite(plan, &sort_limit_to_topn);
        rewrite(plan, &|node| self.merge_filter_into_scan(node))
    }

    /// Rule 10: an ascending order-by over a bare seq scan whose columns
    /// are a prefix of an index key becomes an index scan.
    fn order_by_to_index_scan(&self, plan: PlanNode) -> PlanNode {
        let (child, order_bys, output_schema) = match plan {
            PlanNode::Sort {
                child,
                order_bys,
                output_schema,
            } => (child, order_bys, output_schema),
            other => return other,
        };

        if let PlanNode::SeqScan {
            table_oid,
            filter_predicate: None,
            output_schema: scan_schema,
        } = child.as_ref()
        {
            let mut sort_columns = Vec::with_capacity(order_bys.len());
            let all_simple = order_bys.iter().all(|(direction, expr)| {
                *direction == OrderDirection::Asc
                    && match expr {
                        Expression::ColumnRef {
                            tuple_idx: 0,
                            col_idx,
                        } => {
                            sort_columns.push(*col_idx);
                            true
                        }
                        _ => false,
                    }
            });
            if all_simple && !sort_columns.is_empty() {
                for index in self.catalog.table_indexes(*table_oid) {
                    if index.key_attrs.len() >= sort_columns.len()
                        && index.key_attrs[..sort_columns.len()] == sort_columns[..]
                    {
                        return PlanNode::IndexScan {
                            index_oid: index.oid,
                            table_oid: *table_oid,
                            point_key: None,
                            begin_key: None,
                            filter_predicate: None,
                            output_schema: scan_schema.clone(),
                        };
                    }
                }
            }
        }

        PlanNode::Sort {
            child,
            order_bys,
            output_schema,
        }
    }

    /// Rule 12: merge a filter into the scan below it; when the conjuncts
    /// are range comparisons covering both columns of a two-column index,
    /// use a ranged index scan positioned at the lower bounds.
    fn merge_filter_into_scan(&self, plan: PlanNode) -> PlanNode {
        let (child, predicate, output_schema) = match plan {
            PlanNode::Filter {
                child,
                predicate,
                output_schema,
            } => (child, predicate, output_schema),
            other => return other,
        };

        match *child {
            PlanNode::SeqScan {
                table_oid,
                filter_predicate,
                output_schema: scan_schema,
            } => {
                let merged = match filter_predicate {
                    Some(existing) => Expression::and(existing, predicate),
                    None => predicate,
                };

                if let Some(index_scan) =
                    self.try_ranged_index_scan(table_oid, &merged, &scan_schema)
                {
                    return index_scan;
                }

                PlanNode::SeqScan {
                    table_oid,
                    filter_predicate: Some(merged),
                    output_schema: scan_schema,
                }
            }
            other => PlanNode::Filter {
                child: Box::new(other),
                predicate,
                output_schema,
            },
        }
    }

    fn try_ranged_index_scan(
        &self,
        table_oid: crate::catalog::TableOid,
        predicate: &Expression,
        scan_schema: &crate::catalog::Schema,
    ) -> Option<PlanNode> {
        // Lower bounds per column from `col >= c`, `col > c`, `col = c`
        // conjuncts (reversed comparisons normalized first).
        let mut lower_bounds: Vec<(usize, Value)> = Vec::new();
        for conjunct in predicate.conjuncts() {
            let Some((col, op, value)) = as_column_comparison(&conjunct) else {
                continue;
            };
            if matches!(op, ComparisonOp::Ge | ComparisonOp::Gt | ComparisonOp::Eq) {
                lower_bounds.push((col, value));
            }
        }

        for index in self.catalog.table_indexes(table_oid) {
            if index.key_attrs.len() != 2 {
                continue;
            }
            let first = lower_bounds
                .iter()
                .find(|(col, _)| *col == index.key_attrs[0]);
            let second = lower_bounds
                .iter()
                .find(|(col, _)| *col == index.key_attrs[1]);
            if let (Some((_, v0)), Some((_, v1))) = (first, second) {
                return Some(PlanNode::IndexScan {
                    index_oid: index.oid,
                    table_oid,
                    point_key: None,
                    begin_key: Some(vec![v0.clone(), v1.clone()]),
                    filter_predicate: Some(predicate.clone()),
                    output_schema: scan_schema.clone(),
                });
            }
        }
        None
    }
}

/// Apply `f` to every node, children first.
fn rewrite(plan: PlanNode, f: &impl Fn(PlanNode) -> PlanNode) -> PlanNode {
    let plan = match plan {
        PlanNode::SeqScan { .. } | PlanNode::IndexScan { .. } | PlanNode::Values { .. } => plan,
        PlanNode::Insert {
            table_oid,
            child,
            output_schema,
        } => PlanNode::Insert {
            table_oid,
            child: Box::new(rewrite(*child, f)),
            output_schema,
        },
        PlanNode::Delete {
            table_oid,
            child,
            output_schema,
        } => PlanNode::Delete {
            table_oid,
            child: Box::new(rewrite(*child, f)),
            output_schema,
        },
        PlanNode::Update {
            table_oid,
            child,
            target_expressions,
            output_schema,
        } => PlanNode::Update {
            table_oid,
            child: Box::new(rewrite(*child, f)),
            target_expressions,
            output_schema,
        },
        PlanNode::NestedLoopJoin {
            left,
            right,
            join_type,
            predicate,
            output_schema,
        } => PlanNode::NestedLoopJoin {
            left: Box::new(rewrite(*left, f)),
            right: Box::new(rewrite(*right, f)),
            join_type,
            predicate,
            output_schema,
        },
        PlanNode::HashJoin {
            left,
            right,
            join_type,
            left_key_expressions,
            right_key_expressions,
            output_schema,
        } => PlanNode::HashJoin {
            left: Box::new(rewrite(*left, f)),
            right: Box::new(rewrite(*right, f)),
            join_type,
            left_key_expressions,
            right_key_expressions,
            output_schema,
        },
        PlanNode::Aggregation {
            child,
            group_bys,
            aggregates,
            output_schema,
        } => PlanNode::Aggregation {
            child: Box::new(rewrite(*child, f)),
            group_bys,
            aggregates,
            output_schema,
        },
        PlanNode::Filter {
            child,
            predicate,
            output_schema,
        } => PlanNode::Filter {
            child: Box::new(rewrite(*child, f)),
            predicate,
            output_schema,
        },
        PlanNode::Sort {
            child,
            order_bys,
            output_schema,
        } => PlanNode::Sort {
            child: Box::new(rewrite(*child, f)),
            order_bys,
            output_schema,
        },
        PlanNode::Limit {
            child,
            limit,
            output_schema,
        } => PlanNode::Limit {
            child: Box::new(rewrite(*child, f)),
            limit,
            output_schema,
        },
        PlanNode::TopN {
            child,
            order_bys,
            n,
            output_schema,
        } => PlanNode::TopN {
            child: Box::new(rewrite(*child, f)),
            order_bys,
            n,
            output_schema,
        },
        PlanNode::Projection {
            child,
            expressions,
            output_schema,
        } => PlanNode::Projection {
            child: Box::new(rewrite(*child, f)),
            expressions,
            output_schema,
        },
    };
    f(plan)
}

/// Rule 1: collapse projection-over-projection by inlining the inner
/// expressions into the outer ones.
fn merge_projections(plan: PlanNode) -> PlanNode {
    let (child, expressions, output_schema) = match plan {
        PlanNode::Projection {
            child,
            expressions,
            output_schema,
        } => (child, expressions, output_schema),
        other => return other,
    };

    match *child {
        PlanNode::Projection {
            child: inner_child,
            expressions: inner_expressions,
            ..
        } => {
            let composed = expressions
                .iter()
                .map(|expr| inline_columns(expr, &inner_expressions))
                .collect();
            PlanNode::Projection {
                child: inner_child,
                expressions: composed,
                output_schema,
            }
        }
        other => PlanNode::Projection {
            child: Box::new(other),
            expressions,
            output_schema,
        },
    }
}

/// Replace each `#0.i` in `expr` by `sources[i]`.
fn inline_columns(expr: &Expression, sources: &[Expression]) -> Expression {
    match expr {
        Expression::ColumnRef {
            tuple_idx: 0,
            col_idx,
        } => sources
            .get(*col_idx)
            .cloned()
            .unwrap_or_else(|| expr.clone()),
        Expression::ColumnRef { .. } | Expression::Literal(_) => expr.clone(),
        Expression::Arithmetic { op, left, right } => Expression::Arithmetic {
            op: *op,
            left: Box::new(inline_columns(left, sources)),
            right: Box::new(inline_columns(right, sources)),
        },
        Expression::Comparison { op, left, right } => Expression::Comparison {
            op: *op,
            left: Box::new(inline_columns(left, sources)),
            right: Box::new(inline_columns(right, sources)),
        },
        Expression::Logic { op, left, right } => Expression::Logic {
            op: *op,
            left: Box::new(inline_columns(left, sources)),
            right: Box::new(inline_columns(right, sources)),
        },
    }
}

/// Rule 2: fold constant sub-expressions in filter and join predicates,
/// short-circuiting FALSE through conjunctions.
fn fold_plan_constants(plan: PlanNode) -> PlanNode {
    match plan {
        PlanNode::Filter {
            child,
            predicate,
            output_schema,
        } => PlanNode::Filter {
            child,
            predicate: fold_expression(predicate),
            output_schema,
        },
        PlanNode::NestedLoopJoin {
            left,
            right,
            join_type,
            predicate,
            output_schema,
        } => PlanNode::NestedLoopJoin {
            left,
            right,
            join_type,
            predicate: predicate.map(fold_expression),
            output_schema,
        },
        PlanNode::SeqScan {
            table_oid,
            filter_predicate,
            output_schema,
        } => PlanNode::SeqScan {
            table_oid,
            filter_predicate: filter_predicate.map(fold_expression),
            output_schema,
        },
        other => other,
    }
}

fn fold_expression(expr: Expression) -> Expression {
    let expr = match expr {
        Expression::Arithmetic { op, left, right } => Expression::Arithmetic {
            op,
            left: Box::new(fold_expression(*left)),
            right: Box::new(fold_expression(*right)),
        },
        Expression::Comparison { op, left, right } => Expression::Comparison {
            op,
            left: Box::new(fold_expression(*left)),
            right: Box::new(fold_expression(*right)),
        },
        Expression::Logic { op, left, right } => Expression::Logic {
            op,
            left: Box::new(fold_expression(*left)),
            right: Box::new(fold_expression(*right)),
        },
        other => other,
    };

    // Logic short-circuits that do not need both sides to be constant.
    if let Expression::Logic { op, left, right } = &expr {
        match op {
            LogicOp::And => {
                if left.is_false_literal() || right.is_false_literal() {
                    return Expression::Literal(Value::Boolean(false));
                }
                if matches!(**left, Expression::Literal(Value::Boolean(true))) {
                    return (**right).clone();
                }
                if matches!(**right, Expression::Literal(Value::Boolean(true))) {
                    return (**left).clone();
                }
            }
            LogicOp::Or => {
                if matches!(**left, Expression::Literal(Value::Boolean(true)))
                    || matches!(**right, Expression::Literal(Value::Boolean(true)))
                {
                    return Expression::Literal(Value::Boolean(true));
                }
                if left.is_false_literal() {
                    return (**right).clone();
                }
                if right.is_false_literal() {
                    return (**left).clone();
                }
            }
        }
    }

    if !matches!(expr, Expression::Literal(_)) && expr.is_constant() {
        // Evaluation failure (division by zero) must surface at runtime,
        // so keep the expression unfolded in that case.
        if let Ok(value) = expr.evaluate_constant() {
            return Expression::Literal(value);
        }
    }
    expr
}

/// Rule 3: a join whose referenced side is filtered to FALSE produces no
/// matches from that side; replace the join predicate with FALSE.
fn fold_false_join_sides(plan: PlanNode) -> PlanNode {
    let (left, right, join_type, predicate, output_schema) = match plan {
        PlanNode::NestedLoopJoin {
            left,
            right,
            join_type,
            predicate,
            output_schema,
        } => (left, right, join_type, predicate, output_schema),
        other => return other,
    };

    let side_is_false = |node: &PlanNode| {
        matches!(
            node,
            PlanNode::Filter { predicate, .. } if predicate.is_false_literal()
        )
    };

    let predicate = match predicate {
        Some(pred) => {
            let mut columns = Vec::new();
            pred.collect_columns(&mut columns);
            let references_left = columns.iter().any(|(side, _)| *side == 0);
            let references_right = columns.iter().any(|(side, _)| *side == 1);
            if (references_left && side_is_false(&left))
                || (references_right && side_is_false(&right))
            {
                Some(Expression::Literal(Value::Boolean(false)))
            } else {
                Some(pred)
            }
        }
        None => None,
    };

    PlanNode::NestedLoopJoin {
        left,
        right,
        join_type,
        predicate,
        output_schema,
    }
}

/// Rule 4: collapse duplicate `(type, column)` aggregates, rewriting the
/// projection above the aggregation.
fn dedup_aggregates(plan: PlanNode) -> PlanNode {
    let (child, expressions, output_schema) = match plan {
        PlanNode::Projection {
            child,
            expressions,
            output_schema,
        } => (child, expressions, output_schema),
        other => return other,
    };

    let (agg_child, group_bys, aggregates, agg_schema) = match *child {
        PlanNode::Aggregation {
            child: agg_child,
            group_bys,
            aggregates,
            output_schema: agg_schema,
        } => (agg_child, group_bys, aggregates, agg_schema),
        other => {
            return PlanNode::Projection {
                child: Box::new(other),
                expressions,
                output_schema,
            }
        }
    };

    let group_count = group_bys.len();
    let mut kept: Vec<(crate::execution::plan::AggregationType, Option<Expression>)> = Vec::new();
    // Old aggregate position -> position after dedup.
    let mut remap = Vec::with_capacity(aggregates.len());
    for aggregate in &aggregates {
        match kept.iter().position(|k| k == aggregate) {
            Some(at) => remap.push(at),
            None => {
                remap.push(kept.len());
                kept.push(aggregate.clone());
            }
        }
    }

    if kept.len() == aggregates.len() {
        return PlanNode::Projection {
            child: Box::new(PlanNode::Aggregation {
                child: agg_child,
                group_bys,
                aggregates,
                output_schema: agg_schema,
            }),
            expressions,
            output_schema,
        };
    }

    let expressions = expressions
        .iter()
        .map(|expr| {
            expr.map_columns(&|tuple_idx, col_idx| {
                if tuple_idx == 0 && col_idx >= group_count {
                    (0, group_count + remap[col_idx - group_count])
                } else {
                    (tuple_idx, col_idx)
                }
            })
        })
        .collect();

    let mut columns = agg_schema.columns[..group_count].to_vec();
    for aggregate in &kept {
        let old_at = aggregates
            .iter()
            .position(|a| a == aggregate)
            .expect("kept aggregates come from the original list");
        columns.push(agg_schema.columns[group_count + old_at].clone());
    }

    PlanNode::Projection {
        child: Box::new(PlanNode::Aggregation {
            child: agg_child,
            group_bys,
            aggregates: kept,
            output_schema: crate::catalog::Schema::new(columns),
        }),
        expressions,
        output_schema,
    }
}

/// Rule 5: drop aggregates whose output column is never referenced by the
/// projection above.
fn cut_columns(plan: PlanNode) -> PlanNode {
    let (child, expressions, output_schema) = match plan {
        PlanNode::Projection {
            child,
            expressions,
            output_schema,
        } => (child, expressions, output_schema),
        other => return other,
    };

    let (agg_child, group_bys, aggregates, agg_schema) = match *child {
        PlanNode::Aggregation {
            child: agg_child,
            group_bys,
            aggregates,
            output_schema: agg_schema,
        } => (agg_child, group_bys, aggregates, agg_schema),
        other => {
            return PlanNode::Projection {
                child: Box::new(other),
                expressions,
                output_schema,
            }
        }
    };

    let group_count = group_bys.len();
    let mut referenced = vec![false; aggregates.len()];
    for expr in &expressions {
        let mut columns = Vec::new();
        expr.collect_columns(&mut columns);
        for (_, col_idx) in columns {
            if col_idx >= group_count {
                if let Some(slot) = referenced.get_mut(col_idx - group_count) {
                    *slot = true;
                }
            }
        }
    }

    if referenced.iter().all(|r| *r) {
        return PlanNode::Projection {
            child: Box::new(PlanNode::Aggregation {
                child: agg_child,
                group_bys,
                aggregates,
                output_schema: agg_schema,
            }),
            expressions,
            output_schema,
        };
    }

    let mut remap = vec![usize::MAX; aggregates.len()];
    let mut kept = Vec::new();
    let mut columns = agg_schema.columns[..group_count].to_vec();
    for (i, aggregate) in aggregates.iter().enumerate() {
        if referenced[i] {
            remap[i] = kept.len();
            kept.push(aggregate.clone());
            columns.push(agg_schema.columns[group_count + i].clone());
        }
    }

    let expressions = expressions
        .iter()
        .map(|expr| {
            expr.map_columns(&|tuple_idx, col_idx| {
                if tuple_idx == 0 && col_idx >= group_count {
                    (0, group_count + remap[col_idx - group_count])
                } else {
                    (tuple_idx, col_idx)
                }
            })
        })
        .collect();

    PlanNode::Projection {
        child: Box::new(PlanNode::Aggregation {
            child: agg_child,
            group_bys,
            aggregates: kept,
            output_schema: crate::catalog::Schema::new(columns),
        }),
        expressions,
        output_schema,
    }
}

/// Rule 6: merge a filter over a join into the join's own predicate. The
/// filter addresses the joined schema, so its columns split at the left
/// child's width.
fn merge_filter_into_join(plan: PlanNode) -> PlanNode {
    let (child, predicate, output_schema) = match plan {
        PlanNode::Filter {
            child,
            predicate,
            output_schema,
        } => (child, predicate, output_schema),
        other => return other,
    };

    // Only sound for inner joins: a filter above a LEFT join also drops
    // null-padded rows, which a join predicate never would.
    match *child {
        PlanNode::NestedLoopJoin {
            left,
            right,
            join_type: join_type @ crate::execution::plan::JoinType::Inner,
            predicate: join_predicate,
            output_schema: join_schema,
        } => {
            let left_width = left.output_schema().len();
            let translated = predicate.map_columns(&|_, col_idx| {
                if col_idx < left_width {
                    (0, col_idx)
                } else {
                    (1, col_idx - left_width)
                }
            });
            let predicate = match join_predicate {
                Some(existing) => Expression::and(existing, translated),
                None => translated,
            };

            PlanNode::NestedLoopJoin {
                left,
                right,
                join_type,
                predicate: Some(predicate),
                output_schema: join_schema,
            }
        }
        other => PlanNode::Filter {
            child: Box::new(other),
            predicate,
            output_schema,
        },
    }
}

/// Rule 7: partition an AND-rooted join predicate into left-only,
/// right-only, and genuinely joining conjuncts, pushing the single-sided
/// ones into child filters.
fn push_down_join_predicate(plan: PlanNode) -> PlanNode {
    // Inner joins only: filtering a LEFT join's input changes which rows
    // get null-padded, while a failing join predicate merely pads them.
    let (left, right, join_type, predicate, output_schema) = match plan {
        PlanNode::NestedLoopJoin {
            left,
            right,
            join_type: join_type @ crate::execution::plan::JoinType::Inner,
            predicate: Some(predicate),
            output_schema,
        } => (left, right, join_type, predicate, output_schema),
        other => return other,
    };

    let mut left_conjuncts = Vec::new();
    let mut right_conjuncts = Vec::new();
    let mut join_conjuncts = Vec::new();
    for conjunct in predicate.conjuncts() {
        if conjunct.is_constant() {
            join_conjuncts.push(conjunct);
        } else if conjunct.only_references_side(0) {
            left_conjuncts.push(conjunct);
        } else if conjunct.only_references_side(1) {
            right_conjuncts.push(conjunct.map_columns(&|_, col_idx| (0, col_idx)));
        } else {
            join_conjuncts.push(conjunct);
        }
    }

    if left_conjuncts.is_empty() && right_conjuncts.is_empty() {
        return PlanNode::NestedLoopJoin {
            left,
            right,
            join_type,
            predicate: Some(predicate),
            output_schema,
        };
    }

    let wrap = |child: Box<PlanNode>, conjuncts: Vec<Expression>| -> Box<PlanNode> {
        match Expression::conjoin(conjuncts) {
            None => child,
            Some(predicate) => {
                let schema = child.output_schema().clone();
                Box::new(PlanNode::Filter {
                    child,
                    predicate,
                    output_schema: schema,
                })
            }
        }
    };

    PlanNode::NestedLoopJoin {
        left: wrap(left, left_conjuncts),
        right: wrap(right, right_conjuncts),
        join_type,
        predicate: Expression::conjoin(join_conjuncts),
        output_schema,
    }
}

/// Rule 8: a filter that is constant FALSE produces nothing; replace the
/// subtree with an empty values node.
fn false_filter_to_values(plan: PlanNode) -> PlanNode {
    match plan {
        PlanNode::Filter {
            predicate,
            output_schema,
            ..
        } if predicate.is_false_literal() => PlanNode::Values {
            rows: vec![],
            output_schema,
        },
        other => other,
    }
}

/// Split an equality conjunct into (left-side key, right-side key) if one
/// operand references only side 0 and the other only side 1.
fn as_equi_pair(conjunct: &Expression) -> Option<(Expression, Expression)> {
    let Expression::Comparison {
        op: ComparisonOp::Eq,
        left,
        right,
    } = conjunct
    else {
        return None;
    };
    if left.only_references_side(0) && right.only_references_side(1) {
        Some(((**left).clone(), (**right).clone()))
    } else if left.only_references_side(1) && right.only_references_side(0) {
        Some(((**right).clone(), (**left).clone()))
    } else {
        None
    }
}

/// Rule 9: a nested loop join whose predicate is a conjunction of
/// cross-side equalities becomes a hash join.
fn nlj_to_hash_join(plan: PlanNode) -> PlanNode {
    let (left, right, join_type, predicate, output_schema) = match plan {
        PlanNode::NestedLoopJoin {
            left,
            right,
            join_type,
            predicate: Some(predicate),
            output_schema,
        } => (left, right, join_type, predicate, output_schema),
        other => return other,
    };

    let conjuncts = predicate.conjuncts();
    let mut left_keys = Vec::with_capacity(conjuncts.len());
    let mut right_keys = Vec::with_capacity(conjuncts.len());
    for conjunct in &conjuncts {
        match as_equi_pair(conjunct) {
            Some((left_key, right_key)) => {
                left_keys.push(left_key);
                right_keys.push(right_key.map_columns(&|_, col_idx| (0, col_idx)));
            }
            None => {
                return PlanNode::NestedLoopJoin {
                    left,
                    right,
                    join_type,
                    predicate: Some(predicate),
                    output_schema,
                }
            }
        }
    }

    PlanNode::HashJoin {
        left,
        right,
        join_type,
        left_key_expressions: left_keys,
        right_key_expressions: right_keys,
        output_schema,
    }
}

/// Rule 11: Limit over Sort becomes TopN.
fn sort_limit_to_topn(plan: PlanNode) -> PlanNode {
    let (child, limit, output_schema) = match plan {
        PlanNode::Limit {
            child,
            limit,
            output_schema,
        } => (child, limit, output_schema),
        other => return other,
    };

    match *child {
        PlanNode::Sort {
            child: sort_child,
            order_bys,
            ..
        } => PlanNode::TopN {
            child: sort_child,
            order_bys,
            n: limit,
            output_schema,
        },
        other => PlanNode::Limit {
            child: Box::new(other),
            limit,
            output_schema,
        },
    }
}

/// `col op literal` (possibly reversed) over side 0.
fn as_column_comparison(expr: &Expression) -> Option<(usize, ComparisonOp, Value)> {
    let Expression::Comparison { op, left, right } = expr else {
        return None;
    };
    match (left.as_ref(), right.as_ref()) {
        (
            Expression::ColumnRef {
                tuple_idx: 0,
                col_idx,
            },
            Expression::Literal(value),
        ) => Some((*col_idx, *op, value.clone())),
        (
            Expression::Literal(value),
            Expression::ColumnRef {
                tuple_idx: 0,
                col_idx,
            },
        ) => {
            let flipped = match op {
                ComparisonOp::Lt => ComparisonOp::Gt,
                ComparisonOp::Le => ComparisonOp::Ge,
                ComparisonOp::Gt => ComparisonOp::Lt,
                ComparisonOp::Ge => ComparisonOp::Le,
                other => *other,
            };
            Some((*col_idx, flipped, value.clone()))
        }
        _ => None,
    }
}
