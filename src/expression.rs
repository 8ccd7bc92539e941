//! Expression trees evaluated against tuples.
//!
//! A tagged variant per node kind: column reference, constant, arithmetic,
//! comparison, and logical connective. Expressions are pure; the optimizer
//! relies on that when folding constants and pushing predicates around.
//! Column references carry a tuple side so join predicates can address
//! both inputs (side 0 = left/outer, side 1 = right/inner).

use crate::access::tuple::Tuple;
use crate::access::value::Value;
use anyhow::{bail, Result};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    ColumnRef {
        tuple_idx: usize,
        col_idx: usize,
    },
    Literal(Value),
    Arithmetic {
        op: ArithmeticOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Comparison {
        op: ComparisonOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Logic {
        op: LogicOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
}

impl Expression {
    pub fn column(col_idx: usize) -> Self {
        Expression::ColumnRef {
            tuple_idx: 0,
            col_idx,
        }
    }

    pub fn join_column(tuple_idx: usize, col_idx: usize) -> Self {
        Expression::ColumnRef { tuple_idx, col_idx }
    }

    pub fn literal(value: Value) -> Self {
        Expression::Literal(value)
    }

    pub fn arithmetic(op: ArithmeticOp, left: Expression, right: Expression) -> Self {
        Expression::Arithmetic {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn comparison(op: ComparisonOp, left: Expression, right: Expression) -> Self {
        Expression::Comparison {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn eq(left: Expression, right: Expression) -> Self {
        Self::comparison(ComparisonOp::Eq, left, right)
    }

    pub fn and(left: Expression, right: Expression) -> Self {
        Expression::Logic {
            op: LogicOp::And,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn or(left: Expression, right: Expression) -> Self {
        Expression::Logic {
            op: LogicOp::Or,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Evaluate against a single tuple (all column refs on side 0).
    pub fn evaluate(&self, tuple: &Tuple) -> Result<Value> {
        let values = tuple.values()?;
        self.evaluate_values(&values, None)
    }

    /// Evaluate a join predicate against a pair of tuples.
    pub fn evaluate_join(&self, left: &Tuple, right: &Tuple) -> Result<Value> {
        let left_values = left.values()?;
        let right_values = right.values()?;
        self.evaluate_values(&left_values, Some(&right_values))
    }

    fn evaluate_values(&self, left: &[Value], right: Option<&[Value]>) -> Result<Value> {
        match self {
            Expression::ColumnRef { tuple_idx, col_idx } => {
                let side = match *tuple_idx {
                    0 => left,
                    1 => right.ok_or_else(|| {
                        anyhow::anyhow!("right-side column reference outside a join")
                    })?,
                    other => bail!("invalid tuple side {}", other),
                };
                side.get(*col_idx)
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("column index {} out of bounds", col_idx))
            }
            Expression::Literal(value) => Ok(value.clone()),
            Expression::Arithmetic { op, left: l, right: r } => {
                let lv = l.evaluate_values(left, right)?;
                let rv = r.evaluate_values(left, right)?;
                eval_arithmetic(*op, &lv, &rv)
            }
            Expression::Comparison { op, left: l, right: r } => {
                let lv = l.evaluate_values(left, right)?;
                let rv = r.evaluate_values(left, right)?;
                eval_comparison(*op, &lv, &rv)
            }
            Expression::Logic { op, left: l, right: r } => {
                let lv = l.evaluate_values(left, right)?;
                let rv = r.evaluate_values(left, right)?;
                eval_logic(*op, &lv, &rv)
            }
        }
    }

    /// True if the expression contains no column references.
    pub fn is_constant(&self) -> bool {
        match self {
            Expression::ColumnRef { .. } => false,
            Expression::Literal(_) => true,
            Expression::Arithmetic { left, right, .. }
            | Expression::Comparison { left, right, .. }
            | Expression::Logic { left, right, .. } => left.is_constant() && right.is_constant(),
        }
    }

    /// Evaluate a constant expression without a tuple.
    pub fn evaluate_constant(&self) -> Result<Value> {
        debug_assert!(self.is_constant());
        self.evaluate_values(&[], None)
    }

    /// True if this is the literal FALSE.
    pub fn is_false_literal(&self) -> bool {
        matches!(self, Expression::Literal(Value::Boolean(false)))
    }

    /// Collect every `(tuple_idx, col_idx)` referenced.
    pub fn collect_columns(&self, out: &mut Vec<(usize, usize)>) {
        match self {
            Expression::ColumnRef { tuple_idx, col_idx } => out.push((*tuple_idx, *col_idx)),
            Expression::Literal(_) => {}
            Expression::Arithmetic { left, right, .. }
            | Expression::Comparison { left, right, .. }
            | Expression::Logic { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
        }
    }

    /// True if every column reference is on the given side.
    pub fn only_references_side(&self, side: usize) -> bool {
        let mut columns = Vec::new();
        self.collect_columns(&mut columns);
        columns.iter().all(|(tuple_idx, _)| *tuple_idx == side)
    }

    /// Rewrite every column reference with `f(tuple_idx, col_idx)`.
    pub fn map_columns(&self, f: &impl Fn(usize, usize) -> (usize, usize)) -> Expression {
        match self {
            Expression::ColumnRef { tuple_idx, col_idx } => {
                let (tuple_idx, col_idx) = f(*tuple_idx, *col_idx);
                Expression::ColumnRef { tuple_idx, col_idx }
            }
            Expression::Literal(value) => Expression::Literal(value.clone()),
            Expression::Arithmetic { op, left, right } => Expression::Arithmetic {
                op: *op,
                left: Box::new(left.map_columns(f)),
                right: Box::new(right.map_columns(f)),
            },
            Expression::Comparison { op, left, right } => Expression::Comparison {
                op: *op,
                left: Box::new(left.map_columns(f)),
                right: Box::new(right.map_columns(f)),
            },
            Expression::Logic { op, left, right } => Expression::Logic {
                op: *op,
                left: Box::new(left.map_columns(f)),
                right: Box::new(right.map_columns(f)),
            },
        }
    }

    /// Flatten an AND-rooted tree into its conjuncts.
    pub fn conjuncts(&self) -> Vec<Expression> {
        match self {
            Expression::Logic {
                op: LogicOp::And,
                left,
                right,
            } => {
                let mut out = left.conjuncts();
                out.extend(right.conjuncts());
                out
            }
            other => vec![other.clone()],
        }
    }

    /// Rebuild an AND chain from conjuncts; `None` for an empty list.
    pub fn conjoin(mut conjuncts: Vec<Expression>) -> Option<Expression> {
        let first = if conjuncts.is_empty() {
            return None;
        } else {
            conjuncts.remove(0)
        };
        Some(
            conjuncts
                .into_iter()
                .fold(first, |acc, next| Expression::and(acc, next)),
        )
    }
}

fn eval_arithmetic(op: ArithmeticOp, left: &Value, right: &Value) -> Result<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    let (Value::Int32(l), Value::Int32(r)) = (left, right) else {
        bail!("arithmetic requires integer operands, got {} and {}", left, right);
    };
    let result = match op {
        ArithmeticOp::Add => l.checked_add(*r),
        ArithmeticOp::Sub => l.checked_sub(*r),
        ArithmeticOp::Mul => l.checked_mul(*r),
        ArithmeticOp::Div => {
            if *r == 0 {
                bail!("division by zero");
            }
            l.checked_div(*r)
        }
    };
    result
        .map(Value::Int32)
        .ok_or_else(|| anyhow::anyhow!("integer overflow in arithmetic"))
}

fn eval_comparison(op: ComparisonOp, left: &Value, right: &Value) -> Result<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    let Some(ordering) = left.compare(right) else {
        bail!("cannot compare {} with {}", left, right);
    };
    let result = match op {
        ComparisonOp::Eq => ordering == Ordering::Equal,
        ComparisonOp::Ne => ordering != Ordering::Equal,
        ComparisonOp::Lt => ordering == Ordering::Less,
        ComparisonOp::Le => ordering != Ordering::Greater,
        ComparisonOp::Gt => ordering == Ordering::Greater,
        ComparisonOp::Ge => ordering != Ordering::Less,
    };
    Ok(Value::Boolean(result))
}

/// Three-valued AND/OR.
fn eval_logic(op: LogicOp, left: &Value, right: &Value) -> Result<Value> {
    let as_bool = |v: &Value| -> Result<Option<bool>> {
        match v {
            Value::Null => Ok(None),
            Value::Boolean(b) => Ok(Some(*b)),
            other => bail!("logic operand must be boolean, got {}", other),
        }
    };
    let l = as_bool(left)?;
    let r = as_bool(right)?;
    let result = match op {
        LogicOp::And => match (l, r) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        },
        LogicOp::Or => match (l, r) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
    };
    Ok(result.map(Value::Boolean).unwrap_or(Value::Null))
}
