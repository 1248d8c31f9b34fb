// Stage lowering
//
// Maps each routine stage onto DataFrame operations. The mapping is closed:
// every Stage variant has exactly one lowering and nothing else is reachable.

use datafusion::arrow::datatypes::DataType;
use datafusion::common::{Column, Result as DataFusionResult};
use datafusion::functions_aggregate::expr_fn::{avg, count, count_distinct, max, min, sum};
use datafusion::logical_expr::SortExpr;
use datafusion::prelude::*;

use crate::models::{AggFunc, CompareOp, DerivedExpr, Literal, Measure, Predicate, SortKey};

pub const JOIN_KEY: &str = "__join_key";

/// Unqualified column reference, never parsed as `relation.column`
pub fn column(name: &str) -> Expr {
    Expr::Column(Column::from_name(name))
}

pub fn literal(value: &Literal) -> Expr {
    match value {
        Literal::Bool(b) => lit(*b),
        Literal::Int(i) => lit(*i),
        Literal::Float(f) => lit(*f),
        Literal::Text(s) => lit(s.clone()),
    }
}

pub fn predicate(p: &Predicate) -> Expr {
    match p {
        Predicate::Compare { column: name, op, value } => {
            let left = column(name);
            let right = literal(value);
            match op {
                CompareOp::Eq => left.eq(right),
                CompareOp::NotEq => left.not_eq(right),
                CompareOp::Gt => left.gt(right),
                CompareOp::GtEq => left.gt_eq(right),
                CompareOp::Lt => left.lt(right),
                CompareOp::LtEq => left.lt_eq(right),
            }
        }
        Predicate::InList { column: name, values } => column(name).in_list(values.iter().map(literal).collect(), false),
        Predicate::All { predicates } => predicates
            .iter()
            .map(predicate)
            .reduce(Expr::and)
            .unwrap_or_else(|| lit(true)),
        Predicate::Any { predicates } => predicates
            .iter()
            .map(predicate)
            .reduce(Expr::or)
            .unwrap_or_else(|| lit(false)),
        Predicate::Not { predicate: inner } => !predicate(inner),
    }
}

pub fn measure(m: &Measure) -> DataFusionResult<Expr> {
    let input = m.column.as_deref().map(column);
    let expr = match (m.func, input) {
        (AggFunc::Count, None) => count(lit(1i64)),
        (AggFunc::Count, Some(c)) => count(c),
        (AggFunc::CountTrue, Some(c)) => count(when(c.eq(lit(true)), lit(1i64)).end()?),
        (AggFunc::CountDistinct, Some(c)) => count_distinct(c),
        (AggFunc::Sum, Some(c)) => sum(c),
        (AggFunc::Mean, Some(c)) => avg(c),
        (AggFunc::Min, Some(c)) => min(c),
        (AggFunc::Max, Some(c)) => max(c),
        (func, None) => {
            return Err(datafusion::error::DataFusionError::Plan(format!(
                "aggregate '{}' needs a column",
                func.as_str()
            )))
        }
    };
    Ok(expr.alias(&m.name))
}

/// Whether an ungrouped aggregate over zero rows leaves this measure null
pub fn null_on_empty(m: &Measure) -> bool {
    m.func == AggFunc::Sum
}

/// Sum over no rows is zero, not null
pub fn zero_if_null(name: &str) -> DataFusionResult<Expr> {
    Ok(when(column(name).is_null(), lit(0i64))
        .otherwise(column(name))?
        .alias(name))
}

pub fn derived(expr: &DerivedExpr) -> DataFusionResult<Expr> {
    match expr {
        DerivedExpr::Ratio {
            numerator,
            denominator,
            scale,
        } => {
            let num = cast(column(numerator), DataType::Float64);
            let den = cast(column(denominator), DataType::Float64);
            // Zero denominators give null rather than infinity
            when(den.clone().gt(lit(0.0f64)), num * lit(*scale) / den).end()
        }
        DerivedExpr::Flag { predicate: p } => Ok(predicate(p)),
    }
}

pub fn sort(keys: &[SortKey]) -> Vec<SortExpr> {
    keys.iter()
        .map(|k| column(&k.column).sort(!k.descending, false))
        .collect()
}

pub fn apply_join(
    left: DataFrame,
    right: DataFrame,
    left_on: &str,
    right_on: &str,
    columns: &[String],
) -> DataFusionResult<DataFrame> {
    let mut keep: Vec<Expr> = left
        .schema()
        .fields()
        .iter()
        .map(|f| column(f.name()))
        .collect();
    keep.extend(columns.iter().map(|c| column(c)));

    let mut right_columns = vec![column(right_on).alias(JOIN_KEY)];
    right_columns.extend(columns.iter().map(|c| column(c)));
    let right = right.select(right_columns)?;

    left.join(right, JoinType::Inner, &[left_on], &[JOIN_KEY], None)?
        .select(keep)
}
