//! AST interpreter over `serde_json::Value` records.

use serde_json::Value;

use crate::cel::ast::{CmpOp, Expr, Literal};
use crate::errors::CoreError;
use crate::models::alert::Severity;

/// Evaluate a parsed predicate against an attribute-accessible record.
///
/// The record is a JSON object (nested maps + typed scalars); dotted
/// identifiers navigate it. Unknown identifiers and type mismatches are
/// `CoreError::Evaluation` — callers skip the offending rule for the
/// current alert.
pub fn evaluate(expr: &Expr, record: &Value) -> Result<bool, CoreError> {
    match eval_value(expr, record)? {
        Value::Bool(b) => Ok(b),
        other => Err(CoreError::Evaluation(format!(
            "predicate evaluated to non-boolean value {other}"
        ))),
    }
}

fn eval_value(expr: &Expr, record: &Value) -> Result<Value, CoreError> {
    match expr {
        Expr::Lit(lit) => Ok(literal_value(lit)),
        Expr::Ident(path) => resolve_path(record, path),
        Expr::List(items) => Ok(Value::Array(items.iter().map(literal_value).collect())),
        Expr::Not(inner) => match eval_value(inner, record)? {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            other => Err(CoreError::Evaluation(format!(
                "'!' applied to non-boolean value {other}"
            ))),
        },
        Expr::And(lhs, rhs) => {
            // Short-circuit: the right side is not evaluated when the left
            // already decides the outcome.
            if !evaluate(lhs, record)? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(evaluate(rhs, record)?))
        }
        Expr::Or(lhs, rhs) => {
            if evaluate(lhs, record)? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(evaluate(rhs, record)?))
        }
        Expr::Cmp(op, lhs, rhs) => {
            let result = compare(*op, lhs, rhs, record)?;
            Ok(Value::Bool(result))
        }
        Expr::In(lhs, rhs) => {
            let needle = eval_value(lhs, record)?;
            let haystack = eval_value(rhs, record)?;
            match haystack {
                Value::Array(items) => Ok(Value::Bool(items.iter().any(|i| json_eq(i, &needle)))),
                other => Err(CoreError::Evaluation(format!(
                    "'in' requires a list on the right-hand side, got {other}"
                ))),
            }
        }
        Expr::Contains(receiver, arg) => {
            let receiver = eval_value(receiver, record)?;
            let arg = eval_value(arg, record)?;
            match (&receiver, &arg) {
                (Value::String(s), Value::String(sub)) => Ok(Value::Bool(s.contains(sub))),
                (Value::Array(items), needle) => {
                    Ok(Value::Bool(items.iter().any(|i| json_eq(i, needle))))
                }
                (recv, _) => Err(CoreError::Evaluation(format!(
                    "contains() requires a string or list receiver, got {recv}"
                ))),
            }
        }
    }
}

fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Str(s) => Value::String(s.clone()),
        Literal::Num(n) => serde_json::json!(n),
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Null => Value::Null,
    }
}

/// Navigate a dotted path through nested maps.
fn resolve_path(record: &Value, path: &[String]) -> Result<Value, CoreError> {
    let mut current = record;
    for segment in path {
        match current {
            Value::Object(map) => match map.get(segment) {
                Some(next) => current = next,
                None => {
                    return Err(CoreError::Evaluation(format!(
                        "unknown identifier '{}'",
                        path.join(".")
                    )))
                }
            },
            _ => {
                return Err(CoreError::Evaluation(format!(
                    "'{}' is not addressable through '{segment}'",
                    path.join(".")
                )))
            }
        }
    }
    Ok(current.clone())
}

fn compare(op: CmpOp, lhs: &Expr, rhs: &Expr, record: &Value) -> Result<bool, CoreError> {
    // Severity attributes compare by ordinal rank, never by raw string:
    // "high" < "info" lexicographically, which would invert the intent.
    if lhs.is_severity_ident() || rhs.is_severity_ident() {
        let l = severity_rank(lhs, record)?;
        let r = severity_rank(rhs, record)?;
        return Ok(apply_ord(op, l.cmp(&r)));
    }

    let l = eval_value(lhs, record)?;
    let r = eval_value(rhs, record)?;

    match op {
        CmpOp::Eq => Ok(json_eq(&l, &r)),
        CmpOp::Ne => Ok(!json_eq(&l, &r)),
        _ => match (&l, &r) {
            (Value::Number(a), Value::Number(b)) => {
                let (a, b) = (
                    a.as_f64().unwrap_or(f64::NAN),
                    b.as_f64().unwrap_or(f64::NAN),
                );
                let ord = a.partial_cmp(&b).ok_or_else(|| {
                    CoreError::Evaluation("numeric comparison with NaN".to_string())
                })?;
                Ok(apply_ord(op, ord))
            }
            (Value::String(a), Value::String(b)) => Ok(apply_ord(op, a.cmp(b))),
            _ => Err(CoreError::Evaluation(format!(
                "cannot order {l} against {r}"
            ))),
        },
    }
}

fn severity_rank(expr: &Expr, record: &Value) -> Result<i16, CoreError> {
    let value = eval_value(expr, record)?;
    match value {
        Value::String(s) => s
            .parse::<Severity>()
            .map(|sev| sev.ordinal())
            .map_err(CoreError::Evaluation),
        other => Err(CoreError::Evaluation(format!(
            "severity comparison against non-string value {other}"
        ))),
    }
}

fn apply_ord(op: CmpOp, ord: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering::*;
    match op {
        CmpOp::Lt => ord == Less,
        CmpOp::Le => ord != Greater,
        CmpOp::Gt => ord == Greater,
        CmpOp::Ge => ord != Less,
        CmpOp::Eq => ord == Equal,
        CmpOp::Ne => ord != Equal,
    }
}

/// Equality across JSON values, with numbers compared numerically so that
/// `5` and `5.0` agree.
fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            x.as_f64().unwrap_or(f64::NAN) == y.as_f64().unwrap_or(f64::NAN)
        }
        _ => a == b,
    }
}
