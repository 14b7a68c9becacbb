//! SQL translation backend over the CEL AST.
//!
//! Translates a parsed predicate into a Postgres WHERE fragment for
//! server-side filtering of stored alerts. Attribute paths extract from the
//! `payload` JSONB column; comparisons against the distinguished `severity`
//! attribute are rewritten onto the numeric `severity_ord` column with the
//! literal replaced by its ordinal, so SQL filtering and in-process
//! evaluation agree. Translation is a pure function of the AST: translating
//! the same predicate twice yields byte-identical output.

use crate::cel::ast::{CmpOp, Expr, Literal};
use crate::errors::CoreError;
use crate::models::alert::Severity;

/// Translate a parsed predicate into a WHERE fragment.
pub fn to_sql(expr: &Expr) -> Result<String, CoreError> {
    translate(expr)
}

fn translate(expr: &Expr) -> Result<String, CoreError> {
    match expr {
        Expr::And(lhs, rhs) => Ok(format!("({} AND {})", translate(lhs)?, translate(rhs)?)),
        Expr::Or(lhs, rhs) => Ok(format!("({} OR {})", translate(lhs)?, translate(rhs)?)),
        Expr::Not(inner) => Ok(format!("(NOT {})", translate(inner)?)),
        Expr::Cmp(op, lhs, rhs) => translate_cmp(*op, lhs, rhs),
        Expr::In(lhs, rhs) => translate_in(lhs, rhs),
        Expr::Contains(receiver, arg) => translate_contains(receiver, arg),
        Expr::Lit(Literal::Bool(b)) => Ok(if *b { "TRUE" } else { "FALSE" }.to_string()),
        other => Err(CoreError::Evaluation(format!(
            "expression {other:?} has no SQL form outside a comparison"
        ))),
    }
}

fn translate_cmp(op: CmpOp, lhs: &Expr, rhs: &Expr) -> Result<String, CoreError> {
    if lhs.is_severity_ident() || rhs.is_severity_ident() {
        return translate_severity_cmp(op, lhs, rhs);
    }

    let sql_op = cmp_sql_op(op);
    match (lhs, rhs) {
        (Expr::Ident(path), Expr::Lit(lit)) => Ok(column_vs_literal(path, sql_op, lit, false)?),
        (Expr::Lit(lit), Expr::Ident(path)) => Ok(column_vs_literal(path, sql_op, lit, true)?),
        (Expr::Ident(a), Expr::Ident(b)) => {
            Ok(format!("{} {sql_op} {}", json_text(a), json_text(b)))
        }
        _ => Err(CoreError::Evaluation(
            "SQL comparison requires an attribute and a literal".to_string(),
        )),
    }
}

fn translate_severity_cmp(op: CmpOp, lhs: &Expr, rhs: &Expr) -> Result<String, CoreError> {
    let sql_op = cmp_sql_op(op);
    match (lhs, rhs) {
        (Expr::Ident(_), Expr::Lit(Literal::Str(s))) => {
            Ok(format!("severity_ord {sql_op} {}", severity_ordinal(s)?))
        }
        (Expr::Lit(Literal::Str(s)), Expr::Ident(_)) => {
            Ok(format!("{} {sql_op} severity_ord", severity_ordinal(s)?))
        }
        _ => Err(CoreError::Evaluation(
            "severity comparisons require a string literal".to_string(),
        )),
    }
}

fn translate_in(lhs: &Expr, rhs: &Expr) -> Result<String, CoreError> {
    let Expr::Ident(path) = lhs else {
        return Err(CoreError::Evaluation(
            "SQL 'in' requires an attribute on the left-hand side".to_string(),
        ));
    };
    let Expr::List(items) = rhs else {
        return Err(CoreError::Evaluation(
            "SQL 'in' requires a literal list on the right-hand side".to_string(),
        ));
    };
    if items.is_empty() {
        return Ok("FALSE".to_string());
    }
    if path.last().map(String::as_str) == Some("severity") {
        let ordinals = items
            .iter()
            .map(|lit| match lit {
                Literal::Str(s) => severity_ordinal(s).map(|o| o.to_string()),
                other => Err(CoreError::Evaluation(format!(
                    "severity list member {other:?} is not a string"
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(format!("severity_ord IN ({})", ordinals.join(", ")));
    }
    let rendered = items
        .iter()
        .map(render_literal)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!("{} IN ({})", json_text(path), rendered.join(", ")))
}

fn translate_contains(receiver: &Expr, arg: &Expr) -> Result<String, CoreError> {
    let Expr::Ident(path) = receiver else {
        return Err(CoreError::Evaluation(
            "SQL contains() requires an attribute receiver".to_string(),
        ));
    };
    let Expr::Lit(Literal::Str(needle)) = arg else {
        return Err(CoreError::Evaluation(
            "SQL contains() requires a string literal argument".to_string(),
        ));
    };
    Ok(format!(
        "{} LIKE '%{}%'",
        json_text(path),
        escape_like(needle)
    ))
}

fn column_vs_literal(
    path: &[String],
    sql_op: &str,
    lit: &Literal,
    flipped: bool,
) -> Result<String, CoreError> {
    let (column, rendered) = match lit {
        Literal::Str(_) => (json_text(path), render_literal(lit)?),
        // Text extraction yields text; cast for typed comparison.
        Literal::Num(_) => (format!("({})::numeric", json_text(path)), render_literal(lit)?),
        Literal::Bool(_) => (format!("({})::boolean", json_text(path)), render_literal(lit)?),
        Literal::Null => {
            let is = match sql_op {
                "=" => "IS NULL",
                "<>" => "IS NOT NULL",
                _ => {
                    return Err(CoreError::Evaluation(
                        "null only supports equality comparisons".to_string(),
                    ))
                }
            };
            return Ok(format!("{} {is}", json_text(path)));
        }
    };
    if flipped {
        Ok(format!("{rendered} {sql_op} {column}"))
    } else {
        Ok(format!("{column} {sql_op} {rendered}"))
    }
}

fn cmp_sql_op(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Lt => "<",
        CmpOp::Le => "<=",
        CmpOp::Gt => ">",
        CmpOp::Ge => ">=",
        CmpOp::Eq => "=",
        CmpOp::Ne => "<>",
    }
}

/// JSONB text extraction for a dotted attribute path.
fn json_text(path: &[String]) -> String {
    format!("payload #>> '{{{}}}'", path.join(","))
}

fn render_literal(lit: &Literal) -> Result<String, CoreError> {
    match lit {
        Literal::Str(s) => Ok(format!("'{}'", s.replace('\'', "''"))),
        Literal::Num(n) => {
            if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
                Ok(format!("{}", *n as i64))
            } else {
                Ok(format!("{n}"))
            }
        }
        Literal::Bool(b) => Ok(if *b { "TRUE" } else { "FALSE" }.to_string()),
        Literal::Null => Ok("NULL".to_string()),
    }
}

fn severity_ordinal(name: &str) -> Result<i16, CoreError> {
    name.parse::<Severity>()
        .map(|s| s.ordinal())
        .map_err(CoreError::Evaluation)
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('\'', "''")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cel::parser::parse;

    fn sql(expr: &str) -> String {
        to_sql(&parse(expr).unwrap()).unwrap()
    }

    #[test]
    fn string_equality() {
        assert_eq!(sql("service == 'db'"), "payload #>> '{service}' = 'db'");
    }

    #[test]
    fn nested_path_extraction() {
        assert_eq!(
            sql("labels.env == 'prod'"),
            "payload #>> '{labels,env}' = 'prod'"
        );
    }

    #[test]
    fn severity_rewrites_to_ordinal_column() {
        assert_eq!(sql("severity > 'info'"), "severity_ord > 1");
        assert_eq!(sql("severity == 'critical'"), "severity_ord = 4");
        assert_eq!(sql("'high' <= severity"), "3 <= severity_ord");
    }

    #[test]
    fn severity_in_list_rewrites_each_member() {
        assert_eq!(
            sql("severity in ['high', 'critical']"),
            "severity_ord IN (3, 4)"
        );
    }

    #[test]
    fn numeric_comparison_casts() {
        assert_eq!(
            sql("count >= 5"),
            "(payload #>> '{count}')::numeric >= 5"
        );
    }

    #[test]
    fn connectives_parenthesize() {
        assert_eq!(
            sql("service == 'db' && severity >= 'high'"),
            "(payload #>> '{service}' = 'db' AND severity_ord >= 3)"
        );
        assert_eq!(
            sql("!(status == 'resolved')"),
            "(NOT payload #>> '{status}' = 'resolved')"
        );
    }

    #[test]
    fn in_list_renders_literals() {
        assert_eq!(
            sql("status in ['firing', 'acknowledged']"),
            "payload #>> '{status}' IN ('firing', 'acknowledged')"
        );
        assert_eq!(sql("status in []"), "FALSE");
    }

    #[test]
    fn contains_becomes_like_with_escaping() {
        assert_eq!(
            sql("name.contains('timeout')"),
            "payload #>> '{name}' LIKE '%timeout%'"
        );
        assert_eq!(
            sql("name.contains('50%')"),
            "payload #>> '{name}' LIKE '%50\\%%'"
        );
    }

    #[test]
    fn quotes_are_doubled() {
        assert_eq!(
            sql("name == 'o\\'clock'"),
            "payload #>> '{name}' = 'o''clock'"
        );
    }

    #[test]
    fn translation_is_idempotent() {
        let ast = parse("severity >= 'high' && labels.env == 'prod'").unwrap();
        assert_eq!(to_sql(&ast).unwrap(), to_sql(&ast).unwrap());
    }

    #[test]
    fn null_equality_uses_is_null() {
        assert_eq!(sql("service == null"), "payload #>> '{service}' IS NULL");
        assert_eq!(
            sql("service != null"),
            "payload #>> '{service}' IS NOT NULL"
        );
    }
}
