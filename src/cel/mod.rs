//! CEL predicate support: one parse step, two backends.
//!
//! Rule predicates, maintenance-window queries, and dedup scoping all share
//! the operator subset implemented here: boolean connectives, comparisons,
//! `in`, dotted member access, and `contains(...)`. The same AST feeds both
//! the in-process interpreter ([`eval`]) and the server-side filter
//! translator ([`sql`]).

pub mod ast;
pub mod eval;
pub mod parser;
pub mod sql;

use serde_json::Value;

use crate::errors::CoreError;

/// A parsed, reusable predicate.
///
/// Parsing happens once, at rule-creation time; a stored rule whose
/// predicate no longer parses never reaches evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct CelExpression {
    source: String,
    expr: ast::Expr,
}

impl CelExpression {
    /// Parse a predicate string. Malformed input is `CoreError::Parse`.
    pub fn parse(source: &str) -> Result<Self, CoreError> {
        let expr = parser::parse(source)?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    /// Evaluate against an attribute-accessible record.
    pub fn evaluate(&self, record: &Value) -> Result<bool, CoreError> {
        eval::evaluate(&self.expr, record)
    }

    /// Translate into a Postgres WHERE fragment.
    pub fn to_sql(&self) -> Result<String, CoreError> {
        sql::to_sql(&self.expr)
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}
