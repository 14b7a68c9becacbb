//! Tagged AST shared by the CEL interpreter and the SQL translator.

/// Scalar literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Num(f64),
    Bool(bool),
    Null,
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CmpOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }
}

/// Expression node.
///
/// Identifiers carry their full dotted path; both backends decide how a
/// path resolves (nested-map navigation vs. JSON extraction).
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Lit(Literal),
    /// Dotted member access, e.g. `labels.env` -> `["labels", "env"]`.
    Ident(Vec<String>),
    /// Literal list, only valid as the right-hand side of `in`.
    List(Vec<Literal>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
    /// `lhs in rhs` membership test.
    In(Box<Expr>, Box<Expr>),
    /// `receiver.contains(arg)` — the only supported method call.
    Contains(Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Whether this node is an identifier whose final segment is the
    /// distinguished `severity` attribute. Comparisons touching it use
    /// ordinal ranks instead of string order.
    pub fn is_severity_ident(&self) -> bool {
        matches!(self, Expr::Ident(path) if path.last().map(String::as_str) == Some("severity"))
    }
}
