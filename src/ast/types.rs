//! SQL AST for the relational list queries.
//!
//! Only the shapes the relational provider emits are modeled: a single-table
//! SELECT with a filter, ordering and paging. Identifiers are kept unquoted
//! here; the compiler quotes them.
use chrono::{DateTime, Utc};

/// A single-table SELECT.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectQuery {
    pub projections: Vec<SelectItem>,
    pub from: Option<TableRef>,
    pub filter: Option<Expression>,
    pub order_by: Vec<OrderByExpr>,
    pub limit: Option<Expression>,
    pub offset: Option<Expression>,
}

/// A single item in the SELECT projection list.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    /// `*`
    Wildcard,
    /// An expression, optionally aliased: `expr AS alias`.
    Expression {
        expr: Expression,
        alias: Option<String>,
    },
}

/// `schema.table`
#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    pub schema: Option<String>,
    pub name: String,
}

/// Core expression type. Recursive to support arbitrary nesting.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Column(String),
    Literal(Literal),
    /// Binary operation: `left op right`.
    BinaryOp {
        left: Box<Expression>,
        op: BinaryOperator,
        right: Box<Expression>,
    },
    /// `NOT expr`
    Not(Box<Expression>),
    /// Function call: `name(args)`.
    Function { name: String, args: Vec<Expression> },
    /// expr IN (values).
    InList {
        expr: Box<Expression>,
        list: Vec<Expression>,
        negated: bool,
    },
    /// expr IS NULL / IS NOT NULL.
    IsNull {
        expr: Box<Expression>,
        negated: bool,
    },
    /// CAST(expr AS type).
    Cast {
        expr: Box<Expression>,
        data_type: String,
    },
    /// Wildcard `*` (used in COUNT(*)).
    Wildcard,
    /// Parenthesized expression.
    Nested(Box<Expression>),
}

/// Literal values in SQL.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Timestamp(DateTime<Utc>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Eq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    /// PostgreSQL POSIX match, `~`.
    RegexMatch,
}

/// ORDER BY expression.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderByExpr {
    pub expr: Expression,
    pub asc: bool,
}

impl Expression {
    pub fn column(name: &str) -> Self {
        Expression::Column(name.to_string())
    }

    pub fn boolean(value: bool) -> Self {
        Expression::Literal(Literal::Boolean(value))
    }

    pub fn binary(left: Expression, op: BinaryOperator, right: Expression) -> Self {
        Expression::BinaryOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn function(name: &str, args: Vec<Expression>) -> Self {
        Expression::Function {
            name: name.to_string(),
            args,
        }
    }

    pub fn cast(expr: Expression, data_type: &str) -> Self {
        Expression::Cast {
            expr: Box::new(expr),
            data_type: data_type.to_string(),
        }
    }

    pub fn nested(expr: Expression) -> Self {
        Expression::Nested(Box::new(expr))
    }

    /// `NOT (expr)`
    pub fn negate(expr: Expression) -> Self {
        Expression::Not(Box::new(Expression::nested(expr)))
    }

    /// `COALESCE(expr, FALSE)`, turning an unknown result into false.
    pub fn or_false(expr: Expression) -> Self {
        Expression::function("COALESCE", vec![expr, Expression::boolean(false)])
    }

    /// Joins `parts` with `op`, parenthesizing each part. `None` when empty.
    pub fn join(parts: Vec<Expression>, op: BinaryOperator) -> Option<Self> {
        parts
            .into_iter()
            .map(Expression::nested)
            .reduce(|acc, part| Expression::binary(acc, op, part))
    }
}
