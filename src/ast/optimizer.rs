/// AST optimization and transformation infrastructure.
///
/// Provides a pass-based system for simplifying generated queries. Each pass
/// takes a query, returns a potentially modified one, and preserves its
/// semantics. Passes can be composed and ordered.
use anyhow::Result;

use super::types::*;

/// A single optimization or transformation pass over a query AST.
///
/// Passes should be pure functions: given the same input, they produce
/// the same output.
pub trait OptimizationPass: Send + Sync {
    /// Unique name identifying this pass.
    fn name(&self) -> &str;

    /// Transform a query, returning the optimized version.
    /// Returns the query unchanged if no optimization applies.
    fn transform(&self, query: SelectQuery) -> Result<SelectQuery>;
}

/// Manages and executes a pipeline of optimization passes.
#[derive(Default)]
pub struct Optimizer {
    passes: Vec<Box<dyn OptimizationPass>>,
}

impl Optimizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an optimizer with the default set of passes.
    pub fn with_defaults() -> Self {
        let mut opt = Self::new();
        opt.add_pass(Box::new(FoldBooleanConstants));
        opt.add_pass(Box::new(RemoveRedundantNesting));
        opt
    }

    /// Add an optimization pass to the pipeline.
    pub fn add_pass(&mut self, pass: Box<dyn OptimizationPass>) {
        self.passes.push(pass);
    }

    /// Run all optimization passes on a query in order.
    pub fn optimize(&self, query: SelectQuery) -> Result<SelectQuery> {
        let mut current = query;
        for pass in &self.passes {
            current = pass.transform(current)?;
        }
        Ok(current)
    }

    /// List registered pass names.
    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name()).collect()
    }
}

/// Built-in pass: removes unnecessary nested/parenthesized expressions.
///
/// Transforms `((x))` → `x` where the nesting doesn't affect semantics.
struct RemoveRedundantNesting;

impl OptimizationPass for RemoveRedundantNesting {
    fn name(&self) -> &str {
        "remove_redundant_nesting"
    }

    fn transform(&self, mut query: SelectQuery) -> Result<SelectQuery> {
        // Parentheses directly under WHERE never matter.
        query.filter = query.filter.map(simplify_expr).map(|expr| match expr {
            Expression::Nested(inner) => *inner,
            other => other,
        });
        Ok(query)
    }
}

fn simplify_expr(expr: Expression) -> Expression {
    match expr {
        Expression::Nested(inner) => match *inner {
            // Remove double nesting: ((x)) → x
            Expression::Nested(_) => simplify_expr(*inner),
            // Remove nesting around expressions that bind tighter than any operator
            Expression::Column(_)
            | Expression::Literal(_)
            | Expression::Wildcard
            | Expression::Function { .. }
            | Expression::Cast { .. }
            | Expression::IsNull { .. } => simplify_expr(*inner),
            // Keep nesting for complex expressions (needed for precedence)
            other => Expression::Nested(Box::new(simplify_expr(other))),
        },
        Expression::BinaryOp { left, op, right } => Expression::BinaryOp {
            left: Box::new(simplify_expr(*left)),
            op,
            right: Box::new(simplify_expr(*right)),
        },
        Expression::Not(expr) => Expression::Not(Box::new(simplify_expr(*expr))),
        Expression::Function { name, args } => Expression::Function {
            name,
            args: args.into_iter().map(simplify_expr).collect(),
        },
        other => other,
    }
}

/// Built-in pass: folds `TRUE`/`FALSE` constants out of AND, OR, NOT and
/// `COALESCE`, and drops a filter that folds to `TRUE`.
///
/// `x AND FALSE` and `x OR TRUE` are constant under three-valued logic, so
/// these rewrites hold even when `x` is NULL.
struct FoldBooleanConstants;

impl OptimizationPass for FoldBooleanConstants {
    fn name(&self) -> &str {
        "fold_boolean_constants"
    }

    fn transform(&self, mut query: SelectQuery) -> Result<SelectQuery> {
        query.filter = match query.filter.map(fold_expr) {
            Some(expr) if as_bool(&expr) == Some(true) => None,
            other => other,
        };
        Ok(query)
    }
}

fn as_bool(expr: &Expression) -> Option<bool> {
    match expr {
        Expression::Literal(Literal::Boolean(b)) => Some(*b),
        Expression::Nested(inner) => as_bool(inner),
        _ => None,
    }
}

fn fold_expr(expr: Expression) -> Expression {
    match expr {
        Expression::BinaryOp {
            left,
            op: op @ (BinaryOperator::And | BinaryOperator::Or),
            right,
        } => {
            let left = fold_expr(*left);
            let right = fold_expr(*right);
            // The absorbing element: FALSE for AND, TRUE for OR.
            let absorbing = op == BinaryOperator::Or;
            match (as_bool(&left), as_bool(&right)) {
                (Some(b), _) | (_, Some(b)) if b == absorbing => Expression::boolean(absorbing),
                (Some(_), _) => right,
                (_, Some(_)) => left,
                _ => Expression::binary(left, op, right),
            }
        }
        Expression::Not(inner) => {
            let inner = fold_expr(*inner);
            match as_bool(&inner) {
                Some(b) => Expression::boolean(!b),
                None => Expression::Not(Box::new(inner)),
            }
        }
        Expression::Nested(inner) => {
            let inner = fold_expr(*inner);
            match as_bool(&inner) {
                Some(b) => Expression::boolean(b),
                None => Expression::Nested(Box::new(inner)),
            }
        }
        Expression::Function { name, args } => {
            let args: Vec<Expression> = args.into_iter().map(fold_expr).collect();
            // COALESCE returns its first argument when that is a non-null constant.
            match args.first().and_then(as_bool) {
                Some(b) if name.eq_ignore_ascii_case("COALESCE") => Expression::boolean(b),
                _ => Expression::Function { name, args },
            }
        }
        other => other,
    }
}
