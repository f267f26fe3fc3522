/// AST → SQL compiler.
///
/// Renders a [`SelectQuery`] as a PostgreSQL statement. Identifiers are always
/// double-quoted and string literals are escaped by doubling quotes, so values
/// taken from the query string never reach the server unescaped.
use super::types::*;

/// Compile a query AST into a PostgreSQL SQL string.
pub fn compile(select: &SelectQuery) -> String {
    let mut parts = Vec::new();

    let mut select_clause = String::from("SELECT ");
    if select.projections.is_empty() {
        select_clause.push('*');
    } else {
        let items: Vec<String> = select.projections.iter().map(compile_select_item).collect();
        select_clause.push_str(&items.join(", "));
    }
    parts.push(select_clause);

    if let Some(ref table) = select.from {
        parts.push(format!("FROM {}", compile_table_ref(table)));
    }

    if let Some(ref filter) = select.filter {
        parts.push(format!("WHERE {}", compile_expr(filter)));
    }

    if !select.order_by.is_empty() {
        let orders: Vec<String> = select.order_by.iter().map(compile_order_by).collect();
        parts.push(format!("ORDER BY {}", orders.join(", ")));
    }

    if let Some(ref limit) = select.limit {
        parts.push(format!("LIMIT {}", compile_expr(limit)));
    }

    if let Some(ref offset) = select.offset {
        parts.push(format!("OFFSET {}", compile_expr(offset)));
    }

    parts.join(" ")
}

/// `name` -> `"name"`, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn compile_select_item(item: &SelectItem) -> String {
    match item {
        SelectItem::Wildcard => "*".to_string(),
        SelectItem::Expression { expr, alias } => {
            let expr_str = compile_expr(expr);
            match alias {
                Some(a) => format!("{} AS {}", expr_str, quote_ident(a)),
                None => expr_str,
            }
        }
    }
}

fn compile_table_ref(table: &TableRef) -> String {
    match &table.schema {
        Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&table.name)),
        None => quote_ident(&table.name),
    }
}

fn compile_expr(expr: &Expression) -> String {
    match expr {
        Expression::Column(name) => quote_ident(name),
        Expression::Literal(lit) => compile_literal(lit),
        Expression::BinaryOp { left, op, right } => {
            let op_str = match op {
                BinaryOperator::Eq => "=",
                BinaryOperator::Lt => "<",
                BinaryOperator::LtEq => "<=",
                BinaryOperator::Gt => ">",
                BinaryOperator::GtEq => ">=",
                BinaryOperator::And => "AND",
                BinaryOperator::Or => "OR",
                BinaryOperator::RegexMatch => "~",
            };
            format!("{} {} {}", compile_expr(left), op_str, compile_expr(right))
        }
        Expression::Not(expr) => format!("NOT {}", compile_expr(expr)),
        Expression::Function { name, args } => {
            let args_str: Vec<String> = args.iter().map(compile_expr).collect();
            format!("{}({})", name, args_str.join(", "))
        }
        Expression::InList {
            expr,
            list,
            negated,
        } => {
            let not_str = if *negated { "NOT " } else { "" };
            let items: Vec<String> = list.iter().map(compile_expr).collect();
            format!(
                "{} {}IN ({})",
                compile_expr(expr),
                not_str,
                items.join(", ")
            )
        }
        Expression::IsNull { expr, negated } => {
            if *negated {
                format!("{} IS NOT NULL", compile_expr(expr))
            } else {
                format!("{} IS NULL", compile_expr(expr))
            }
        }
        Expression::Cast { expr, data_type } => {
            format!("CAST({} AS {})", compile_expr(expr), data_type)
        }
        Expression::Wildcard => "*".to_string(),
        Expression::Nested(expr) => format!("({})", compile_expr(expr)),
    }
}

fn compile_literal(lit: &Literal) -> String {
    match lit {
        Literal::Null => "NULL".to_string(),
        Literal::Boolean(b) => {
            if *b {
                "TRUE".to_string()
            } else {
                "FALSE".to_string()
            }
        }
        Literal::Integer(i) => i.to_string(),
        Literal::Float(f) => format!("{}", f),
        Literal::String(s) => quote_string(s),
        Literal::Timestamp(ts) => format!("CAST({} AS TIMESTAMPTZ)", quote_string(&ts.to_rfc3339())),
    }
}

fn quote_string(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn compile_order_by(order: &OrderByExpr) -> String {
    let dir = if order.asc { "ASC" } else { "DESC" };
    format!("{} {}", compile_expr(&order.expr), dir)
}
