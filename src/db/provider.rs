//! Relational list queries.
//!
//! A [`QueryModel`] is lowered into the SQL AST, simplified by the optimizer
//! and rendered to PostgreSQL. Execution order is fixed: count, page, then
//! one extra query per included relation.
use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

use super::query::RelationalExecutor;
use crate::ast::{
    compile, BinaryOperator, Expression, Literal, OrderByExpr, Optimizer, SelectItem,
    SelectQuery, TableRef,
};
use crate::error::{CommandFailure, QueryError, QueryException};
use crate::metadata::{
    EntityMetadata, EntityRegistry, FieldDescriptor, FieldType, RelationDescriptor, RelationKind,
};
use crate::query::pattern::to_posix_regex;
use crate::query::{
    Condition, ConditionValue, FilterValue, OperatorKind, QueryModel, QueryResult, Record,
};

pub struct RelationalQueryProvider {
    executor: Arc<dyn RelationalExecutor>,
    registry: Arc<EntityRegistry>,
    model: QueryModel,
}

impl RelationalQueryProvider {
    pub fn new(
        executor: Arc<dyn RelationalExecutor>,
        registry: Arc<EntityRegistry>,
        model: QueryModel,
    ) -> Self {
        Self {
            executor,
            registry,
            model,
        }
    }

    pub async fn execute<T: DeserializeOwned>(self) -> Result<QueryResult<T>, QueryError> {
        let entity = self.model.entity.name().to_string();

        let count_sql = compile_count(&self.model)?;
        debug!(entity = %entity, sql = %count_sql, "count query");
        let total_count = self.executor.fetch_count(&count_sql).await?;

        let page_sql = compile_page(&self.model)?;
        debug!(entity = %entity, sql = %page_sql, "page query");
        let mut records = self.executor.fetch_records(&page_sql).await?;

        if !self.model.is_projection() {
            for relation in &self.model.includes {
                self.load_include(relation, &mut records).await?;
            }
        }

        info!(
            entity = %entity,
            total_count,
            returned = records.len(),
            "relational list query"
        );

        let records = records
            .into_iter()
            .map(|r| serde_json::from_value(Value::Object(r)))
            .collect::<Result<Vec<T>, _>>()?;
        Ok(QueryResult {
            records,
            total_count,
        })
    }

    /// Loads `relation` for every record with one query and attaches it under
    /// the relation name.
    async fn load_include(
        &self,
        relation: &RelationDescriptor,
        records: &mut [Record],
    ) -> Result<(), QueryError> {
        let entity = &self.model.entity;
        let target = self.registry.get(&relation.target).ok_or_else(|| {
            QueryException::single(
                relation.name.as_str(),
                format!("unknown relation target '{}'", relation.target),
            )
        })?;

        match &relation.kind {
            RelationKind::BelongsTo { local_field } => {
                let local = entity.field(local_field).map(|f| f.name.clone());
                let keys = collect_keys(records, local.as_deref().unwrap_or(local_field));
                let related = if keys.is_empty() {
                    Vec::new()
                } else {
                    let sql = compile_include(&target, target.identity(), &keys)?;
                    debug!(relation = %relation.name, sql = %sql, "include query");
                    self.executor.fetch_records(&sql).await?
                };

                let identity = &target.identity().name;
                let by_key: HashMap<String, Record> = related
                    .into_iter()
                    .filter_map(|r| Some((key_of(r.get(identity)?)?, r)))
                    .collect();
                for record in records.iter_mut() {
                    let value = local
                        .as_deref()
                        .and_then(|name| record.get(name))
                        .and_then(key_of)
                        .and_then(|k| by_key.get(&k).cloned())
                        .map(Value::Object)
                        .unwrap_or(Value::Null);
                    record.insert(relation.name.clone(), value);
                }
            }
            RelationKind::HasMany { foreign_key } => {
                let identity = entity.identity().name.clone();
                let keys = collect_keys(records, &identity);
                let foreign = target.field(foreign_key).ok_or_else(|| {
                    QueryException::single(
                        relation.name.as_str(),
                        format!("'{}' is not a field of '{}'", foreign_key, target.name()),
                    )
                })?;
                let related = if keys.is_empty() {
                    Vec::new()
                } else {
                    let sql = compile_include(&target, foreign, &keys)?;
                    debug!(relation = %relation.name, sql = %sql, "include query");
                    self.executor.fetch_records(&sql).await?
                };

                let mut by_key: HashMap<String, Vec<Value>> = HashMap::new();
                for r in related {
                    if let Some(key) = r.get(&foreign.name).and_then(key_of) {
                        by_key.entry(key).or_default().push(Value::Object(r));
                    }
                }
                for record in records.iter_mut() {
                    let children = record
                        .get(&identity)
                        .and_then(key_of)
                        .and_then(|k| by_key.get(&k).cloned())
                        .unwrap_or_default();
                    record.insert(relation.name.clone(), Value::Array(children));
                }
            }
        }
        Ok(())
    }
}

/// Lookup key for a JSON scalar; nulls and structured values have none.
fn key_of(value: &Value) -> Option<String> {
    match value {
        Value::Number(_) | Value::String(_) | Value::Bool(_) => Some(value.to_string()),
        _ => None,
    }
}

fn collect_keys(records: &[Record], field: &str) -> Vec<Value> {
    let mut seen = std::collections::HashSet::new();
    records
        .iter()
        .filter_map(|r| r.get(field))
        .filter(|v| key_of(v).is_some_and(|k| seen.insert(k)))
        .cloned()
        .collect()
}

fn json_literal(value: &Value) -> Option<Expression> {
    let literal = match value {
        Value::Number(n) => match n.as_i64() {
            Some(i) => Literal::Integer(i),
            None => Literal::Float(n.as_f64()?),
        },
        Value::String(s) => Literal::String(s.clone()),
        Value::Bool(b) => Literal::Boolean(*b),
        _ => return None,
    };
    Some(Expression::Literal(literal))
}

fn table_ref(entity: &EntityMetadata) -> TableRef {
    TableRef {
        schema: entity.schema().map(str::to_string),
        name: entity.table().to_string(),
    }
}

fn column(field: &FieldDescriptor) -> Expression {
    Expression::column(&field.column)
}

/// Column as read back into a record. Floats are widened so NUMERIC and REAL
/// columns decode the same way.
fn read_column(field: &FieldDescriptor) -> SelectItem {
    let expr = match field.field_type {
        FieldType::Float => Expression::cast(column(field), "DOUBLE PRECISION"),
        _ => column(field),
    };
    SelectItem::Expression {
        expr,
        alias: Some(field.name.clone()),
    }
}

fn literal(value: &FilterValue) -> Expression {
    Expression::Literal(match value {
        FilterValue::Null => Literal::Null,
        FilterValue::Text(s) => Literal::String(s.clone()),
        FilterValue::Integer(i) => Literal::Integer(*i),
        FilterValue::Float(f) => Literal::Float(*f),
        FilterValue::Boolean(b) => Literal::Boolean(*b),
        FilterValue::DateTime(dt) => Literal::Timestamp(*dt),
    })
}

fn equals_any(field: &FieldDescriptor, values: &[FilterValue]) -> Expression {
    let parts = values
        .iter()
        .map(|value| match value {
            FilterValue::Null if field.nullable => Expression::IsNull {
                expr: Box::new(column(field)),
                negated: false,
            },
            // A non-nullable column is never null.
            FilterValue::Null => Expression::boolean(false),
            v => Expression::binary(column(field), BinaryOperator::Eq, literal(v)),
        })
        .collect();
    Expression::join(parts, BinaryOperator::Or).unwrap_or(Expression::boolean(false))
}

fn compile_condition(condition: &Condition) -> Result<Expression, String> {
    let field = &condition.field;
    let expr = match (condition.operator, &condition.value) {
        (OperatorKind::Equal, ConditionValue::Values(values)) => equals_any(field, values),
        (OperatorKind::NotEqual, ConditionValue::Values(values)) => {
            Expression::negate(Expression::or_false(equals_any(field, values)))
        }
        (op, ConditionValue::Bound(value)) if op.is_comparison() => {
            let sql_op = match op {
                OperatorKind::GreaterThan => BinaryOperator::Gt,
                OperatorKind::GreaterOrEqual => BinaryOperator::GtEq,
                OperatorKind::LessThan => BinaryOperator::Lt,
                _ => BinaryOperator::LtEq,
            };
            Expression::binary(column(field), sql_op, literal(value))
        }
        (op, ConditionValue::Pattern(segments)) if op.is_pattern() => {
            let matched = Expression::binary(
                column(field),
                BinaryOperator::RegexMatch,
                Expression::Literal(Literal::String(to_posix_regex(segments))),
            );
            if op.is_negated() {
                Expression::negate(Expression::or_false(matched))
            } else {
                matched
            }
        }
        (op, _) => return Err(format!("'{}' cannot be applied to this value", op)),
    };
    Ok(expr)
}

/// `(all AND conditions) OR (all OR conditions)` plus free-text terms, or
/// `None` when nothing constrains the result.
pub fn compile_filter(model: &QueryModel) -> Result<Option<Expression>, QueryException> {
    let mut failures = Vec::new();
    let mut compile_all = |conditions: Vec<&Condition>| -> Vec<Expression> {
        conditions
            .into_iter()
            .filter_map(|c| match compile_condition(c) {
                Ok(expr) => Some(expr),
                Err(message) => {
                    failures.push(CommandFailure::new(c.source.as_str(), message));
                    None
                }
            })
            .collect()
    };

    let and_part = Expression::join(
        compile_all(model.and_conditions().collect()),
        BinaryOperator::And,
    );
    let or_part = Expression::join(
        compile_all(model.or_conditions().collect()),
        BinaryOperator::Or,
    );
    QueryException::check(failures)?;

    let mut clauses = Vec::new();
    if and_part.is_some() || or_part.is_some() {
        let where_clause = Expression::join(
            vec![
                and_part.unwrap_or(Expression::boolean(false)),
                or_part.unwrap_or(Expression::boolean(false)),
            ],
            BinaryOperator::Or,
        );
        clauses.extend(where_clause);
    }

    let searchable: Vec<&FieldDescriptor> = model.entity.searchable_fields().collect();
    for term in &model.free_text_terms {
        let matches = searchable
            .iter()
            .map(|field| {
                Expression::binary(
                    Expression::function(
                        "strpos",
                        vec![
                            Expression::cast(column(field), "TEXT"),
                            Expression::Literal(Literal::String(term.clone())),
                        ],
                    ),
                    BinaryOperator::Gt,
                    Expression::Literal(Literal::Integer(0)),
                )
            })
            .collect();
        clauses.extend(Expression::join(matches, BinaryOperator::Or));
    }

    Ok(Expression::join(clauses, BinaryOperator::And))
}

fn render(query: SelectQuery) -> Result<String, QueryException> {
    let query = Optimizer::with_defaults()
        .optimize(query)
        .map_err(|e| QueryException::single("", e.to_string()))?;
    Ok(compile(&query))
}

pub fn compile_count(model: &QueryModel) -> Result<String, QueryException> {
    render(SelectQuery {
        projections: vec![SelectItem::Expression {
            expr: Expression::function("COUNT", vec![Expression::Wildcard]),
            alias: None,
        }],
        from: Some(table_ref(&model.entity)),
        filter: compile_filter(model)?,
        ..Default::default()
    })
}

pub fn compile_page(model: &QueryModel) -> Result<String, QueryException> {
    let entity = &model.entity;
    let fields: Vec<&FieldDescriptor> = if model.is_projection() {
        model.select.iter().collect()
    } else {
        entity.fields().iter().collect()
    };

    let order_by = if model.order.is_empty() {
        vec![OrderByExpr {
            expr: column(entity.identity()),
            asc: true,
        }]
    } else {
        model
            .order
            .iter()
            .map(|o| OrderByExpr {
                expr: column(&o.field),
                asc: o.ascending,
            })
            .collect()
    };

    render(SelectQuery {
        projections: fields.into_iter().map(read_column).collect(),
        from: Some(table_ref(entity)),
        filter: compile_filter(model)?,
        order_by,
        limit: Some(count_literal(model.limit)),
        offset: Some(count_literal(model.skip)),
    })
}

fn count_literal(value: usize) -> Expression {
    Expression::Literal(Literal::Integer(i64::try_from(value).unwrap_or(i64::MAX)))
}

/// `SELECT <all target fields> FROM <target> WHERE <key> IN (...)`.
fn compile_include(
    target: &EntityMetadata,
    key: &FieldDescriptor,
    keys: &[Value],
) -> Result<String, QueryException> {
    render(SelectQuery {
        projections: target.fields().iter().map(read_column).collect(),
        from: Some(table_ref(target)),
        filter: Some(Expression::InList {
            expr: Box::new(column(key)),
            list: keys.iter().filter_map(json_literal).collect(),
            negated: false,
        }),
        order_by: vec![OrderByExpr {
            expr: column(target.identity()),
            asc: true,
        }],
        ..Default::default()
    })
}
