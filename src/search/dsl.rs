//! Lowers a [`QueryModel`] into Elasticsearch query DSL.
//!
//! Where-groups keep the relational composition: every AND condition goes
//! into one `bool.must`, which sits next to the OR conditions inside a
//! `bool.should` needing one match.
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{CommandFailure, QueryException};
use crate::metadata::FieldDescriptor;
use crate::query::pattern::to_lucene_regex;
use crate::query::{Condition, ConditionValue, FilterValue, OperatorKind, QueryModel, Record};

fn should_one(clauses: Vec<Value>) -> Value {
    json!({ "bool": { "should": clauses, "minimum_should_match": 1 } })
}

fn must_not(clause: Value) -> Value {
    json!({ "bool": { "must_not": [clause] } })
}

fn term(field: &FieldDescriptor, value: &FilterValue) -> Value {
    match value {
        FilterValue::Null if field.nullable => {
            must_not(json!({ "exists": { "field": field.index_field() } }))
        }
        FilterValue::Null => must_not(json!({ "match_all": {} })),
        other => json!({ "term": { field.index_exact_field(): other.to_json() } }),
    }
}

fn compile_condition(condition: &Condition) -> Result<Value, String> {
    let field = &condition.field;
    let clause = match (condition.operator, &condition.value) {
        (OperatorKind::Equal, ConditionValue::Values(values)) => {
            should_one(values.iter().map(|v| term(field, v)).collect())
        }
        (OperatorKind::NotEqual, ConditionValue::Values(values)) => {
            must_not(should_one(values.iter().map(|v| term(field, v)).collect()))
        }
        (op, ConditionValue::Bound(value)) if op.is_comparison() => {
            json!({ "range": { field.index_exact_field(): { op.wire_name(): value.to_json() } } })
        }
        (op, ConditionValue::Pattern(segments)) if op.is_pattern() => {
            let regexp = json!({
                "regexp": { field.index_exact_field(): { "value": to_lucene_regex(segments) } }
            });
            if op.is_negated() {
                must_not(regexp)
            } else {
                regexp
            }
        }
        (op, _) => return Err(format!("'{}' cannot be applied to this value", op)),
    };
    Ok(clause)
}

/// The where-groups as one clause, or `None` when there are no conditions.
pub fn compile_where(model: &QueryModel) -> Result<Option<Value>, QueryException> {
    let mut failures = Vec::new();
    let mut compile_all = |conditions: Vec<&Condition>| -> Vec<Value> {
        conditions
            .into_iter()
            .filter_map(|c| match compile_condition(c) {
                Ok(clause) => Some(clause),
                Err(message) => {
                    failures.push(CommandFailure::new(c.source.as_str(), message));
                    None
                }
            })
            .collect()
    };

    let and_clauses = compile_all(model.and_conditions().collect());
    let or_clauses = compile_all(model.or_conditions().collect());
    QueryException::check(failures)?;

    if and_clauses.is_empty() && or_clauses.is_empty() {
        return Ok(None);
    }
    let mut should = Vec::with_capacity(or_clauses.len() + 1);
    if !and_clauses.is_empty() {
        should.push(json!({ "bool": { "must": and_clauses } }));
    }
    should.extend(or_clauses);
    Ok(Some(should_one(should)))
}

/// Free-text terms as a pair of `multi_match` queries: fuzzy over text
/// fields, lenient over everything else that is searchable.
pub fn compile_free_text(model: &QueryModel) -> Option<Value> {
    if !model.has_free_text() {
        return None;
    }
    let query = model.free_text_terms.join(" ");
    let (text, other): (Vec<&FieldDescriptor>, Vec<&FieldDescriptor>) = model
        .entity
        .searchable_fields()
        .partition(|f| f.field_type.is_text());

    let mut matches = Vec::new();
    if !text.is_empty() {
        let fields: Vec<String> = text.iter().map(|f| f.index_field()).collect();
        matches.push(json!({
            "multi_match": {
                "query": query,
                "fields": fields,
                "fuzziness": "AUTO",
                "operator": "and",
                "lenient": true
            }
        }));
    }
    if !other.is_empty() {
        let fields: Vec<String> = other.iter().map(|f| f.index_field()).collect();
        matches.push(json!({
            "multi_match": {
                "query": query,
                "fields": fields,
                "operator": "and",
                "lenient": true
            }
        }));
    }

    if matches.is_empty() {
        None
    } else {
        Some(should_one(matches))
    }
}

/// The complete `query` object shared by `_count` and `_search`.
pub fn compile_query(model: &QueryModel) -> Result<Value, QueryException> {
    let mut must: Vec<Value> = Vec::new();
    must.extend(compile_where(model)?);
    must.extend(compile_free_text(model));

    let query = match must.len() {
        0 => json!({ "match_all": {} }),
        1 => must.remove(0),
        _ => json!({ "bool": { "must": must } }),
    };
    debug!(entity = %model.entity.name(), query = %query, "search query");
    Ok(query)
}

pub fn compile_sort(model: &QueryModel) -> Vec<Value> {
    if model.order.is_empty() {
        return vec![json!({ "_score": { "order": "desc" } })];
    }
    model
        .order
        .iter()
        .map(|o| {
            let order = if o.ascending { "asc" } else { "desc" };
            json!({ o.field.index_exact_field(): { "order": order, "unmapped_type": "long" } })
        })
        .collect()
}

/// `_source` filter for projection mode.
pub fn compile_source(model: &QueryModel) -> Option<Value> {
    if !model.is_projection() {
        return None;
    }
    let includes: Vec<String> = model.select.iter().map(|f| f.index_field()).collect();
    Some(json!({ "includes": includes }))
}

/// Renames camelCase document keys back to API field names. Keys the entity
/// does not declare are kept as they are.
pub fn to_record(model: &QueryModel, source: Record) -> Record {
    source
        .into_iter()
        .map(|(key, value)| {
            let name = model
                .entity
                .field_by_index_name(&key)
                .map(|f| f.name.clone())
                .unwrap_or(key);
            (name, value)
        })
        .collect()
}
