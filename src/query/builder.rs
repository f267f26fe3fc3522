//! Validates parsed directives against an entity's metadata and assembles a
//! [`QueryModel`]. Every offending directive is reported, not only the first.
use std::sync::Arc;

use tracing::debug;

use super::command::{Command, Directive, OperatorKind};
use super::model::{Condition, ConditionValue, FilterValue, OrderSpec, QueryModel, WhereGroup};
use super::pattern::{check_syntax, parse_contains, parse_like};
use crate::error::{CommandFailure, QueryValidationError};
use crate::metadata::{EntityMetadata, FieldDescriptor};

/// Token standing for "no value" in eq/neq alternatives.
pub const NULL_TOKEN: &str = "null";

/// Largest skip/limit either backend accepts (a signed 64-bit count).
pub const MAX_OFFSET: usize = i64::MAX as usize;

pub fn build(
    directives: Vec<Directive>,
    max_limit: usize,
    entity: Arc<EntityMetadata>,
) -> Result<QueryModel, QueryValidationError> {
    let mut model = QueryModel::new(entity.clone(), max_limit);
    let mut failures = Vec::new();
    let mut orders: Vec<(usize, OrderSpec)> = Vec::new();
    let mut limit = None;

    for directive in directives {
        match directive {
            Directive::Where(cmd) => match build_condition(&entity, &cmd) {
                Ok(condition) => add_condition(&mut model.groups, &cmd, condition),
                Err(message) => failures.push(CommandFailure::new(cmd.source, message)),
            },
            Directive::Order(order) => match entity.field(&order.field) {
                Some(field) if field.orderable => orders.push((
                    order.index,
                    OrderSpec {
                        field: field.clone(),
                        ascending: order.ascending,
                    },
                )),
                Some(field) => failures.push(CommandFailure::new(
                    order.source,
                    format!("field '{}' cannot be used for ordering", field.name),
                )),
                None => failures.push(CommandFailure::new(
                    order.source,
                    unknown_field(&entity, &order.field),
                )),
            },
            Directive::Skip { value, .. } => model.skip = value.min(MAX_OFFSET),
            Directive::Limit { value, .. } => limit = Some(value),
            Directive::Include { path, source } => match entity.relation(&path) {
                Some(relation) => {
                    if !model.includes.iter().any(|r| r.name == relation.name) {
                        model.includes.push(relation.clone());
                    }
                }
                None => failures.push(CommandFailure::new(
                    source,
                    format!("'{}' is not a relation of '{}'", path, entity.name()),
                )),
            },
            Directive::Select { field, source } => match entity.field(&field) {
                Some(descriptor) => {
                    if !model.select.iter().any(|f| f.name == descriptor.name) {
                        model.select.push(descriptor.clone());
                    }
                }
                None => failures.push(CommandFailure::new(source, unknown_field(&entity, &field))),
            },
            Directive::FreeText(text) => {
                let term = text.trim();
                if !term.is_empty() {
                    model.free_text_terms.push(term.to_string());
                }
            }
        }
    }

    QueryValidationError::check(failures)?;

    // Stable: keys sharing an index keep their query-string order.
    orders.sort_by_key(|(index, _)| *index);
    model.order = orders.into_iter().map(|(_, order)| order).collect();

    model.limit = match limit {
        None | Some(0) => max_limit,
        Some(n) => n.min(max_limit),
    }
    .min(MAX_OFFSET);

    debug!(
        entity = entity.name(),
        groups = model.groups.len(),
        skip = model.skip,
        limit = model.limit,
        "built query model"
    );
    Ok(model)
}

fn unknown_field(entity: &EntityMetadata, name: &str) -> String {
    format!("'{}' is not a field of '{}'", name, entity.name())
}

fn add_condition(groups: &mut Vec<WhereGroup>, cmd: &Command, condition: Condition) {
    match groups.iter_mut().find(|g| g.group_id == cmd.group_id) {
        Some(group) => group.conditions.push(condition),
        None => groups.push(WhereGroup {
            group_id: cmd.group_id.clone(),
            is_or: cmd.is_or,
            conditions: vec![condition],
        }),
    }
}

fn build_condition(entity: &EntityMetadata, cmd: &Command) -> Result<Condition, String> {
    if cmd.path.len() > 1 {
        return Err(unknown_field(entity, &cmd.path.join(".")));
    }
    let field = entity
        .field(cmd.field_name())
        .ok_or_else(|| unknown_field(entity, cmd.field_name()))?;
    if !field.filterable {
        return Err(format!("field '{}' cannot be filtered", field.name));
    }

    let raw = cmd.raw_value.as_str();
    let value = match cmd.operator {
        OperatorKind::Equal | OperatorKind::NotEqual => {
            let values = split_alternatives(raw)
                .iter()
                .map(|token| parse_alternative(field, token))
                .collect::<Result<Vec<_>, _>>()?;
            ConditionValue::Values(values)
        }
        op if op.is_comparison() => {
            if raw.is_empty() || raw == NULL_TOKEN {
                return Err(format!("'{}' requires a value", op));
            }
            ConditionValue::Bound(FilterValue::parse(raw, field.field_type)?)
        }
        op => {
            if !field.field_type.is_text() {
                return Err(format!(
                    "'{}' is not supported on {} field '{}'",
                    op,
                    field.field_type.label(),
                    field.name
                ));
            }
            let segments = match op {
                OperatorKind::Like | OperatorKind::NotLike => parse_like(raw),
                _ => parse_contains(raw),
            };
            check_syntax(&segments)?;
            ConditionValue::Pattern(segments)
        }
    };

    Ok(Condition {
        field: field.clone(),
        operator: cmd.operator,
        value,
        source: cmd.source.clone(),
    })
}

/// Split on `|`; `\|` stands for a literal pipe.
fn split_alternatives(raw: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'|') => {
                chars.next();
                current.push('|');
            }
            '|' => tokens.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    tokens.push(current);
    tokens
}

fn parse_alternative(field: &FieldDescriptor, token: &str) -> Result<FilterValue, String> {
    if token == NULL_TOKEN {
        return Ok(FilterValue::Null);
    }
    if token.is_empty() {
        return if field.nullable {
            Ok(FilterValue::Null)
        } else if field.field_type.is_text() {
            Ok(FilterValue::Text(String::new()))
        } else {
            Err(format!(
                "empty value for non-nullable {} field '{}'",
                field.field_type.label(),
                field.name
            ))
        };
    }
    FilterValue::parse(token, field.field_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::fixtures;
    use crate::query::parser::parse;
    use crate::query::pattern::PatternSegment;

    fn build_order(raw: &str) -> Result<QueryModel, QueryValidationError> {
        build(parse(raw).unwrap(), 100, Arc::new(fixtures::order()))
    }

    fn only_condition(model: &QueryModel) -> &Condition {
        assert_eq!(model.groups.len(), 1);
        assert_eq!(model.groups[0].conditions.len(), 1);
        &model.groups[0].conditions[0]
    }

    #[test]
    fn test_defaults() {
        let model = build_order("").unwrap();
        assert!(model.groups.is_empty());
        assert!(model.order.is_empty());
        assert_eq!(model.skip, 0);
        assert_eq!(model.limit, 100);
        assert!(!model.has_free_text());
    }

    #[test]
    fn test_eq_alternatives_with_escaped_pipe() {
        let model = build_order("filter[where][AffiliateName][eq]=Test1|Tes\\|t4").unwrap();
        assert_eq!(
            only_condition(&model).value,
            ConditionValue::Values(vec![
                FilterValue::Text("Test1".into()),
                FilterValue::Text("Tes|t4".into()),
            ])
        );
    }

    #[test]
    fn test_empty_value_rules() {
        // Nullable: empty means null.
        let model = build_order("filter[where][ContactIp][eq]=").unwrap();
        assert_eq!(
            only_condition(&model).value,
            ConditionValue::Values(vec![FilterValue::Null])
        );

        // Non-nullable text: empty string.
        let model = build_order("filter[where][Currency][eq]=").unwrap();
        assert_eq!(
            only_condition(&model).value,
            ConditionValue::Values(vec![FilterValue::Text(String::new())])
        );

        // Non-nullable non-text: rejected.
        let err = build_order("filter[where][CreatedAt][eq]=").unwrap_err();
        assert!(err.failures()[0].message.contains("non-nullable"));
    }

    #[test]
    fn test_null_token_is_accepted_on_non_nullable() {
        let model = build_order("filter[where][CreatedAt][eq]=null").unwrap();
        assert_eq!(
            only_condition(&model).value,
            ConditionValue::Values(vec![FilterValue::Null])
        );
    }

    #[test]
    fn test_typed_comparisons() {
        let model = build_order("filter[where][ExchangeRate][gte]=1.5").unwrap();
        assert_eq!(
            only_condition(&model).value,
            ConditionValue::Bound(FilterValue::Float(1.5))
        );
        assert!(build_order("filter[where][Id][gt]=").is_err());
        assert!(build_order("filter[where][Id][gt]=null").is_err());
        assert!(build_order("filter[where][CreatedAt][lt]=yesterday").is_err());
    }

    #[test]
    fn test_pattern_operators_require_text() {
        let err = build_order("filter[where][CreatedAt][like]=2024*").unwrap_err();
        assert!(err.failures()[0].message.contains("datetime"));
        assert!(build_order("filter[where][CreatedAt][contains]=2024").is_err());

        let model = build_order("filter[where][AffiliateName][contains]=*Test*").unwrap();
        assert_eq!(
            only_condition(&model).value,
            ConditionValue::Pattern(vec![
                PatternSegment::AnyRun,
                PatternSegment::Literal("Test".into()),
                PatternSegment::AnyRun,
            ])
        );
    }

    #[test]
    fn test_invalid_like_pattern() {
        let err = build_order("filter[where][AffiliateName][like]=Test(").unwrap_err();
        assert!(err.failures()[0].message.starts_with("invalid pattern"));
    }

    #[test]
    fn test_failures_are_aggregated() {
        let err = build_order(
            "filter[where][Missing]=1&filter[where][Id][gt]=x&filter[order]=Nope&filter[include]=Ghost&filter[select]=Gone",
        )
        .unwrap_err();
        assert_eq!(err.failures().len(), 5);
        assert_eq!(err.failures()[0].source, "filter[where][Missing]=1");
    }

    #[test]
    fn test_field_rules() {
        assert!(build_order("filter[where][Contact.Email]=x").is_err());
        assert!(build_order("filter[where][Notes]=x").is_err());
        assert!(build_order("filter[order]=Notes").is_err());
        let model = build_order("filter[where][affiliatename]=x").unwrap();
        assert_eq!(only_condition(&model).field.name, "AffiliateName");
    }

    #[test]
    fn test_groups() {
        let model = build_order(
            "filter[where][or][Id]=1&filter[where][Currency]=USD&filter[where][or][Id]=2",
        )
        .unwrap();
        assert_eq!(model.groups.len(), 2);
        assert_eq!(model.and_conditions().count(), 1);
        assert_eq!(model.or_conditions().count(), 2);
    }

    #[test]
    fn test_order_sorted_by_index() {
        let model =
            build_order("filter[order][1]=Id DESC&filter[order][0]=AffiliateName ASC").unwrap();
        let keys: Vec<(&str, bool)> = model
            .order
            .iter()
            .map(|o| (o.field.name.as_str(), o.ascending))
            .collect();
        assert_eq!(keys, vec![("AffiliateName", true), ("Id", false)]);
    }

    #[test]
    fn test_limit_clamping() {
        assert_eq!(build_order("filter[limit]=0").unwrap().limit, 100);
        assert_eq!(build_order("filter[limit]=500").unwrap().limit, 100);
        assert_eq!(build_order("filter[limit]=7").unwrap().limit, 7);
        assert_eq!(build_order("filter[skip]=30").unwrap().skip, 30);
    }

    #[test]
    fn test_skip_and_limit_fit_in_i64() {
        let model = build_order("filter[skip]=18446744073709551615").unwrap();
        assert_eq!(model.skip, i64::MAX as usize);

        let model = build(
            parse("filter[limit]=18446744073709551615").unwrap(),
            usize::MAX,
            Arc::new(fixtures::order()),
        )
        .unwrap();
        assert_eq!(model.limit, i64::MAX as usize);
    }

    #[test]
    fn test_include_select_and_free_text() {
        let model = build_order(
            "filter[include]=Contact&filter[include]=contact&filter[select]=Id&filter[select]=Id&query=%20fate%20&query=",
        )
        .unwrap();
        assert_eq!(model.includes.len(), 1);
        assert_eq!(model.includes[0].name, "Contact");
        assert_eq!(model.select.len(), 1);
        assert!(model.is_projection());
        assert_eq!(model.free_text_terms, vec!["fate"]);
    }

    #[test]
    fn test_split_alternatives() {
        assert_eq!(split_alternatives(""), vec![""]);
        assert_eq!(split_alternatives("a||b"), vec!["a", "", "b"]);
        assert_eq!(split_alternatives("a\\b"), vec!["a\\b"]);
    }
}
