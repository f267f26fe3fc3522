use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

use super::command::OperatorKind;
use super::pattern::PatternSegment;
use crate::metadata::{EntityMetadata, FieldDescriptor, FieldType, RelationDescriptor};

/// Records as returned by both providers: API field name -> value.
pub type Record = serde_json::Map<String, Value>;

/// A filter operand, already parsed into the field's type.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    DateTime(DateTime<Utc>),
}

impl FilterValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FilterValue::Null)
    }

    /// Parse a raw query-string token into `field_type`.
    pub fn parse(raw: &str, field_type: FieldType) -> Result<Self, String> {
        let invalid = || format!("'{}' is not a valid {}", raw, field_type.label());
        match field_type {
            FieldType::Text => Ok(FilterValue::Text(raw.to_string())),
            FieldType::Integer => raw
                .trim()
                .parse::<i64>()
                .map(FilterValue::Integer)
                .map_err(|_| invalid()),
            FieldType::Float => match raw.trim().parse::<f64>() {
                Ok(f) if f.is_finite() => Ok(FilterValue::Float(f)),
                _ => Err(invalid()),
            },
            FieldType::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(FilterValue::Boolean(true)),
                "false" | "0" => Ok(FilterValue::Boolean(false)),
                _ => Err(invalid()),
            },
            FieldType::DateTime => parse_datetime(raw.trim())
                .map(FilterValue::DateTime)
                .ok_or_else(invalid),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FilterValue::Null => Value::Null,
            FilterValue::Text(s) => Value::String(s.clone()),
            FilterValue::Integer(i) => Value::from(*i),
            FilterValue::Float(f) => Value::from(*f),
            FilterValue::Boolean(b) => Value::Bool(*b),
            FilterValue::DateTime(dt) => Value::String(dt.to_rfc3339()),
        }
    }
}

/// RFC 3339, `YYYY-MM-DDTHH:MM:SS[.fff]` or `YYYY-MM-DD`; naive values are UTC.
pub fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConditionValue {
    /// eq/neq alternatives; the condition holds when any of them matches.
    Values(Vec<FilterValue>),
    /// Right-hand side of a comparison.
    Bound(FilterValue),
    Pattern(Vec<PatternSegment>),
}

/// A validated `filter[where]` command.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: FieldDescriptor,
    pub operator: OperatorKind,
    pub value: ConditionValue,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhereGroup {
    pub group_id: String,
    pub is_or: bool,
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderSpec {
    pub field: FieldDescriptor,
    pub ascending: bool,
}

/// Backend-neutral description of one list request.
#[derive(Debug, Clone)]
pub struct QueryModel {
    pub entity: Arc<EntityMetadata>,
    pub groups: Vec<WhereGroup>,
    pub order: Vec<OrderSpec>,
    pub select: Vec<FieldDescriptor>,
    pub includes: Vec<RelationDescriptor>,
    pub skip: usize,
    pub limit: usize,
    pub free_text_terms: Vec<String>,
}

impl QueryModel {
    /// An unfiltered model: first `limit` rows in default order.
    pub fn new(entity: Arc<EntityMetadata>, limit: usize) -> Self {
        Self {
            entity,
            groups: Vec::new(),
            order: Vec::new(),
            select: Vec::new(),
            includes: Vec::new(),
            skip: 0,
            limit,
            free_text_terms: Vec::new(),
        }
    }

    pub fn and_conditions(&self) -> impl Iterator<Item = &Condition> {
        self.groups
            .iter()
            .filter(|g| !g.is_or)
            .flat_map(|g| g.conditions.iter())
    }

    pub fn or_conditions(&self) -> impl Iterator<Item = &Condition> {
        self.groups
            .iter()
            .filter(|g| g.is_or)
            .flat_map(|g| g.conditions.iter())
    }

    pub fn has_free_text(&self) -> bool {
        !self.free_text_terms.is_empty()
    }

    pub fn is_projection(&self) -> bool {
        !self.select.is_empty()
    }
}

/// One page of records plus the number of records matching the filter.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult<T = Record> {
    pub records: Vec<T>,
    pub total_count: i64,
}

impl<T> QueryResult<T> {
    pub fn empty() -> Self {
        Self {
            records: Vec::new(),
            total_count: 0,
        }
    }
}
