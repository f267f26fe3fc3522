//! Entity capability descriptors.
//!
//! Every entity type that can be listed is described once, at startup, by an
//! [`EntityMetadata`]: which fields exist, how they are typed, which of them
//! may be filtered, ordered or searched, which relations can be included and
//! whether the entity is mirrored into the search index. The query builder and
//! both providers work exclusively from these descriptors.
use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Integer,
    Float,
    Boolean,
    #[serde(alias = "datetime", alias = "timestamp")]
    DateTime,
}

impl FieldType {
    pub fn is_text(self) -> bool {
        matches!(self, FieldType::Text)
    }

    pub fn label(self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Boolean => "boolean",
            FieldType::DateTime => "datetime",
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Name used in query strings and in returned records.
    pub name: String,
    /// Column in the relational table; derived from `name` when empty.
    #[serde(default)]
    pub column: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default = "default_true")]
    pub filterable: bool,
    #[serde(default = "default_true")]
    pub orderable: bool,
    /// Eligible for free-text search.
    #[serde(default)]
    pub searchable: bool,
}

impl FieldDescriptor {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            column: to_snake_case(name),
            field_type,
            nullable: false,
            filterable: true,
            orderable: true,
            searchable: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn searchable(mut self) -> Self {
        self.searchable = true;
        self
    }

    pub fn with_column(mut self, column: &str) -> Self {
        self.column = column.to_string();
        self
    }

    pub fn not_filterable(mut self) -> Self {
        self.filterable = false;
        self
    }

    pub fn not_orderable(mut self) -> Self {
        self.orderable = false;
        self
    }

    /// Field name inside search-index documents (camelCase).
    pub fn index_field(&self) -> String {
        to_camel_case(&self.name)
    }

    /// Field used for exact matching, range and sort in the search index.
    /// Text fields are analyzed, so those go through their keyword sub-field.
    pub fn index_exact_field(&self) -> String {
        if self.field_type.is_text() {
            format!("{}.keyword", self.index_field())
        } else {
            self.index_field()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelationKind {
    /// This entity holds `local_field`, pointing at the target's identity.
    BelongsTo { local_field: String },
    /// The target holds `foreign_key`, pointing back at this entity's identity.
    HasMany { foreign_key: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDescriptor {
    pub name: String,
    /// Name of the related entity in the registry.
    pub target: String,
    #[serde(flatten)]
    pub kind: RelationKind,
}

impl RelationDescriptor {
    pub fn belongs_to(name: &str, target: &str, local_field: &str) -> Self {
        Self {
            name: name.to_string(),
            target: target.to_string(),
            kind: RelationKind::BelongsTo {
                local_field: local_field.to_string(),
            },
        }
    }

    pub fn has_many(name: &str, target: &str, foreign_key: &str) -> Self {
        Self {
            name: name.to_string(),
            target: target.to_string(),
            kind: RelationKind::HasMany {
                foreign_key: foreign_key.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetadataError {
    #[error("entity '{entity}' declares field '{field}' more than once")]
    DuplicateField { entity: String, field: String },
    #[error("entity '{entity}' has no identity field '{field}'")]
    MissingIdentity { entity: String, field: String },
    #[error("entity '{0}' is registered more than once")]
    DuplicateEntity(String),
    #[error("relation '{relation}' of '{entity}' points at unknown entity '{target}'")]
    UnknownRelationTarget {
        entity: String,
        relation: String,
        target: String,
    },
    #[error("relation '{relation}' of '{entity}' uses unknown field '{field}'")]
    UnknownRelationField {
        entity: String,
        relation: String,
        field: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityMetadata {
    name: String,
    schema: Option<String>,
    table: String,
    identity: String,
    indexed: bool,
    max_list_size: Option<usize>,
    fields: Vec<FieldDescriptor>,
    relations: Vec<RelationDescriptor>,
}

impl EntityMetadata {
    pub fn builder(name: &str) -> EntityMetadataBuilder {
        EntityMetadataBuilder {
            name: name.to_string(),
            schema: None,
            table: None,
            identity: "Id".to_string(),
            indexed: false,
            max_list_size: None,
            fields: Vec::new(),
            relations: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Whether this entity is mirrored into the search index.
    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    pub fn max_list_size(&self) -> Option<usize> {
        self.max_list_size
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn relations(&self) -> &[RelationDescriptor] {
        &self.relations
    }

    pub fn identity(&self) -> &FieldDescriptor {
        // Presence is checked by the builder.
        self.fields
            .iter()
            .find(|f| f.name == self.identity)
            .unwrap_or(&self.fields[0])
    }

    /// Exact match first, then a case-insensitive one.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .or_else(|| self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name)))
    }

    /// Looks a field up by its search-index (camelCase) name.
    pub fn field_by_index_name(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.index_field() == name)
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDescriptor> {
        self.relations
            .iter()
            .find(|r| r.name == name)
            .or_else(|| {
                self.relations
                    .iter()
                    .find(|r| r.name.eq_ignore_ascii_case(name))
            })
    }

    pub fn searchable_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.searchable)
    }

    /// `<prefix>-<entity name lowercased>`, or just the lowercased name when
    /// no prefix is configured.
    pub fn index_name(&self, prefix: &str) -> String {
        let name = self.name.to_lowercase();
        if prefix.is_empty() {
            name
        } else {
            format!("{}-{}", prefix, name)
        }
    }
}

pub struct EntityMetadataBuilder {
    name: String,
    schema: Option<String>,
    table: Option<String>,
    identity: String,
    indexed: bool,
    max_list_size: Option<usize>,
    fields: Vec<FieldDescriptor>,
    relations: Vec<RelationDescriptor>,
}

impl EntityMetadataBuilder {
    pub fn schema(mut self, schema: &str) -> Self {
        self.schema = Some(schema.to_string());
        self
    }

    pub fn table(mut self, table: &str) -> Self {
        self.table = Some(table.to_string());
        self
    }

    pub fn identity(mut self, field: &str) -> Self {
        self.identity = field.to_string();
        self
    }

    pub fn indexed(mut self, indexed: bool) -> Self {
        self.indexed = indexed;
        self
    }

    pub fn max_list_size(mut self, size: Option<usize>) -> Self {
        self.max_list_size = size;
        self
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields(mut self, fields: impl IntoIterator<Item = FieldDescriptor>) -> Self {
        self.fields.extend(fields);
        self
    }

    pub fn relation(mut self, relation: RelationDescriptor) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn relations(mut self, relations: impl IntoIterator<Item = RelationDescriptor>) -> Self {
        self.relations.extend(relations);
        self
    }

    pub fn build(self) -> Result<EntityMetadata, MetadataError> {
        let mut fields = self.fields;
        for field in fields.iter_mut().filter(|f| f.column.is_empty()) {
            field.column = to_snake_case(&field.name);
        }
        for (i, field) in fields.iter().enumerate() {
            if fields[..i].iter().any(|f| f.name == field.name) {
                return Err(MetadataError::DuplicateField {
                    entity: self.name.clone(),
                    field: field.name.clone(),
                });
            }
        }
        if !fields.iter().any(|f| f.name == self.identity) {
            return Err(MetadataError::MissingIdentity {
                entity: self.name.clone(),
                field: self.identity.clone(),
            });
        }
        for relation in &self.relations {
            if let RelationKind::BelongsTo { local_field } = &relation.kind {
                if !fields.iter().any(|f| &f.name == local_field) {
                    return Err(MetadataError::UnknownRelationField {
                        entity: self.name.clone(),
                        relation: relation.name.clone(),
                        field: local_field.clone(),
                    });
                }
            }
        }

        let table = self
            .table
            .unwrap_or_else(|| format!("{}s", to_snake_case(&self.name)));

        Ok(EntityMetadata {
            name: self.name,
            schema: self.schema,
            table,
            identity: self.identity,
            indexed: self.indexed,
            max_list_size: self.max_list_size,
            fields,
            relations: self.relations,
        })
    }
}

/// Read-only set of every listable entity, built once at process start.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: HashMap<String, Arc<EntityMetadata>>,
}

impl EntityRegistry {
    pub fn new(entities: Vec<EntityMetadata>) -> Result<Self, MetadataError> {
        let mut map: HashMap<String, Arc<EntityMetadata>> = HashMap::new();
        for entity in entities {
            let key = entity.name.to_lowercase();
            if map.contains_key(&key) {
                return Err(MetadataError::DuplicateEntity(entity.name.clone()));
            }
            map.insert(key, Arc::new(entity));
        }

        // Relations may only point at registered entities.
        for entity in map.values() {
            for relation in &entity.relations {
                let target = map.get(&relation.target.to_lowercase()).ok_or_else(|| {
                    MetadataError::UnknownRelationTarget {
                        entity: entity.name.clone(),
                        relation: relation.name.clone(),
                        target: relation.target.clone(),
                    }
                })?;
                if let RelationKind::HasMany { foreign_key } = &relation.kind {
                    if target.field(foreign_key).is_none() {
                        return Err(MetadataError::UnknownRelationField {
                            entity: entity.name.clone(),
                            relation: relation.name.clone(),
                            field: foreign_key.clone(),
                        });
                    }
                }
            }
        }

        Ok(Self { entities: map })
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<Arc<EntityMetadata>> {
        self.entities.get(&name.to_lowercase()).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entities.values().map(|e| e.name()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// `AffiliateName` -> `affiliate_name`, `ContactIP` -> `contact_ip`.
pub fn to_snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev_lower = i > 0 && (chars[i - 1].is_lowercase() || chars[i - 1].is_ascii_digit());
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            let prev_upper = i > 0 && chars[i - 1].is_uppercase();
            if i > 0 && (prev_lower || (prev_upper && next_lower)) && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// `AffiliateName` -> `affiliateName`.
pub fn to_camel_case(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snake_case() {
        assert_eq!(to_snake_case("AffiliateName"), "affiliate_name");
        assert_eq!(to_snake_case("Id"), "id");
        assert_eq!(to_snake_case("ContactIP"), "contact_ip");
        assert_eq!(to_snake_case("HTTPStatus"), "http_status");
        assert_eq!(to_snake_case("already_snake"), "already_snake");
    }

    #[test]
    fn test_camel_case() {
        assert_eq!(to_camel_case("AffiliateName"), "affiliateName");
        assert_eq!(to_camel_case("Id"), "id");
        assert_eq!(to_camel_case(""), "");
    }

    #[test]
    fn test_index_exact_field_uses_keyword_for_text() {
        let text = FieldDescriptor::new("AffiliateName", FieldType::Text);
        assert_eq!(text.index_exact_field(), "affiliateName.keyword");
        let num = FieldDescriptor::new("ExchangeRate", FieldType::Float);
        assert_eq!(num.index_exact_field(), "exchangeRate");
    }

    #[test]
    fn test_builder_defaults() {
        let order = fixtures::order();
        assert_eq!(order.table(), "orders");
        assert_eq!(order.identity().name, "Id");
        assert!(order.is_indexed());
        assert_eq!(order.field("AffiliateName").unwrap().column, "affiliate_name");
        assert_eq!(order.index_name("onlinesales"), "onlinesales-order");
        assert_eq!(order.index_name(""), "order");
    }

    #[test]
    fn test_field_lookup_falls_back_to_case_insensitive() {
        let order = fixtures::order();
        assert_eq!(order.field("affiliatename").unwrap().name, "AffiliateName");
        assert!(order.field("Missing").is_none());
        assert_eq!(
            order.field_by_index_name("contactIp").unwrap().name,
            "ContactIp"
        );
    }

    #[test]
    fn test_searchable_fields() {
        let order = fixtures::order();
        let names: Vec<&str> = order.searchable_fields().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["AffiliateName", "ContactIp", "ExchangeRate"]);
    }

    #[test]
    fn test_missing_identity_rejected() {
        let err = EntityMetadata::builder("Thing")
            .field(FieldDescriptor::new("Name", FieldType::Text))
            .build()
            .unwrap_err();
        assert!(matches!(err, MetadataError::MissingIdentity { .. }));
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let err = EntityMetadata::builder("Thing")
            .field(FieldDescriptor::new("Id", FieldType::Integer))
            .field(FieldDescriptor::new("Id", FieldType::Integer))
            .build()
            .unwrap_err();
        assert!(matches!(err, MetadataError::DuplicateField { .. }));
    }

    #[test]
    fn test_registry_rejects_unknown_relation_target() {
        let err = EntityRegistry::new(vec![fixtures::order()]).unwrap_err();
        assert!(matches!(err, MetadataError::UnknownRelationTarget { .. }));
    }

    #[test]
    fn test_registry_lookup_is_case_insensitive() {
        let registry = fixtures::registry();
        assert_eq!(registry.len(), 4);
        assert!(registry.get("order").is_some());
        assert!(registry.get("ORDERITEM").is_some());
        assert!(registry.get("widget").is_none());
        assert_eq!(
            registry.names(),
            vec!["Contact", "EmailGroup", "Order", "OrderItem"]
        );
    }

    #[test]
    fn test_relation_deserializes_from_toml() {
        let relation: RelationDescriptor = toml::from_str(
            r#"
            name = "Contact"
            target = "Contact"
            kind = "belongs_to"
            local_field = "ContactId"
            "#,
        )
        .unwrap();
        assert_eq!(
            relation,
            RelationDescriptor::belongs_to("Contact", "Contact", "ContactId")
        );
    }
}
