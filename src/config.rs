use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::db::ConnectionConfig;
use crate::metadata::{
    EntityMetadata, EntityRegistry, FieldDescriptor, MetadataError, RelationDescriptor,
};
use crate::search::ElasticConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub postgres: ConnectionConfig,
    /// Search-index backend. Free-text requests stay relational without it.
    pub elastic: Option<ElasticConfig>,
    pub api: ApiConfig,
    pub entities: Vec<EntityConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Largest page a request may ask for, unless the entity overrides it.
    pub max_list_size: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { max_list_size: 100 }
    }
}

fn default_identity() -> String {
    String::from("Id")
}

/// One `[[entities]]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityConfig {
    pub name: String,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default = "default_identity")]
    pub identity: String,
    #[serde(default)]
    pub indexed: bool,
    #[serde(default)]
    pub max_list_size: Option<usize>,
    pub fields: Vec<FieldDescriptor>,
    #[serde(default)]
    pub relations: Vec<RelationDescriptor>,
}

impl EntityConfig {
    pub fn to_metadata(&self) -> Result<EntityMetadata, MetadataError> {
        let mut builder = EntityMetadata::builder(&self.name)
            .identity(&self.identity)
            .indexed(self.indexed)
            .max_list_size(self.max_list_size)
            .fields(self.fields.iter().cloned())
            .relations(self.relations.iter().cloned());
        if let Some(schema) = &self.schema {
            builder = builder.schema(schema);
        }
        if let Some(table) = &self.table {
            builder = builder.table(table);
        }
        builder.build()
    }
}

impl AppConfig {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("listql")
            .join("config.toml")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn registry(&self) -> Result<EntityRegistry> {
        let entities = self
            .entities
            .iter()
            .map(EntityConfig::to_metadata)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(EntityRegistry::new(entities)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{FieldType, RelationKind};

    const SAMPLE: &str = r#"
        [postgres]
        host = "db.internal"
        database = "crm"

        [elastic]
        url = "http://search:9200"
        index_prefix = "crm"

        [api]
        max_list_size = 250

        [[entities]]
        name = "Order"
        indexed = true
        fields = [
            { name = "Id", type = "integer" },
            { name = "AffiliateName", type = "text", searchable = true },
            { name = "ContactId", type = "integer", nullable = true },
            { name = "CreatedAt", type = "datetime", orderable = false },
        ]
        relations = [
            { name = "Contact", target = "Contact", kind = "belongs_to", local_field = "ContactId" },
        ]

        [[entities]]
        name = "Contact"
        schema = "crm"
        table = "contact"
        max_list_size = 20
        fields = [
            { name = "Id", type = "integer" },
            { name = "Email", type = "text", column = "email_address" },
        ]
    "#;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.postgres.port, 5432);
        assert!(config.elastic.is_none());
        assert_eq!(config.api.max_list_size, 100);
        assert!(config.entities.is_empty());
    }

    #[test]
    fn test_full_config() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.postgres.host, "db.internal");
        assert_eq!(config.postgres.database, "crm");
        let elastic = config.elastic.as_ref().unwrap();
        assert_eq!(elastic.index_prefix, "crm");
        assert_eq!(elastic.timeout_secs, 30);
        assert_eq!(config.api.max_list_size, 250);

        let registry = config.registry().unwrap();
        assert_eq!(registry.names(), vec!["Contact", "Order"]);

        let order = registry.get("order").unwrap();
        assert!(order.is_indexed());
        assert_eq!(order.table(), "orders");
        let name = order.field("AffiliateName").unwrap();
        assert_eq!(name.column, "affiliate_name");
        assert!(name.searchable && name.filterable);
        assert!(!order.field("CreatedAt").unwrap().orderable);
        assert_eq!(order.field("CreatedAt").unwrap().field_type, FieldType::DateTime);
        assert!(matches!(
            &order.relation("Contact").unwrap().kind,
            RelationKind::BelongsTo { local_field } if local_field == "ContactId"
        ));

        let contact = registry.get("Contact").unwrap();
        assert_eq!(contact.schema(), Some("crm"));
        assert_eq!(contact.table(), "contact");
        assert_eq!(contact.max_list_size(), Some(20));
        assert_eq!(contact.field("Email").unwrap().column, "email_address");
    }

    #[test]
    fn test_invalid_entities_are_rejected() {
        let config = AppConfig::from_toml(
            r#"
            [[entities]]
            name = "Order"
            fields = [{ name = "Code", type = "text" }]
            "#,
        )
        .unwrap();
        let err = config.registry().unwrap_err();
        assert!(err.to_string().contains("no identity field 'Id'"));
    }

    #[test]
    fn test_load_reports_path() {
        let err = AppConfig::load(Path::new("/nonexistent/listql.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/listql.toml"));
    }

    #[test]
    fn test_default_path() {
        let path = AppConfig::default_path();
        assert!(path.ends_with("listql/config.toml"));
    }
}
