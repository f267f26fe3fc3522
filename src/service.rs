//! Entry point for list requests: query string in, page plus total count out.
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use crate::error::QueryError;
use crate::metadata::EntityRegistry;
use crate::provider::QueryProviderFactory;
use crate::query::{build, parse, Record};

/// Header carrying the number of records matching the filter, independent of
/// paging.
pub const TOTAL_COUNT_HEADER: &str = "X-Total-Count";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListResponse<T = Record> {
    pub records: Vec<T>,
    pub total_count: i64,
}

impl ListResponse<Record> {
    pub const TOTAL_COUNT_HEADER: &'static str = TOTAL_COUNT_HEADER;
}

impl<T> ListResponse<T> {
    /// Headers for the host framework to attach to the response.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        vec![(TOTAL_COUNT_HEADER, self.total_count.to_string())]
    }
}

pub struct ListService {
    registry: Arc<EntityRegistry>,
    factory: QueryProviderFactory,
    max_list_size: usize,
}

impl ListService {
    pub fn new(
        registry: Arc<EntityRegistry>,
        factory: QueryProviderFactory,
        max_list_size: usize,
    ) -> Self {
        Self {
            registry,
            factory,
            max_list_size,
        }
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub async fn list<T: DeserializeOwned>(
        &self,
        entity: &str,
        raw_query: &str,
    ) -> Result<ListResponse<T>, QueryError> {
        let metadata = self
            .registry
            .get(entity)
            .ok_or_else(|| QueryError::UnknownEntity(entity.to_string()))?;
        let max_limit = metadata.max_list_size().unwrap_or(self.max_list_size);

        let directives = parse(raw_query)?;
        let model = build(directives, max_limit, metadata)?;
        let provider = self.factory.create(model);
        let kind = provider.kind();
        let result = provider.execute::<T>().await?;

        info!(
            entity,
            provider = %kind,
            total_count = result.total_count,
            returned = result.records.len(),
            "list request served"
        );
        Ok(ListResponse {
            records: result.records,
            total_count: result.total_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::RelationalExecutor;
    use crate::error::{BackendError, ErrorStatus};
    use crate::metadata::{fixtures, EntityMetadata, FieldDescriptor, FieldType};
    use crate::search::{ElasticConfig, SearchClient};
    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Serves the same rows for every page and records the SQL it receives.
    struct StaticExecutor {
        rows: Vec<Record>,
        statements: Mutex<Vec<String>>,
    }

    impl StaticExecutor {
        fn new(rows: Value) -> Arc<Self> {
            let rows = rows
                .as_array()
                .map(|rows| rows.iter().filter_map(|r| r.as_object().cloned()).collect())
                .unwrap_or_default();
            Arc::new(Self {
                rows,
                statements: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl RelationalExecutor for StaticExecutor {
        async fn fetch_records(&self, sql: &str) -> Result<Vec<Record>, BackendError> {
            self.statements.lock().unwrap().push(sql.to_string());
            Ok(self.rows.clone())
        }

        async fn fetch_count(&self, sql: &str) -> Result<i64, BackendError> {
            self.statements.lock().unwrap().push(sql.to_string());
            Ok(self.rows.len() as i64)
        }
    }

    fn service(executor: Arc<StaticExecutor>) -> ListService {
        let registry = fixtures::registry();
        let factory = QueryProviderFactory::new(executor, registry.clone());
        ListService::new(registry, factory, 100)
    }

    #[tokio::test]
    async fn test_list_from_relational_store() {
        let executor = StaticExecutor::new(json!([
            { "Id": 1, "Name": "Newsletter" },
            { "Id": 2, "Name": "Promotions" }
        ]));
        let service = service(executor.clone());

        let response = service
            .list::<Record>("EmailGroup", "filter[order]=Name")
            .await
            .unwrap();
        assert_eq!(response.total_count, 2);
        assert_eq!(response.records.len(), 2);
        assert_eq!(
            response.headers(),
            vec![("X-Total-Count", "2".to_string())]
        );
        assert_eq!(ListResponse::TOTAL_COUNT_HEADER, "X-Total-Count");

        let statements = executor.statements.lock().unwrap().clone();
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("SELECT COUNT(*) FROM \"email_groups\""));
        assert!(statements[1].contains("ORDER BY \"name\" ASC"));
    }

    #[tokio::test]
    async fn test_list_into_typed_records() {
        #[derive(Debug, Deserialize)]
        struct EmailGroup {
            #[serde(rename = "Id")]
            id: i64,
            #[serde(rename = "Name")]
            name: String,
        }

        let service = service(StaticExecutor::new(json!([{ "Id": 7, "Name": "Weekly" }])));
        let response = service.list::<EmailGroup>("emailgroup", "").await.unwrap();
        assert_eq!(response.records[0].id, 7);
        assert_eq!(response.records[0].name, "Weekly");
    }

    #[tokio::test]
    async fn test_entity_max_list_size_overrides_default() {
        let entity = EntityMetadata::builder("Tag")
            .max_list_size(Some(5))
            .field(FieldDescriptor::new("Id", FieldType::Integer))
            .build()
            .unwrap();
        let registry = Arc::new(EntityRegistry::new(vec![entity]).unwrap());
        let executor = StaticExecutor::new(json!([]));
        let factory = QueryProviderFactory::new(executor.clone(), registry.clone());
        let service = ListService::new(registry, factory, 100);

        service
            .list::<Record>("Tag", "filter[limit]=50")
            .await
            .unwrap();
        let statements = executor.statements.lock().unwrap().clone();
        assert!(statements[1].contains("LIMIT 5"));
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let service = service(StaticExecutor::new(json!([])));

        let err = service.list::<Record>("Widget", "").await.unwrap_err();
        assert_eq!(err.status(), ErrorStatus::NotFound);

        let err = service
            .list::<Record>("Order", "filter[where][Nope]=1&filter[where][Id][gt]=x")
            .await
            .unwrap_err();
        assert_eq!(err.status(), ErrorStatus::BadRequest);
        match err {
            QueryError::Validation(e) => assert_eq!(e.failures().len(), 2),
            other => panic!("unexpected error: {}", other),
        }

        let err = service
            .list::<Record>("Order", "filter[bogus]=1")
            .await
            .unwrap_err();
        assert_eq!(err.status(), ErrorStatus::BadRequest);
    }

    #[tokio::test]
    async fn test_free_text_goes_to_search_index() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/crm-order"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/crm-order/_count"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "count": 1 })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/crm-order/_pit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "p" })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/_search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "pit_id": "p",
                "hits": { "hits": [
                    { "_source": { "id": 3, "affiliateName": "Fate" }, "sort": [1.0, 3] }
                ] }
            })))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/_pit"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let executor = StaticExecutor::new(json!([]));
        let registry = fixtures::registry();
        let client = SearchClient::new(&ElasticConfig {
            url: server.uri(),
            ..Default::default()
        })
        .unwrap();
        let factory =
            QueryProviderFactory::new(executor.clone(), registry.clone()).with_search(client, "crm");
        let service = ListService::new(registry, factory, 100);

        let response = service.list::<Record>("Order", "query=fate").await.unwrap();
        assert_eq!(response.total_count, 1);
        assert_eq!(
            Value::Object(response.records[0].clone()),
            json!({ "Id": 3, "AffiliateName": "Fate" })
        );
        assert!(executor.statements.lock().unwrap().is_empty());
    }
}
