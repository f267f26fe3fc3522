//! Chooses the backend that serves a list request.
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::db::{RelationalExecutor, RelationalQueryProvider};
use crate::error::QueryError;
use crate::metadata::{EntityMetadata, EntityRegistry};
use crate::query::{QueryModel, QueryResult};
use crate::search::{SearchClient, SearchIndexQueryProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Relational,
    SearchIndex,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Relational => write!(f, "relational"),
            ProviderKind::SearchIndex => write!(f, "search-index"),
        }
    }
}

pub enum QueryProvider {
    Relational(RelationalQueryProvider),
    SearchIndex(SearchIndexQueryProvider),
}

impl QueryProvider {
    pub fn kind(&self) -> ProviderKind {
        match self {
            QueryProvider::Relational(_) => ProviderKind::Relational,
            QueryProvider::SearchIndex(_) => ProviderKind::SearchIndex,
        }
    }

    pub async fn execute<T: DeserializeOwned>(self) -> Result<QueryResult<T>, QueryError> {
        match self {
            QueryProvider::Relational(provider) => provider.execute().await,
            QueryProvider::SearchIndex(provider) => provider.execute().await,
        }
    }
}

/// Holds the shared backend handles and hands out one provider per request.
#[derive(Clone)]
pub struct QueryProviderFactory {
    executor: Arc<dyn RelationalExecutor>,
    search: Option<SearchClient>,
    registry: Arc<EntityRegistry>,
    index_prefix: String,
}

impl QueryProviderFactory {
    pub fn new(executor: Arc<dyn RelationalExecutor>, registry: Arc<EntityRegistry>) -> Self {
        Self {
            executor,
            search: None,
            registry,
            index_prefix: String::new(),
        }
    }

    pub fn with_search(mut self, client: SearchClient, index_prefix: impl Into<String>) -> Self {
        self.search = Some(client);
        self.index_prefix = index_prefix.into();
        self
    }

    /// Free-text requests on indexed entities go to the search index; the
    /// relational store serves everything else. Without a configured search
    /// client every request is relational.
    pub fn select(&self, entity: &EntityMetadata, model: &QueryModel) -> ProviderKind {
        if !(entity.is_indexed() && model.has_free_text()) {
            return ProviderKind::Relational;
        }
        if self.search.is_none() {
            warn!(
                entity = %entity.name(),
                "free-text query on indexed entity but no search backend is configured"
            );
            return ProviderKind::Relational;
        }
        ProviderKind::SearchIndex
    }

    pub fn create(&self, model: QueryModel) -> QueryProvider {
        let kind = self.select(&model.entity, &model);
        debug!(entity = %model.entity.name(), provider = %kind, "selected provider");
        match (kind, &self.search) {
            (ProviderKind::SearchIndex, Some(client)) => QueryProvider::SearchIndex(
                SearchIndexQueryProvider::new(client.clone(), self.index_prefix.clone(), model),
            ),
            _ => QueryProvider::Relational(RelationalQueryProvider::new(
                self.executor.clone(),
                self.registry.clone(),
                model,
            )),
        }
    }
}
