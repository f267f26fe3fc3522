//! Search-index list queries with point-in-time pagination.
//!
//! The index refuses `from + size` beyond [`MAX_RESULT_WINDOW`], so deeper
//! pages are reached by walking the whole point in time in window-sized
//! batches with `search_after`.
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::client::{Hit, SearchClient};
use super::dsl;
use crate::error::{BackendError, QueryError};
use crate::query::{QueryModel, QueryResult};

pub const MAX_RESULT_WINDOW: usize = 10_000;
pub const PIT_KEEP_ALIVE: &str = "2m";

/// An open point in time. Closed explicitly with [`PointInTime::close`]; if
/// the owner is dropped first the release is spawned onto the runtime.
struct PointInTime {
    client: SearchClient,
    id: Option<String>,
}

impl PointInTime {
    async fn open(client: &SearchClient, index: &str) -> Result<Self, BackendError> {
        let id = client.open_point_in_time(index, PIT_KEEP_ALIVE).await?;
        debug!(index, pit = %id, "opened point in time");
        Ok(Self {
            client: client.clone(),
            id: Some(id),
        })
    }

    fn id(&self) -> &str {
        self.id.as_deref().unwrap_or_default()
    }

    /// Each search response may hand back a newer id for the same point in time.
    fn refresh(&mut self, id: Option<String>) {
        if let Some(id) = id {
            self.id = Some(id);
        }
    }

    fn body(&self) -> Value {
        json!({ "id": self.id(), "keep_alive": PIT_KEEP_ALIVE })
    }

    async fn close(mut self) {
        if let Some(id) = self.id.take() {
            if let Err(e) = self.client.close_point_in_time(&id).await {
                warn!(pit = %id, error = %e, "failed to close point in time");
            }
        }
    }
}

impl Drop for PointInTime {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let client = self.client.clone();
                handle.spawn(async move {
                    if let Err(e) = client.close_point_in_time(&id).await {
                        warn!(pit = %id, error = %e, "failed to close point in time");
                    }
                });
            }
            Err(_) => warn!(pit = %id, "no runtime to close point in time; left to expire"),
        }
    }
}

pub struct SearchIndexQueryProvider {
    client: SearchClient,
    index_prefix: String,
    model: QueryModel,
}

impl SearchIndexQueryProvider {
    pub fn new(client: SearchClient, index_prefix: impl Into<String>, model: QueryModel) -> Self {
        Self {
            client,
            index_prefix: index_prefix.into(),
            model,
        }
    }

    pub async fn execute<T: DeserializeOwned>(self) -> Result<QueryResult<T>, QueryError> {
        let index = self.model.entity.index_name(&self.index_prefix);
        if !self.client.index_exists(&index).await? {
            info!(index = %index, "search index does not exist");
            return Ok(QueryResult::empty());
        }

        let query = dsl::compile_query(&self.model)?;
        let total_count = self.client.count(&index, &query).await?;

        let mut pit = PointInTime::open(&self.client, &index).await?;
        let hits = self.fetch(&mut pit, query).await;
        pit.close().await;
        let hits = hits?;

        info!(
            index = %index,
            total_count,
            returned = hits.len(),
            "search list query"
        );

        let records = hits
            .into_iter()
            .map(|hit| {
                let record = dsl::to_record(&self.model, hit.source);
                serde_json::from_value(Value::Object(record))
            })
            .collect::<Result<Vec<T>, _>>()?;
        Ok(QueryResult {
            records,
            total_count,
        })
    }

    fn search_body(&self, pit: &PointInTime, query: &Value, size: usize) -> Value {
        let mut body = json!({
            "query": query,
            "sort": dsl::compile_sort(&self.model),
            "size": size,
            "pit": pit.body(),
            "track_total_hits": false,
        });
        if let Some(source) = dsl::compile_source(&self.model) {
            body["_source"] = source;
        }
        body
    }

    async fn fetch(&self, pit: &mut PointInTime, query: Value) -> Result<Vec<Hit>, BackendError> {
        let skip = self.model.skip;
        let end = skip.saturating_add(self.model.limit);
        if self.model.limit == 0 {
            return Ok(Vec::new());
        }

        if end <= MAX_RESULT_WINDOW {
            let mut body = self.search_body(pit, &query, self.model.limit);
            body["from"] = json!(skip);
            let response = self.client.search(&body).await?;
            pit.refresh(response.pit_id);
            return Ok(response.hits.hits);
        }

        let mut kept = Vec::with_capacity(self.model.limit);
        let mut seen = 0usize;
        let mut search_after: Option<Vec<Value>> = None;
        loop {
            let mut body = self.search_body(pit, &query, MAX_RESULT_WINDOW);
            if let Some(after) = &search_after {
                body["search_after"] = json!(after);
            }
            let response = self.client.search(&body).await?;
            pit.refresh(response.pit_id);

            let batch = response.hits.hits;
            if batch.is_empty() {
                break;
            }
            search_after = batch.last().and_then(|hit| hit.sort.clone());

            let batch_start = seen;
            seen += batch.len();
            debug!(batch_start, seen, "search_after batch");
            if seen > skip {
                let from = skip.saturating_sub(batch_start);
                let take = end.min(seen) - batch_start - from;
                kept.extend(batch.into_iter().skip(from).take(take));
            }
            if seen >= end {
                break;
            }
            if search_after.is_none() {
                return Err(BackendError::Response(
                    "search hit carries no sort values".into(),
                ));
            }
        }
        Ok(kept)
    }
}
