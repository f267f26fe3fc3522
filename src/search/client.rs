use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::BackendError;
use crate::query::Record;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElasticConfig {
    pub url: String,
    /// Prepended to every index name as `<prefix>-<entity>`.
    pub index_prefix: String,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ElasticConfig {
    fn default() -> Self {
        Self {
            url: String::from("http://localhost:9200"),
            index_prefix: String::new(),
            username: None,
            password: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    pub pit_id: Option<String>,
    pub hits: Hits,
}

#[derive(Debug, Deserialize)]
pub struct Hits {
    #[serde(default)]
    pub hits: Vec<Hit>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hit {
    #[serde(rename = "_source", default)]
    pub source: Record,
    #[serde(default)]
    pub sort: Option<Vec<Value>>,
}

#[derive(Deserialize)]
struct CountResponse {
    count: i64,
}

#[derive(Deserialize)]
struct PitResponse {
    id: String,
}

/// Thin HTTP client for the handful of search-index endpoints the engine
/// needs. Cloning is cheap and shares the connection pool.
#[derive(Clone)]
pub struct SearchClient {
    http: Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
}

impl SearchClient {
    pub fn new(config: &ElasticConfig) -> Result<Self, BackendError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.username {
            Some(user) => request.basic_auth(user, self.password.as_deref()),
            None => request,
        }
    }

    /// Sends the request and turns any non-2xx status into `BackendError::Search`.
    async fn send(&self, request: RequestBuilder) -> Result<Response, BackendError> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(BackendError::Search {
                status: status.as_u16(),
                body,
            })
        }
    }

    /// `HEAD /<index>`. A 404 means the index does not exist.
    pub async fn index_exists(&self, index: &str) -> Result<bool, BackendError> {
        let request = self.http.head(self.url(&urlencoding::encode(index)));
        let response = self.authorize(request).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(BackendError::Search {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    pub async fn count(&self, index: &str, query: &Value) -> Result<i64, BackendError> {
        let url = self.url(&format!("{}/_count", urlencoding::encode(index)));
        let response = self
            .send(self.http.post(url).json(&json!({ "query": query })))
            .await?;
        let body: CountResponse = response.json().await?;
        Ok(body.count)
    }

    pub async fn open_point_in_time(
        &self,
        index: &str,
        keep_alive: &str,
    ) -> Result<String, BackendError> {
        let url = self.url(&format!(
            "{}/_pit?keep_alive={}",
            urlencoding::encode(index),
            urlencoding::encode(keep_alive)
        ));
        let response = self.send(self.http.post(url)).await?;
        let body: PitResponse = response.json().await?;
        Ok(body.id)
    }

    pub async fn close_point_in_time(&self, id: &str) -> Result<(), BackendError> {
        let request = self.http.delete(self.url("_pit")).json(&json!({ "id": id }));
        self.send(request).await?;
        Ok(())
    }

    /// `POST /_search`. Point-in-time searches must not name an index.
    pub async fn search(&self, body: &Value) -> Result<SearchResponse, BackendError> {
        let response = self.send(self.http.post(self.url("_search")).json(body)).await?;
        Ok(response.json().await?)
    }
}
