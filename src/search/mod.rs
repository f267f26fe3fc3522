//! Elasticsearch-compatible search-index backend.
mod client;
pub mod dsl;
mod provider;

pub use client::{ElasticConfig, Hit, Hits, SearchClient, SearchResponse};
pub use provider::{SearchIndexQueryProvider, MAX_RESULT_WINDOW, PIT_KEEP_ALIVE};
