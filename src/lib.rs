pub mod ast;
pub mod config;
pub mod db;
pub mod error;
pub mod metadata;
pub mod provider;
pub mod query;
pub mod search;
pub mod service;

pub use error::{ErrorStatus, QueryError};
pub use provider::{ProviderKind, QueryProvider, QueryProviderFactory};
pub use service::{ListResponse, ListService, TOTAL_COUNT_HEADER};
